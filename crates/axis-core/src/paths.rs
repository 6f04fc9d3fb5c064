use crate::error::{AxisError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File name constants
// ---------------------------------------------------------------------------

pub const DEFAULTS_FILE: &str = "default_axis.yaml";
pub const FAVORITES_FILE: &str = "user_axis.yaml";
pub const SETTINGS_FILE: &str = "axis-tool.yaml";

/// Environment variable naming the beamline config tree.
pub const BLCONFIG_ENV: &str = "BLCONFIG";
pub const BLCONFIG_DEFAULT: &str = "/blconfig";
pub const HARDWARE_CONFIG_REL: &str = "bss/bss.config";

pub const LOG_EXTENSION: &str = "log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn defaults_path(root: &Path) -> PathBuf {
    root.join(DEFAULTS_FILE)
}

pub fn favorites_path(root: &Path) -> PathBuf {
    root.join(FAVORITES_FILE)
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

/// `$BLCONFIG/bss/bss.config`, with `BLCONFIG` falling back to `/blconfig`.
pub fn default_hardware_config_path() -> PathBuf {
    let base = std::env::var_os(BLCONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(BLCONFIG_DEFAULT));
    base.join(HARDWARE_CONFIG_REL)
}

/// `{log_dir}/{YYYYMMDD}_{stem}.log`, where the stem is `group` made safe
/// for a file name by [`log_stem`].
pub fn log_path(log_dir: &Path, date: chrono::NaiveDate, group: &str) -> PathBuf {
    log_dir.join(format!(
        "{}_{}.{}",
        date.format("%Y%m%d"),
        log_stem(group),
        LOG_EXTENSION
    ))
}

/// Group names come from hand-edited layers and may hold spaces or
/// slashes. Anything outside `[A-Za-z0-9_.-]` becomes `_`, as do leading
/// dots, so the result always names a file directly inside the log dir.
pub fn log_stem(group: &str) -> String {
    let mut stem: String = group
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let dots = stem.len() - stem.trim_start_matches('.').len();
    stem.replace_range(..dots, &"_".repeat(dots));
    if stem.is_empty() {
        stem.push('_');
    }
    stem
}

// ---------------------------------------------------------------------------
// Group name validation
// ---------------------------------------------------------------------------

static GROUP_RE: OnceLock<Regex> = OnceLock::new();

fn group_re() -> &'static Regex {
    GROUP_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("group name pattern is valid")
    })
}

/// Names accepted for saved favorites.
pub fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !group_re().is_match(name) {
        return Err(AxisError::InvalidGroupName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_group_names() {
        for name in ["slits", "favorite", "mono_2", "KB-mirror", "g.1"] {
            validate_group_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_group_names() {
        for name in ["", "../etc", "a/b", "-lead", "has space", &"x".repeat(65)] {
            assert!(
                validate_group_name(name).is_err(),
                "expected invalid: {name}"
            );
        }
    }

    #[test]
    fn log_path_uses_date_and_group() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let p = log_path(Path::new("/tmp/logs"), date, "slits");
        assert_eq!(p, PathBuf::from("/tmp/logs/20250307_slits.log"));
    }

    #[test]
    fn log_stem_keeps_safe_names() {
        assert_eq!(log_stem("slits"), "slits");
        assert_eq!(log_stem("KB-mirror.v2"), "KB-mirror.v2");
    }

    #[test]
    fn log_stem_replaces_unsafe_characters() {
        assert_eq!(log_stem("KB mirror"), "KB_mirror");
        assert_eq!(log_stem("../x"), "___x");
        assert_eq!(log_stem("a/b\\c"), "a_b_c");
        assert_eq!(log_stem("..."), "___");
        assert_eq!(log_stem("モノ"), "__");
    }

    #[test]
    fn log_path_stays_in_log_dir() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let dir = Path::new("/tmp/logs");
        for group in ["KB mirror", "../../etc/passwd", "/abs", "..", ""] {
            let p = log_path(dir, date, group);
            assert_eq!(p.parent(), Some(dir), "{group}");
        }
        assert_eq!(
            log_path(dir, date, "KB mirror"),
            PathBuf::from("/tmp/logs/20250307_KB_mirror.log")
        );
    }
}
