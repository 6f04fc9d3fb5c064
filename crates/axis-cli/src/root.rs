use axis_core::paths::DEFAULTS_FILE;
use std::path::{Path, PathBuf};

/// Resolve the console root directory.
///
/// Priority:
/// 1. `--root` flag / `AXIS_TOOL_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `default_axis.yaml`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or(cwd)
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(DEFAULTS_FILE).is_file())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn finds_defaults_file_in_ancestor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DEFAULTS_FILE), "g: []\n").unwrap();
        let subdir = dir.path().join("logs/2024");
        std::fs::create_dir_all(&subdir).unwrap();

        assert_eq!(find_upward(&subdir).as_deref(), Some(dir.path()));
    }

    #[test]
    fn no_defaults_file_anywhere() {
        let dir = TempDir::new().unwrap();
        let subdir = dir.path().join("a/b");
        std::fs::create_dir_all(&subdir).unwrap();
        let found = find_upward(&subdir);
        assert!(found.map_or(true, |p| !p.starts_with(dir.path())));
    }
}
