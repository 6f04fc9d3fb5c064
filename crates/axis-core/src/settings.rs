use crate::config::{ConfigWarning, WarnLevel};
use crate::error::{AxisError, Result};
use crate::hardware::NetworkSettings;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "10.178.215.3";
pub const DEFAULT_PORT: u16 = 10101;
pub const DEFAULT_BL_OBJECT: &str = "bl_41in";

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Resolved controller address plus the beamline object prefix used in
/// every request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub bl_object: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// ControllerSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Either the full object (`bl_45xu`) or just the beamline (`45xu`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bl_object: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            bl_object: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ControllerSettings {
    /// Settings file (and CLI overrides written into it) beat the hardware
    /// blob, which beats the built-in deployment defaults.
    pub fn endpoint(&self, network: &NetworkSettings) -> Endpoint {
        let host = self
            .host
            .clone()
            .or_else(|| network.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = self.port.or(network.port).unwrap_or(DEFAULT_PORT);
        let bl_object = self
            .bl_object
            .as_deref()
            .map(normalize_bl_object)
            .or_else(|| network.bl_object.clone())
            .unwrap_or_else(|| DEFAULT_BL_OBJECT.to_string());
        Endpoint {
            host,
            port,
            bl_object,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn normalize_bl_object(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("bl_") {
        raw.to_string()
    } else {
        format!("bl_{raw}")
    }
}

// ---------------------------------------------------------------------------
// PollingSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Consecutive failures on one axis before it is reported degraded.
    #[serde(default = "default_failure_threshold")]
    pub failure_report_threshold: u32,
}

fn default_interval_ms() -> u64 {
    500
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            failure_report_threshold: default_failure_threshold(),
        }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// CommandSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Age beyond which a relative move's base position is flagged stale.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// When false, a fractional pulse request is refused instead of rounded.
    #[serde(default = "default_allow_precision_loss")]
    pub allow_precision_loss: bool,
}

fn default_stale_after_ms() -> u64 {
    3000
}

fn default_allow_precision_loss() -> bool {
    true
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            allow_precision_loss: default_allow_precision_loss(),
        }
    }
}

impl CommandSettings {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

// ---------------------------------------------------------------------------
// FileSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the layer files. Not read from the settings file.
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub commands: CommandSettings,
    #[serde(default)]
    pub files: FileSettings,
}

impl Settings {
    /// Defaults rooted at `root`, without touching the filesystem.
    pub fn in_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    /// Read `axis-tool.yaml` from `root` if present; built-in defaults
    /// otherwise. A present but unparseable file is an error.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::settings_path(root);
        let mut settings = match crate::io::read_optional(&path)? {
            Some(raw) if !raw.trim().is_empty() => {
                serde_yaml::from_str::<Settings>(&raw).map_err(|e| AxisError::ConfigLoadFatal {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
            _ => Settings::default(),
        };
        settings.root = root.to_path_buf();
        Ok(settings)
    }

    /// Explicit path, else `$BLCONFIG/bss/bss.config`. Relative paths are
    /// taken relative to the root.
    pub fn hardware_config_path(&self) -> PathBuf {
        match &self.files.hardware_config {
            Some(p) if p.is_relative() => self.root.join(p),
            Some(p) => p.clone(),
            None => paths::default_hardware_config_path(),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        match &self.files.log_dir {
            Some(p) if p.is_relative() => self.root.join(p),
            Some(p) => p.clone(),
            None => self.root.join("logs"),
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.controller.timeout_ms == 0 {
            warnings.push(ConfigWarning::error(
                "controller.timeout_ms is 0; every request would time out",
            ));
        } else if self.controller.timeout_ms > 30_000 {
            warnings.push(ConfigWarning::warning(format!(
                "controller.timeout_ms={} (>30s) will stall a poll cycle on a dead axis",
                self.controller.timeout_ms
            )));
        }

        if let Some(host) = &self.controller.host {
            if host.trim().is_empty() {
                warnings.push(ConfigWarning::error("controller.host is empty"));
            }
        }
        if self.controller.port == Some(0) {
            warnings.push(ConfigWarning::error("controller.port is 0"));
        }

        if self.polling.interval_ms < 50 {
            warnings.push(ConfigWarning::warning(format!(
                "polling.interval_ms={} (<50ms) floods the controller",
                self.polling.interval_ms
            )));
        }
        if self.polling.failure_report_threshold == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                axis: None,
                message: "polling.failure_report_threshold is 0; degraded axes are never reported"
                    .to_string(),
            });
        }

        if self.commands.stale_after_ms < self.polling.interval_ms {
            warnings.push(ConfigWarning::warning(format!(
                "commands.stale_after_ms={} is shorter than polling.interval_ms={}; \
                 most relative moves will be flagged stale",
                self.commands.stale_after_ms, self.polling.interval_ms
            )));
        }

        warnings
    }
}
