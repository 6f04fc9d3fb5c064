use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AxisError {
    #[error("unknown axis: {0}")]
    UnknownAxis(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("invalid group name '{0}': must be alphanumeric with '_', '-' or '.'")]
    InvalidGroupName(String),

    #[error("invalid value {value} for axis '{axis}': {reason}")]
    InvalidUnit {
        axis: String,
        value: f64,
        reason: String,
    },

    #[error("precision loss on axis '{axis}': requested {requested}, would send {applied} pulse")]
    PrecisionLoss {
        axis: String,
        requested: f64,
        applied: i64,
    },

    #[error("axis '{0}' has no known position yet; relative move refused")]
    NoKnownPosition(String),

    #[error("move on axis '{0}' was preempted by a stop")]
    CommandPreempted(String),

    #[error("malformed hardware config for axis '{axis}': {reason}")]
    MalformedHardwareConfig { axis: String, reason: String },

    #[error("controller timed out during {operation} on axis '{axis}'")]
    LinkTimeout { axis: String, operation: String },

    #[error("controller at {endpoint} refused connection: {reason}")]
    LinkRefused { endpoint: String, reason: String },

    #[error("protocol error on axis '{axis}': {reason}")]
    ProtocolError { axis: String, reason: String },

    #[error("controller rejected {operation} on axis '{axis}': {reply}")]
    Rejected {
        axis: String,
        operation: String,
        reply: String,
    },

    #[error("cannot load required config layer {}: {reason}", path.display())]
    ConfigLoadFatal { path: PathBuf, reason: String },

    #[error("optional config layer {} skipped: {reason}", path.display())]
    ConfigLoadPartial { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AxisError>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Payload-free tag of an [`AxisError`], cheap to copy into per-axis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownAxis,
    UnknownGroup,
    InvalidGroupName,
    InvalidUnit,
    PrecisionLoss,
    NoKnownPosition,
    CommandPreempted,
    MalformedHardwareConfig,
    LinkTimeout,
    LinkRefused,
    ProtocolError,
    Rejected,
    ConfigLoadFatal,
    ConfigLoadPartial,
    Io,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownAxis => "unknown_axis",
            ErrorKind::UnknownGroup => "unknown_group",
            ErrorKind::InvalidGroupName => "invalid_group_name",
            ErrorKind::InvalidUnit => "invalid_unit",
            ErrorKind::PrecisionLoss => "precision_loss",
            ErrorKind::NoKnownPosition => "no_known_position",
            ErrorKind::CommandPreempted => "command_preempted",
            ErrorKind::MalformedHardwareConfig => "malformed_hardware_config",
            ErrorKind::LinkTimeout => "link_timeout",
            ErrorKind::LinkRefused => "link_refused",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::Rejected => "rejected",
            ErrorKind::ConfigLoadFatal => "config_load_fatal",
            ErrorKind::ConfigLoadPartial => "config_load_partial",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        }
    }

    /// True for failures of the controller link itself, as opposed to bad
    /// operator input or local configuration problems.
    pub fn is_link_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::LinkTimeout
                | ErrorKind::LinkRefused
                | ErrorKind::ProtocolError
                | ErrorKind::Rejected
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AxisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AxisError::UnknownAxis(_) => ErrorKind::UnknownAxis,
            AxisError::UnknownGroup(_) => ErrorKind::UnknownGroup,
            AxisError::InvalidGroupName(_) => ErrorKind::InvalidGroupName,
            AxisError::InvalidUnit { .. } => ErrorKind::InvalidUnit,
            AxisError::PrecisionLoss { .. } => ErrorKind::PrecisionLoss,
            AxisError::NoKnownPosition(_) => ErrorKind::NoKnownPosition,
            AxisError::CommandPreempted(_) => ErrorKind::CommandPreempted,
            AxisError::MalformedHardwareConfig { .. } => ErrorKind::MalformedHardwareConfig,
            AxisError::LinkTimeout { .. } => ErrorKind::LinkTimeout,
            AxisError::LinkRefused { .. } => ErrorKind::LinkRefused,
            AxisError::ProtocolError { .. } => ErrorKind::ProtocolError,
            AxisError::Rejected { .. } => ErrorKind::Rejected,
            AxisError::ConfigLoadFatal { .. } => ErrorKind::ConfigLoadFatal,
            AxisError::ConfigLoadPartial { .. } => ErrorKind::ConfigLoadPartial,
            AxisError::Io(_) => ErrorKind::Io,
            AxisError::Yaml(_) | AxisError::Json(_) => ErrorKind::Serialization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let e = AxisError::LinkTimeout {
            axis: "slit1".into(),
            operation: "fetch".into(),
        };
        assert_eq!(e.kind(), ErrorKind::LinkTimeout);
        assert!(e.kind().is_link_failure());
        assert!(!AxisError::UnknownAxis("x".into()).kind().is_link_failure());
    }

    #[test]
    fn messages_name_the_axis() {
        let e = AxisError::MalformedHardwareConfig {
            axis: "stage_x".into(),
            reason: "bad _val2pulse".into(),
        };
        assert!(e.to_string().contains("stage_x"));
        assert_eq!(ErrorKind::ConfigLoadFatal.to_string(), "config_load_fatal");
    }
}
