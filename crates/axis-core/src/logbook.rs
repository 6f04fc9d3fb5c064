use crate::error::{AxisError, Result};
use crate::paths;
use crate::types::Unit;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One recorded axis position. `position` is `None` when the axis had no
/// trustworthy reading at the time of logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub group: String,
    pub axis_name: String,
    pub position: Option<f64>,
    pub unit: Unit,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

/// Append-only position log, one JSON line per entry, one file per
/// (date, group).
#[derive(Debug, Clone)]
pub struct Logbook {
    dir: PathBuf,
}

impl Logbook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, date: NaiveDate, group: &str) -> PathBuf {
        paths::log_path(&self.dir, date, group)
    }

    /// Append `entries` to today's file for `group` in one write. Any group
    /// that loaded can be logged; its name is made file-safe on the way.
    pub fn append(&self, group: &str, entries: &[LogEntry]) -> Result<PathBuf> {
        if group.trim().is_empty() {
            return Err(AxisError::InvalidGroupName(group.to_string()));
        }
        let path = self.path_for(Local::now().date_naive(), group);
        let mut text = String::new();
        for entry in entries {
            text.push_str(&serde_json::to_string(entry)?);
            text.push('\n');
        }
        if !text.is_empty() {
            crate::io::append_text(&path, &text)?;
        }
        tracing::info!(group, entries = entries.len(), path = %path.display(), "log appended");
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Vec<LogEntry>> {
        let Some(raw) = crate::io::read_optional(path)? else {
            return Ok(Vec::new());
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}
