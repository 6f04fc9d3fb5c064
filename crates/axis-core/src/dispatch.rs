//! Operator intents: move, stop, save favorite, log.
//!
//! Moves on one axis queue behind a per-axis gate. `stop` never waits for
//! the gate; it bumps the axis's stop generation instead, so any move still
//! waiting to be sent is abandoned rather than delivered after the stop.

use crate::config::{ConfigStore, MergedConfig};
use crate::error::{AxisError, Result};
use crate::link::ControllerLink;
use crate::logbook::{LogEntry, Logbook};
use crate::registry::{AxisRegistry, AxisSnapshot};
use crate::settings::CommandSettings;
use crate::sync::SyncEngine;
use crate::types::Axis;
use crate::units::{self, Conversion};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Most-recently-moved axes kept for quick favorite saving.
pub const RECENT_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum CommandWarning {
    /// The requested value was rounded to a whole pulse.
    PrecisionLoss { requested: f64, applied: i64 },
    /// A relative move was computed from a reading this old, or from one
    /// whose latest refresh failed.
    StaleBase { age_ms: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub axis: String,
    pub target_pulse: i64,
    pub target_display: f64,
    pub unit: crate::types::Unit,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CommandWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogReceipt {
    pub path: PathBuf,
    pub entries: Vec<LogEntry>,
}

struct Plan {
    pulse: i64,
    warnings: Vec<CommandWarning>,
}

// ---------------------------------------------------------------------------
// CommandDispatcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AxisGate {
    moves: tokio::sync::Mutex<()>,
    stop_generation: AtomicU64,
}

impl AxisGate {
    fn ensure_not_stopped(&self, name: &str, generation: u64) -> Result<()> {
        if self.stop_generation.load(Ordering::SeqCst) != generation {
            tracing::info!(axis = name, "move abandoned: stop issued before send");
            return Err(AxisError::CommandPreempted(name.to_string()));
        }
        Ok(())
    }
}

pub struct CommandDispatcher {
    engine: SyncEngine,
    store: ConfigStore,
    logbook: Logbook,
    settings: CommandSettings,
    config: RwLock<Arc<MergedConfig>>,
    gates: Mutex<HashMap<String, Arc<AxisGate>>>,
    recent: Mutex<VecDeque<String>>,
}

impl CommandDispatcher {
    pub fn new(
        engine: SyncEngine,
        store: ConfigStore,
        logbook: Logbook,
        settings: CommandSettings,
        config: Arc<MergedConfig>,
    ) -> Self {
        Self {
            engine,
            store,
            logbook,
            settings,
            config: RwLock::new(config),
            gates: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    fn registry(&self) -> &AxisRegistry {
        self.engine.registry()
    }

    fn link(&self) -> &dyn ControllerLink {
        self.engine.link().as_ref()
    }

    /// Merged configuration currently backing the registry.
    pub fn config(&self) -> Arc<MergedConfig> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn logbook(&self) -> &Logbook {
        &self.logbook
    }

    fn gate(&self, name: &str) -> Arc<AxisGate> {
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn precision(&self, axis: &Axis, conversion: Conversion) -> Result<Option<CommandWarning>> {
        let Some(loss) = conversion.warning else {
            return Ok(None);
        };
        if !self.settings.allow_precision_loss {
            return Err(AxisError::PrecisionLoss {
                axis: axis.name.clone(),
                requested: loss.requested,
                applied: loss.applied,
            });
        }
        tracing::warn!(
            axis = %axis.name,
            requested = loss.requested,
            applied = loss.applied,
            "rounding to whole pulse"
        );
        Ok(Some(CommandWarning::PrecisionLoss {
            requested: loss.requested,
            applied: loss.applied,
        }))
    }

    // -----------------------------------------------------------------------
    // Moves
    // -----------------------------------------------------------------------

    pub async fn move_absolute(&self, name: &str, value: f64) -> Result<MoveOutcome> {
        self.run_move(name, |axis, _| {
            let conversion = units::to_pulse(value, axis)?;
            Ok(Plan {
                pulse: conversion.pulse,
                warnings: self.precision(axis, conversion)?.into_iter().collect(),
            })
        })
        .await
    }

    /// Move by `delta` from the last known position. A stale base is
    /// flagged on the outcome, not refused.
    pub async fn move_relative(&self, name: &str, delta: f64) -> Result<MoveOutcome> {
        let stale_after = self.settings.stale_after();
        self.run_move(name, |axis, snapshot| {
            let base = snapshot
                .position_pulse
                .ok_or_else(|| AxisError::NoKnownPosition(axis.name.clone()))?;
            let conversion = units::delta_to_pulse(delta, axis)?;
            let pulse = base
                .checked_add(conversion.pulse)
                .ok_or_else(|| AxisError::InvalidUnit {
                    axis: axis.name.clone(),
                    value: delta,
                    reason: "target pulse count out of range".to_string(),
                })?;

            let mut warnings: Vec<CommandWarning> =
                self.precision(axis, conversion)?.into_iter().collect();
            let age = snapshot.age().unwrap_or(Duration::ZERO);
            if age > stale_after || snapshot.last_error.is_some() {
                tracing::warn!(axis = %axis.name, age_ms = age.as_millis() as u64, "relative move from stale base");
                warnings.push(CommandWarning::StaleBase {
                    age_ms: age.as_millis() as u64,
                });
            }
            Ok(Plan { pulse, warnings })
        })
        .await
    }

    async fn run_move<F>(&self, name: &str, plan: F) -> Result<MoveOutcome>
    where
        F: FnOnce(&Axis, &AxisSnapshot) -> Result<Plan>,
    {
        let axis = self.registry().axis(name)?;
        let gate = self.gate(name);
        let generation = gate.stop_generation.load(Ordering::SeqCst);
        let _turn = gate.moves.lock().await;
        gate.ensure_not_stopped(name, generation)?;

        let snapshot = self.registry().get(name)?;
        let Plan { pulse, warnings } = plan(&axis, &snapshot)?;

        self.registry().begin_command(name)?;
        // A stop may have landed while the target was being computed.
        gate.ensure_not_stopped(name, generation)?;
        tracing::info!(axis = name, pulse, "move requested");
        if let Err(e) = self.link().put_position(&axis, pulse).await {
            tracing::warn!(axis = name, error = %e, "move not acknowledged");
            return Err(e);
        }
        self.registry().note_command(name, Some(pulse))?;
        self.remember(name);
        self.confirm(name);

        Ok(MoveOutcome {
            axis: name.to_string(),
            target_pulse: pulse,
            target_display: units::to_display(pulse, &axis),
            unit: axis.unit,
            warnings,
        })
    }

    /// Always allowed, never queued behind moves.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let axis = self.registry().axis(name)?;
        self.gate(name)
            .stop_generation
            .fetch_add(1, Ordering::SeqCst);
        self.registry().begin_command(name)?;
        tracing::info!(axis = name, "stop requested");
        if let Err(e) = self.link().put_stop(&axis).await {
            tracing::warn!(axis = name, error = %e, "stop not acknowledged");
            return Err(e);
        }
        self.registry().note_command(name, None)?;
        self.confirm(name);
        Ok(())
    }

    /// Spawn the post-command poll whose result supersedes anything fetched
    /// before the command.
    fn confirm(&self, name: &str) {
        let engine = self.engine.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.poll_axis(&name).await {
                tracing::debug!(axis = %name, error = %e, "confirming poll skipped");
            }
        });
    }

    fn remember(&self, name: &str) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.retain(|n| n != name);
        recent.push_front(name.to_string());
        recent.truncate(RECENT_LIMIT);
    }

    /// Most recently moved axes, newest first.
    pub fn recent(&self) -> Vec<String> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Reload every layer and rebuild the registry from scratch.
    pub fn reload(&self) -> Result<Arc<MergedConfig>> {
        let merged = Arc::new(self.store.load_all()?);
        self.registry().bootstrap(&merged);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = merged.clone();
        tracing::info!(groups = merged.groups.len(), "configuration reloaded");
        Ok(merged)
    }

    pub async fn save_favorite(&self, group: &str, axis_names: &[String]) -> Result<Arc<MergedConfig>> {
        let axes = axis_names
            .iter()
            .map(|n| self.registry().axis(n))
            .collect::<Result<Vec<_>>>()?;
        self.store.save_favorite(group, &axes)?;
        tracing::info!(group, axes = axes.len(), "favorite saved");
        let merged = self.reload()?;

        // Refill the fresh registry without making the caller wait on the link.
        let engine = self.engine.clone();
        tokio::spawn(async move {
            engine.poll_cycle().await;
        });
        Ok(merged)
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    /// One entry per axis of `group`, from the registry as it is right now.
    pub fn append_log(&self, group: &str, comment: &str) -> Result<LogReceipt> {
        let config = self.config();
        let group_def = config.group(group)?;
        let timestamp = chrono::Local::now();
        let entries = group_def
            .axes
            .iter()
            .map(|name| {
                let snapshot = self.registry().get(name).ok();
                let unit = snapshot
                    .as_ref()
                    .map(|s| s.axis.unit)
                    .or_else(|| config.axes.get(name).map(|a| a.unit))
                    .unwrap_or_default();
                let position = snapshot
                    .filter(|s| s.last_error.is_none())
                    .and_then(|s| s.position_display);
                LogEntry {
                    timestamp,
                    group: group.to_string(),
                    axis_name: name.clone(),
                    position,
                    unit,
                    comment: comment.to_string(),
                }
            })
            .collect::<Vec<_>>();
        let path = self.logbook.append(group, &entries)?;
        Ok(LogReceipt { path, entries })
    }
}
