//! Authoritative last-known state per axis.
//!
//! Each axis owns one state cell behind its own mutex; there is no lock
//! spanning axes. Writers go through tickets so that results are applied in
//! the order their fetches were issued, and never across a command boundary.

use crate::config::MergedConfig;
use crate::error::{AxisError, ErrorKind, Result};
use crate::link::Reading;
use crate::types::{Axis, LimitFlags, MotionState};
use crate::units;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// State and snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct AxisState {
    status: MotionState,
    polling: bool,
    position_pulse: i64,
    last_updated: Option<Instant>,
    last_error: Option<ErrorKind>,
    consecutive_failures: u32,
    limits: Option<LimitFlags>,
    target_pulse: Option<i64>,
    status_polling_disabled: bool,
    /// Bumped by every command; fetches issued under an older epoch are void.
    epoch: u64,
    next_seq: u64,
    applied_seq: u64,
}

/// Immutable copy of one axis and its state at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct AxisSnapshot {
    pub axis: Axis,
    pub status: MotionState,
    /// A fetch for this axis is in flight.
    pub polling: bool,
    /// `None` until the first successful fetch.
    pub position_pulse: Option<i64>,
    pub position_display: Option<f64>,
    #[serde(skip)]
    pub last_updated: Option<Instant>,
    pub last_error: Option<ErrorKind>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_pulse: Option<i64>,
}

impl AxisSnapshot {
    fn capture(axis: &Axis, st: &AxisState) -> Self {
        let position_pulse = st.last_updated.map(|_| st.position_pulse);
        Self {
            axis: axis.clone(),
            status: st.status,
            polling: st.polling,
            position_pulse,
            position_display: position_pulse.map(|p| units::to_display(p, axis)),
            last_updated: st.last_updated,
            last_error: st.last_error,
            consecutive_failures: st.consecutive_failures,
            limits: st.limits,
            target_pulse: st.target_pulse,
        }
    }

    pub fn name(&self) -> &str {
        &self.axis.name
    }

    pub fn moving(&self) -> bool {
        self.status == MotionState::Moving
    }

    /// Time since the last successful fetch.
    pub fn age(&self) -> Option<Duration> {
        self.last_updated.map(|t| t.elapsed())
    }

    /// The reading is older than the newest attempt, which failed.
    pub fn is_stale(&self) -> bool {
        self.last_error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// Issued when a fetch starts; presented again when its result is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    epoch: u64,
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum FetchOutcome {
    Reading(Reading),
    Failed(ErrorKind),
}

#[derive(Debug, Clone)]
pub enum UpdateResult {
    Applied(AxisSnapshot),
    /// Superseded by a command or a newer fetch; nothing changed.
    Stale,
}

// ---------------------------------------------------------------------------
// AxisRegistry
// ---------------------------------------------------------------------------

struct AxisSlot {
    axis: Axis,
    state: Mutex<AxisState>,
}

impl AxisSlot {
    fn lock(&self) -> MutexGuard<'_, AxisState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
pub struct AxisRegistry {
    table: RwLock<HashMap<String, Arc<AxisSlot>>>,
    generation: AtomicU64,
}

impl AxisRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table. Fetches issued against the previous table
    /// are reported stale.
    pub fn bootstrap(&self, config: &MergedConfig) {
        let table = config
            .axes
            .values()
            .map(|axis| {
                (
                    axis.name.clone(),
                    Arc::new(AxisSlot {
                        axis: axis.clone(),
                        state: Mutex::new(AxisState::default()),
                    }),
                )
            })
            .collect::<HashMap<_, _>>();
        let count = table.len();
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        *guard = table;
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!(axes = count, "axis registry rebuilt");
    }

    fn slot(&self, name: &str) -> Result<Arc<AxisSlot>> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| AxisError::UnknownAxis(name.to_string()))
    }

    /// The slot together with the generation it belongs to, read under one
    /// table lock so a rebuild cannot land between the two.
    fn slot_in_generation(&self, name: &str) -> Result<(u64, Arc<AxisSlot>)> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let generation = self.generation.load(Ordering::SeqCst);
        let slot = table
            .get(name)
            .cloned()
            .ok_or_else(|| AxisError::UnknownAxis(name.to_string()))?;
        Ok((generation, slot))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_ok()
    }

    /// Sorted axis names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn axis(&self, name: &str) -> Result<Axis> {
        Ok(self.slot(name)?.axis.clone())
    }

    pub fn get(&self, name: &str) -> Result<AxisSnapshot> {
        let slot = self.slot(name)?;
        let st = slot.lock();
        Ok(AxisSnapshot::capture(&slot.axis, &st))
    }

    pub fn begin_fetch(&self, name: &str) -> Result<FetchTicket> {
        let (generation, slot) = self.slot_in_generation(name)?;
        let mut st = slot.lock();
        st.next_seq += 1;
        st.polling = true;
        Ok(FetchTicket {
            generation,
            epoch: st.epoch,
            seq: st.next_seq,
        })
    }

    /// Void every fetch of `name` issued so far. Call before sending a
    /// command to the controller.
    pub fn begin_command(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        slot.lock().epoch += 1;
        Ok(())
    }

    /// Record the target of an acknowledged move (`None` for a stop).
    pub fn note_command(&self, name: &str, target_pulse: Option<i64>) -> Result<()> {
        let slot = self.slot(name)?;
        slot.lock().target_pulse = target_pulse;
        Ok(())
    }

    /// Apply a fetch result atomically, unless a command or a newer fetch
    /// has superseded it.
    pub fn apply_update(
        &self,
        name: &str,
        ticket: FetchTicket,
        outcome: FetchOutcome,
    ) -> Result<UpdateResult> {
        let (generation, slot) = match self.slot_in_generation(name) {
            Ok(found) => found,
            Err(_) if ticket.generation != self.generation.load(Ordering::SeqCst) => {
                return Ok(UpdateResult::Stale);
            }
            Err(e) => return Err(e),
        };
        if ticket.generation != generation {
            tracing::debug!(axis = name, "dropping fetch result from before the last rebuild");
            return Ok(UpdateResult::Stale);
        }
        let mut st = slot.lock();
        if ticket.seq >= st.next_seq {
            st.polling = false;
        }
        if ticket.epoch != st.epoch || ticket.seq <= st.applied_seq {
            tracing::debug!(axis = name, seq = ticket.seq, "dropping superseded fetch result");
            return Ok(UpdateResult::Stale);
        }
        st.applied_seq = ticket.seq;
        match outcome {
            FetchOutcome::Reading(reading) => {
                st.status = reading.state.into();
                st.position_pulse = reading.position_pulse;
                st.last_updated = Some(Instant::now());
                st.last_error = None;
                st.consecutive_failures = 0;
                if st.status == MotionState::Idle && st.target_pulse == Some(reading.position_pulse)
                {
                    st.target_pulse = None;
                }
            }
            FetchOutcome::Failed(kind) => {
                st.last_error = Some(kind);
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            }
        }
        Ok(UpdateResult::Applied(AxisSnapshot::capture(&slot.axis, &st)))
    }

    pub fn set_limits(&self, name: &str, limits: LimitFlags) -> Result<()> {
        let slot = self.slot(name)?;
        slot.lock().limits = Some(limits);
        Ok(())
    }

    pub fn status_polling_enabled(&self, name: &str) -> bool {
        self.slot(name)
            .map(|s| !s.lock().status_polling_disabled)
            .unwrap_or(false)
    }

    /// Stop querying limit switches on `name` until the next rebuild.
    pub fn disable_status_polling(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        slot.lock().status_polling_disabled = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{merge, ConfigLayer, LayerDocument};
    use crate::link::ControllerState;
    use crate::types::LayerSource;

    fn registry(names: &[&str]) -> AxisRegistry {
        let mut groups = LayerDocument::new();
        groups.insert(
            "g".to_string(),
            names
                .iter()
                .map(|n| crate::config::AxisEntry::named(*n))
                .collect(),
        );
        let merged = merge(&[ConfigLayer {
            source: LayerSource::Defaults,
            path: None,
            groups,
        }]);
        let reg = AxisRegistry::new();
        reg.bootstrap(&merged);
        reg
    }

    fn reading(pos: i64) -> FetchOutcome {
        FetchOutcome::Reading(Reading {
            state: ControllerState::Idle,
            position_pulse: pos,
        })
    }

    #[test]
    fn unknown_axis_is_an_error() {
        let reg = registry(&["a"]);
        assert!(matches!(reg.get("zz"), Err(AxisError::UnknownAxis(_))));
        assert_eq!(reg.get("a").unwrap().status, MotionState::Unknown);
        assert!(reg.get("a").unwrap().position_pulse.is_none());
    }

    #[test]
    fn fetch_result_applies() {
        let reg = registry(&["a"]);
        let t = reg.begin_fetch("a").unwrap();
        assert!(reg.get("a").unwrap().polling);
        reg.apply_update("a", t, reading(42)).unwrap();
        let s = reg.get("a").unwrap();
        assert_eq!(s.position_pulse, Some(42));
        assert_eq!(s.status, MotionState::Idle);
        assert!(!s.polling);
        assert!(s.age().is_some());
    }

    #[test]
    fn older_ticket_never_overwrites_newer() {
        let reg = registry(&["a"]);
        let old = reg.begin_fetch("a").unwrap();
        let new = reg.begin_fetch("a").unwrap();
        reg.apply_update("a", new, reading(2)).unwrap();
        assert!(matches!(
            reg.apply_update("a", old, reading(1)).unwrap(),
            UpdateResult::Stale
        ));
        assert_eq!(reg.get("a").unwrap().position_pulse, Some(2));
    }

    #[test]
    fn command_voids_in_flight_fetch() {
        let reg = registry(&["a"]);
        let before = reg.begin_fetch("a").unwrap();
        reg.begin_command("a").unwrap();
        assert!(matches!(
            reg.apply_update("a", before, reading(1)).unwrap(),
            UpdateResult::Stale
        ));
        let after = reg.begin_fetch("a").unwrap();
        assert!(matches!(
            reg.apply_update("a", after, reading(9)).unwrap(),
            UpdateResult::Applied(_)
        ));
    }

    #[test]
    fn failure_keeps_last_reading() {
        let reg = registry(&["a"]);
        let t = reg.begin_fetch("a").unwrap();
        reg.apply_update("a", t, reading(7)).unwrap();
        for _ in 0..2 {
            let t = reg.begin_fetch("a").unwrap();
            reg.apply_update("a", t, FetchOutcome::Failed(ErrorKind::LinkTimeout))
                .unwrap();
        }
        let s = reg.get("a").unwrap();
        assert_eq!(s.position_pulse, Some(7));
        assert_eq!(s.status, MotionState::Idle);
        assert_eq!(s.last_error, Some(ErrorKind::LinkTimeout));
        assert_eq!(s.consecutive_failures, 2);

        let t = reg.begin_fetch("a").unwrap();
        reg.apply_update("a", t, reading(8)).unwrap();
        let s = reg.get("a").unwrap();
        assert!(s.last_error.is_none());
        assert_eq!(s.consecutive_failures, 0);
    }

    #[test]
    fn rebootstrap_voids_old_tickets_and_resets_state() {
        let reg = registry(&["a"]);
        let t = reg.begin_fetch("a").unwrap();
        reg.disable_status_polling("a").unwrap();
        let mut groups = LayerDocument::new();
        groups.insert("g".into(), vec![crate::config::AxisEntry::named("a")]);
        reg.bootstrap(&merge(&[ConfigLayer {
            source: LayerSource::Defaults,
            path: None,
            groups,
        }]));
        assert!(matches!(
            reg.apply_update("a", t, reading(3)).unwrap(),
            UpdateResult::Stale
        ));
        assert!(reg.status_polling_enabled("a"));
    }

    #[test]
    fn fetch_from_before_rebuild_leaves_new_slot_idle() {
        let reg = registry(&["a"]);
        let old = reg.begin_fetch("a").unwrap();
        let mut groups = LayerDocument::new();
        groups.insert("g".into(), vec![crate::config::AxisEntry::named("a")]);
        reg.bootstrap(&merge(&[ConfigLayer {
            source: LayerSource::Defaults,
            path: None,
            groups,
        }]));
        assert!(!reg.get("a").unwrap().polling);

        let live = reg.begin_fetch("a").unwrap();
        assert_ne!(live.generation, old.generation);
        assert!(matches!(
            reg.apply_update("a", old, reading(1)).unwrap(),
            UpdateResult::Stale
        ));
        assert!(reg.get("a").unwrap().polling);
        reg.apply_update("a", live, reading(2)).unwrap();
        let s = reg.get("a").unwrap();
        assert!(!s.polling);
        assert_eq!(s.position_pulse, Some(2));
    }

    #[test]
    fn idle_at_target_clears_target() {
        let reg = registry(&["a"]);
        reg.note_command("a", Some(50)).unwrap();
        assert_eq!(reg.get("a").unwrap().target_pulse, Some(50));
        let t = reg.begin_fetch("a").unwrap();
        reg.apply_update("a", t, reading(50)).unwrap();
        assert!(reg.get("a").unwrap().target_pulse.is_none());
    }
}
