use super::{ControllerLink, ControllerState, Reading};
use crate::error::{AxisError, ErrorKind, Result};
use crate::types::{Axis, LimitFlags};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

/// In-process controller for `--simulate` and tests.
///
/// Axes spring into existence at pulse 0 on first use. A move lands
/// immediately; with `set_settle_polls(n)` the axis reports `Moving` for the
/// next `n` fetches first.
#[derive(Default)]
pub struct SimulatedLink {
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    axes: HashMap<String, SimAxis>,
    failures: HashMap<String, ErrorKind>,
    status_unsupported: HashSet<String>,
    holds: HashMap<String, VecDeque<Hold>>,
    fetch_counts: HashMap<String, u32>,
    puts: Vec<(String, i64)>,
    stops: Vec<String>,
    settle_polls: u32,
}

#[derive(Default)]
struct SimAxis {
    position: i64,
    moving_polls: u32,
    fault: bool,
    status_bits: u8,
}

struct Hold {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Handle on a fetch that has read the controller but not yet returned.
///
/// `started` fires once the reading is captured; the fetch completes when
/// `release` is sent or dropped.
pub struct HeldFetch {
    pub started: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
}

impl HeldFetch {
    pub async fn wait_started(&mut self) {
        let _ = (&mut self.started).await;
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_axis(self, name: &str, position_pulse: i64) -> Self {
        self.set_position(name, position_pulse);
        self
    }

    pub fn set_position(&self, name: &str, position_pulse: i64) {
        self.lock().axes.entry(name.to_string()).or_default().position = position_pulse;
    }

    pub fn position(&self, name: &str) -> Option<i64> {
        self.lock().axes.get(name).map(|a| a.position)
    }

    pub fn set_settle_polls(&self, polls: u32) {
        self.lock().settle_polls = polls;
    }

    pub fn set_fault(&self, name: &str, fault: bool) {
        self.lock().axes.entry(name.to_string()).or_default().fault = fault;
    }

    pub fn set_status_bits(&self, name: &str, bits: u8) {
        self.lock().axes.entry(name.to_string()).or_default().status_bits = bits;
    }

    /// Every call on `name` fails with `kind` until cleared.
    pub fn fail_axis(&self, name: &str, kind: ErrorKind) {
        self.lock().failures.insert(name.to_string(), kind);
    }

    pub fn clear_failure(&self, name: &str) {
        self.lock().failures.remove(name);
    }

    /// Status queries on `name` fail as if the axis did not support them.
    pub fn disable_status(&self, name: &str) {
        self.lock().status_unsupported.insert(name.to_string());
    }

    /// Park the next fetch of `name` after it has read the position.
    pub fn hold_next_fetch(&self, name: &str) -> HeldFetch {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.lock()
            .holds
            .entry(name.to_string())
            .or_default()
            .push_back(Hold {
                started: started_tx,
                release: release_rx,
            });
        HeldFetch {
            started: started_rx,
            release: release_tx,
        }
    }

    pub fn fetch_count(&self, name: &str) -> u32 {
        self.lock().fetch_counts.get(name).copied().unwrap_or(0)
    }

    pub fn puts(&self) -> Vec<(String, i64)> {
        self.lock().puts.clone()
    }

    pub fn last_put(&self, name: &str) -> Option<i64> {
        self.lock()
            .puts
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, p)| *p)
    }

    pub fn stop_count(&self, name: &str) -> usize {
        self.lock().stops.iter().filter(|n| *n == name).count()
    }
}

fn injected(axis: &Axis, operation: &str, kind: ErrorKind) -> AxisError {
    match kind {
        ErrorKind::LinkTimeout => AxisError::LinkTimeout {
            axis: axis.name.clone(),
            operation: operation.to_string(),
        },
        ErrorKind::LinkRefused => AxisError::LinkRefused {
            endpoint: "simulated".to_string(),
            reason: "connection refused".to_string(),
        },
        ErrorKind::Rejected => AxisError::Rejected {
            axis: axis.name.clone(),
            operation: operation.to_string(),
            reply: format!("put/sim_{}/ng/-1", axis.name),
        },
        other => AxisError::ProtocolError {
            axis: axis.name.clone(),
            reason: format!("injected {other}"),
        },
    }
}

impl SimState {
    fn check(&self, axis: &Axis, operation: &str) -> Result<()> {
        match self.failures.get(&axis.name) {
            Some(&kind) => Err(injected(axis, operation, kind)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControllerLink for SimulatedLink {
    async fn fetch_state_and_position(&self, axis: &Axis) -> Result<Reading> {
        let (reading, hold) = {
            let mut st = self.lock();
            *st.fetch_counts.entry(axis.name.clone()).or_default() += 1;
            st.check(axis, "query")?;
            let sim = st.axes.entry(axis.name.clone()).or_default();
            let state = if sim.fault {
                ControllerState::Fault
            } else if sim.moving_polls > 0 {
                sim.moving_polls -= 1;
                ControllerState::Moving
            } else {
                ControllerState::Idle
            };
            let reading = Reading {
                state,
                position_pulse: sim.position,
            };
            let hold = st.holds.get_mut(&axis.name).and_then(VecDeque::pop_front);
            (reading, hold)
        };
        if let Some(hold) = hold {
            let _ = hold.started.send(());
            let _ = hold.release.await;
        }
        Ok(reading)
    }

    async fn put_position(&self, axis: &Axis, pulse: i64) -> Result<()> {
        let mut st = self.lock();
        st.check(axis, "move")?;
        st.puts.push((axis.name.clone(), pulse));
        let settle = st.settle_polls;
        let sim = st.axes.entry(axis.name.clone()).or_default();
        sim.position = pulse;
        sim.moving_polls = settle;
        Ok(())
    }

    async fn put_stop(&self, axis: &Axis) -> Result<()> {
        let mut st = self.lock();
        st.check(axis, "stop")?;
        st.stops.push(axis.name.clone());
        st.axes.entry(axis.name.clone()).or_default().moving_polls = 0;
        Ok(())
    }

    async fn fetch_status(&self, axis: &Axis) -> Result<LimitFlags> {
        let st = self.lock();
        st.check(axis, "status")?;
        if st.status_unsupported.contains(&axis.name) {
            return Err(AxisError::ProtocolError {
                axis: axis.name.clone(),
                reason: "status query not supported".to_string(),
            });
        }
        let bits = st.axes.get(&axis.name).map(|a| a.status_bits).unwrap_or(0);
        Ok(LimitFlags::from_bits(bits))
    }
}
