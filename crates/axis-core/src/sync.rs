//! The polling loop.
//!
//! One cycle fetches every known axis concurrently and publishes results into
//! the registry. Ordering against commands is the registry's job (tickets),
//! so the loop never pauses for a command and a slow axis never holds up the
//! others.

use crate::error::{ErrorKind, Result};
use crate::link::ControllerLink;
use crate::registry::{AxisRegistry, AxisSnapshot, FetchOutcome, UpdateResult};
use crate::settings::PollingSettings;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    AxisUpdated {
        snapshot: AxisSnapshot,
    },
    PollFailed {
        axis: String,
        kind: ErrorKind,
        consecutive: u32,
    },
    /// Emitted at the failure threshold and every multiple of it.
    AxisDegraded {
        axis: String,
        kind: ErrorKind,
        consecutive: u32,
    },
    CycleCompleted {
        cycle: u64,
        polled: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub polled: usize,
    pub failed: usize,
    pub stale: usize,
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

struct Inner {
    registry: Arc<AxisRegistry>,
    link: Arc<dyn ControllerLink>,
    settings: PollingSettings,
    events: broadcast::Sender<SyncEvent>,
    cycles: AtomicU64,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<AxisRegistry>,
        link: Arc<dyn ControllerLink>,
        settings: PollingSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry,
                link,
                settings,
                events,
                cycles: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<AxisRegistry> {
        &self.inner.registry
    }

    pub fn link(&self) -> &Arc<dyn ControllerLink> {
        &self.inner.link
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Fetch one axis and apply the result. Link failures are recorded on
    /// the axis, not returned; only an unknown axis is an error here.
    pub async fn poll_axis(&self, name: &str) -> Result<UpdateResult> {
        let registry = &self.inner.registry;
        let axis = registry.axis(name)?;
        let ticket = registry.begin_fetch(name)?;

        let outcome = match self.inner.link.fetch_state_and_position(&axis).await {
            Ok(reading) => FetchOutcome::Reading(reading),
            Err(e) => {
                tracing::debug!(axis = name, error = %e, "poll failed");
                FetchOutcome::Failed(e.kind())
            }
        };

        let mut result = registry.apply_update(name, ticket, outcome)?;
        let consecutive = match &result {
            UpdateResult::Applied(snapshot) => snapshot.consecutive_failures,
            UpdateResult::Stale => return Ok(result),
        };

        match outcome {
            FetchOutcome::Reading(_) => {
                if registry.status_polling_enabled(name) {
                    match self.inner.link.fetch_status(&axis).await {
                        Ok(limits) => {
                            registry.set_limits(name, limits)?;
                            result = UpdateResult::Applied(registry.get(name)?);
                        }
                        Err(e) => {
                            tracing::warn!(
                                axis = name,
                                error = %e,
                                "status query failed; limit polling disabled for this axis"
                            );
                            registry.disable_status_polling(name)?;
                        }
                    }
                }
                if let UpdateResult::Applied(snapshot) = &result {
                    self.publish(SyncEvent::AxisUpdated {
                        snapshot: snapshot.clone(),
                    });
                }
            }
            FetchOutcome::Failed(kind) => {
                self.publish(SyncEvent::PollFailed {
                    axis: name.to_string(),
                    kind,
                    consecutive,
                });
                let threshold = self.inner.settings.failure_report_threshold;
                if threshold > 0 && consecutive % threshold == 0 {
                    tracing::warn!(
                        axis = name,
                        kind = %kind,
                        consecutive,
                        "axis keeps failing to poll"
                    );
                    self.publish(SyncEvent::AxisDegraded {
                        axis: name.to_string(),
                        kind,
                        consecutive,
                    });
                }
            }
        }
        Ok(result)
    }

    /// One sweep over every known axis, all fetched concurrently.
    pub async fn poll_cycle(&self) -> CycleReport {
        let mut report = self.poll_axes(self.inner.registry.names()).await;
        report.cycle = self.inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(SyncEvent::CycleCompleted {
            cycle: report.cycle,
            polled: report.polled,
            failed: report.failed,
        });
        report
    }

    /// Poll just `names`, concurrently. Not counted as a cycle.
    pub async fn poll_axes<I>(&self, names: I) -> CycleReport
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = JoinSet::new();
        for name in names {
            let engine = self.clone();
            set.spawn(async move { engine.poll_axis(&name).await });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(UpdateResult::Applied(snapshot))) => {
                    report.polled += 1;
                    if snapshot.last_error.is_some() {
                        report.failed += 1;
                    }
                }
                Ok(Ok(UpdateResult::Stale)) => {
                    report.polled += 1;
                    report.stale += 1;
                }
                // Axis vanished in a reload mid-cycle.
                Ok(Err(e)) => tracing::debug!(error = %e, "poll skipped"),
                Err(e) => tracing::warn!(error = %e, "poll task panicked"),
            }
        }
        report
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. Must be called inside a tokio runtime.
    pub fn start(&self) -> SyncHandle {
        let (shutdown, mut rx) = watch::channel(false);
        let engine = self.clone();
        let interval = self.inner.settings.interval();
        let task = tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "poll loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = ticker.tick() => {
                        // Dropping the cycle aborts its JoinSet, which drops
                        // every in-flight fetch and its connection.
                        tokio::select! {
                            _ = rx.changed() => break,
                            _ = engine.poll_cycle() => {}
                        }
                    }
                }
            }
            tracing::info!("poll loop stopped");
        });
        SyncHandle { shutdown, task }
    }
}

// ---------------------------------------------------------------------------
// SyncHandle
// ---------------------------------------------------------------------------

/// Running poll loop. Dropping the handle also stops the loop, but without
/// waiting for it.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop, abandon the in-flight cycle, and wait for the task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "poll loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{merge, AxisEntry, ConfigLayer, LayerDocument};
    use crate::link::SimulatedLink;
    use crate::types::{LayerSource, MotionState};
    use std::time::Duration;

    fn setup(names: &[&str], link: Arc<SimulatedLink>) -> SyncEngine {
        let mut groups = LayerDocument::new();
        groups.insert(
            "g".into(),
            names.iter().map(|n| AxisEntry::named(*n)).collect(),
        );
        let registry = Arc::new(AxisRegistry::new());
        registry.bootstrap(&merge(&[ConfigLayer {
            source: LayerSource::Defaults,
            path: None,
            groups,
        }]));
        let settings = PollingSettings {
            interval_ms: 20,
            failure_report_threshold: 2,
        };
        SyncEngine::new(registry, link, settings)
    }

    #[tokio::test]
    async fn cycle_polls_every_axis() {
        let link = Arc::new(SimulatedLink::new().with_axis("a", 1).with_axis("b", 2));
        let engine = setup(&["a", "b"], link.clone());
        let report = engine.poll_cycle().await;
        assert_eq!(report.polled, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.cycle, 1);
        assert_eq!(engine.registry().get("b").unwrap().position_pulse, Some(2));
        assert_eq!(engine.registry().get("a").unwrap().status, MotionState::Idle);
    }

    #[tokio::test]
    async fn partial_poll_is_not_a_cycle() {
        let link = Arc::new(SimulatedLink::new().with_axis("a", 1).with_axis("b", 2));
        let engine = setup(&["a", "b"], link.clone());
        let report = engine.poll_axes(vec!["b".to_string()]).await;
        assert_eq!(report.polled, 1);
        assert_eq!(engine.cycles(), 0);
        assert_eq!(link.fetch_count("a"), 0);
        assert_eq!(engine.registry().get("b").unwrap().position_pulse, Some(2));
    }

    #[tokio::test]
    async fn status_failure_disables_limit_polling_only() {
        let link = Arc::new(SimulatedLink::new());
        link.disable_status("a");
        let engine = setup(&["a"], link.clone());
        engine.poll_axis("a").await.unwrap();
        assert!(!engine.registry().status_polling_enabled("a"));
        link.set_position("a", 77);
        engine.poll_axis("a").await.unwrap();
        let s = engine.registry().get("a").unwrap();
        assert_eq!(s.position_pulse, Some(77));
        assert!(s.limits.is_none());
    }

    #[tokio::test]
    async fn repeated_failures_emit_degraded() {
        let link = Arc::new(SimulatedLink::new());
        link.fail_axis("a", ErrorKind::LinkRefused);
        let engine = setup(&["a"], link.clone());
        let mut rx = engine.subscribe();
        for _ in 0..4 {
            engine.poll_axis("a").await.unwrap();
        }
        let mut degraded = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let SyncEvent::AxisDegraded { consecutive, .. } = ev {
                degraded.push(consecutive);
            }
        }
        assert_eq!(degraded, vec![2, 4]);
    }

    #[tokio::test]
    async fn loop_runs_and_stops() {
        let link = Arc::new(SimulatedLink::new());
        let engine = setup(&["a"], link.clone());
        let handle = engine.start();
        assert!(handle.is_running());
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.shutdown().await;
        let polled = link.fetch_count("a");
        assert!(polled >= 2, "polled {polled} times");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(link.fetch_count("a"), polled);
    }

    #[tokio::test]
    async fn shutdown_abandons_held_fetch() {
        let link = Arc::new(SimulatedLink::new());
        let mut held = link.hold_next_fetch("a");
        let engine = setup(&["a"], link.clone());
        let handle = engine.start();
        held.wait_started().await;
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown does not wait for the held fetch");
        assert!(engine.registry().get("a").unwrap().position_pulse.is_none());
    }
}
