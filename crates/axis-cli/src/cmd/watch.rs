use crate::cmd::status::axis_names;
use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{format_limits, format_position, format_state, print_json_line};
use axis_core::registry::AxisSnapshot;
use axis_core::sync::SyncEvent;
use axis_core::types::{LimitFlags, MotionState};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;

/// What a line was last printed for; only changes are printed again.
#[derive(PartialEq)]
struct Shown {
    position: Option<i64>,
    status: MotionState,
    limits: Option<LimitFlags>,
    failing: bool,
}

impl Shown {
    fn of(s: &AxisSnapshot) -> Self {
        Self {
            position: s.position_pulse,
            status: s.status,
            limits: s.limits,
            failing: s.last_error.is_some(),
        }
    }
}

pub fn run(
    root: &Path,
    link: &LinkArgs,
    group: Option<&str>,
    cycles: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let filter: Option<HashSet<String>> = match group {
            Some(_) => Some(axis_names(&console, group)?.into_iter().collect()),
            None => None,
        };
        let wanted = |axis: &str| filter.as_ref().map_or(true, |f| f.contains(axis));

        let mut events = console.subscribe();
        console.start_polling();
        tracing::info!(endpoint = %console.endpoint(), "watching; press Ctrl-C to stop");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut shown: HashMap<String, Shown> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = &mut ctrl_c => break,
                event = events.recv() => event,
            };
            let event = match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind; some updates were dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let done = matches!(
                event,
                SyncEvent::CycleCompleted { cycle, .. } if cycles.is_some_and(|n| cycle >= n)
            );

            match &event {
                SyncEvent::AxisUpdated { snapshot } if wanted(snapshot.name()) => {
                    if json {
                        print_json_line(&event)?;
                    } else {
                        let now = Shown::of(snapshot);
                        if shown.get(snapshot.name()) != Some(&now) {
                            print_update(snapshot);
                            shown.insert(snapshot.name().to_string(), now);
                        }
                    }
                }
                SyncEvent::PollFailed {
                    axis,
                    kind,
                    consecutive,
                } if wanted(axis) => {
                    if json {
                        print_json_line(&event)?;
                    } else if *consecutive == 1 {
                        println!("{}  {axis}: poll failed ({kind})", timestamp());
                        if let Some(s) = shown.get_mut(axis) {
                            s.failing = true;
                        }
                    }
                }
                SyncEvent::AxisDegraded {
                    axis,
                    kind,
                    consecutive,
                } if wanted(axis) => {
                    if json {
                        print_json_line(&event)?;
                    } else {
                        println!(
                            "{}  {axis}: still failing after {consecutive} polls ({kind})",
                            timestamp()
                        );
                    }
                }
                SyncEvent::CycleCompleted { .. } if json => print_json_line(&event)?,
                _ => {}
            }

            if done {
                break;
            }
        }

        console.shutdown().await;
        Ok(())
    })
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

fn print_update(s: &AxisSnapshot) {
    println!(
        "{}  {:<16} {:>16}  {:<8} {}",
        timestamp(),
        s.axis.name,
        format_position(s),
        format_state(s),
        format_limits(s.limits.as_ref()),
    );
}
