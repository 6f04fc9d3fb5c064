use crate::cmd::status::print_snapshots;
use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{format_position, format_value, print_json};
use anyhow::Context;
use axis_core::dispatch::{CommandWarning, MoveOutcome};
use axis_core::registry::AxisSnapshot;
use axis_core::types::MotionState;
use axis_core::Console;
use std::path::Path;
use std::time::Duration;

/// Upper bound on `--wait`; a move still running after this is reported,
/// not cancelled.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// move
// ---------------------------------------------------------------------------

pub fn move_axis(
    root: &Path,
    link: &LinkArgs,
    axis: &str,
    value: f64,
    relative: bool,
    wait: bool,
    json: bool,
) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let dispatcher = console.dispatcher();

        let result = if relative {
            // A fresh process has no reading yet; take one for the base.
            console.engine().poll_axis(axis).await?;
            dispatcher.move_relative(axis, value).await
        } else {
            dispatcher.move_absolute(axis, value).await
        };
        let outcome = result.with_context(|| format!("move of '{axis}' failed"))?;

        let settled = if wait {
            Some(wait_for_settle(&console, axis).await?)
        } else {
            None
        };

        if json {
            let value = serde_json::json!({
                "move": outcome,
                "settled": settled,
            });
            return print_json(&value);
        }

        print_outcome(&outcome);
        if let Some(snapshot) = settled {
            if snapshot.status == MotionState::Idle {
                println!("Settled at {}.", format_position(&snapshot));
            } else {
                println!(
                    "Still {} at {} after {}s.",
                    snapshot.status,
                    format_position(&snapshot),
                    SETTLE_TIMEOUT.as_secs()
                );
            }
        }
        Ok(())
    })
}

fn print_outcome(outcome: &MoveOutcome) {
    println!(
        "{} -> {} ({} pulse)",
        outcome.axis,
        format_value(outcome.target_display, outcome.unit),
        outcome.target_pulse
    );
    for w in &outcome.warnings {
        match w {
            CommandWarning::PrecisionLoss { requested, applied } => {
                println!("[warning] {requested} rounded to {applied} pulse");
            }
            CommandWarning::StaleBase { age_ms } => {
                println!("[warning] offset applied to a reading {age_ms} ms old");
            }
        }
    }
}

/// Poll `axis` at the configured interval until it is idle with no
/// outstanding target, or until the settle timeout.
async fn wait_for_settle(console: &Console, axis: &str) -> anyhow::Result<AxisSnapshot> {
    let interval = console.settings().polling.interval();
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        tokio::time::sleep(interval).await;
        console.engine().poll_axis(axis).await?;
        let snapshot = console.snapshot_axis(axis)?;
        let settled = snapshot.status == MotionState::Idle && snapshot.target_pulse.is_none();
        if settled || snapshot.status == MotionState::Fault {
            return Ok(snapshot);
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(axis, "axis did not settle before timeout");
            return Ok(snapshot);
        }
    }
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

pub fn stop(root: &Path, link: &LinkArgs, axis: &str, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        console
            .dispatcher()
            .stop(axis)
            .await
            .with_context(|| format!("stop of '{axis}' failed"))?;

        // Report where it stopped.
        console.engine().poll_axis(axis).await?;
        let snapshot = console.snapshot_axis(axis)?;

        if json {
            return print_json(&snapshot);
        }
        println!("Stop sent to {axis}.");
        print_snapshots(std::slice::from_ref(&snapshot));
        Ok(())
    })
}
