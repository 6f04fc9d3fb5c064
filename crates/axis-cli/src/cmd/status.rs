use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{format_limits, format_position, format_state, print_json, print_table};
use axis_core::registry::AxisSnapshot;
use axis_core::Console;
use std::path::Path;

pub fn run(root: &Path, link: &LinkArgs, group: Option<&str>, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let names = axis_names(&console, group)?;

        let report = console.engine().poll_axes(names.clone()).await;
        tracing::debug!(polled = report.polled, failed = report.failed, "status poll done");

        let snapshots = names
            .iter()
            .map(|n| console.snapshot_axis(n))
            .collect::<Result<Vec<_>, _>>()?;

        if json {
            return print_json(&snapshots);
        }
        print_snapshots(&snapshots);
        if report.failed > 0 {
            println!();
            println!("{} of {} axes could not be read.", report.failed, report.polled);
        }
        Ok(())
    })
}

/// Axes of `group` in panel order, or every known axis sorted by name.
pub fn axis_names(console: &Console, group: Option<&str>) -> anyhow::Result<Vec<String>> {
    match group {
        Some(g) => Ok(console.config().group(g)?.axes.clone()),
        None => Ok(console.registry().names()),
    }
}

pub fn print_snapshots(snapshots: &[AxisSnapshot]) {
    if snapshots.is_empty() {
        println!("No axes.");
        return;
    }
    let rows = snapshots
        .iter()
        .map(|s| {
            vec![
                s.axis.name.clone(),
                s.axis.display.clone(),
                format_position(s),
                s.position_pulse
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                format_state(s),
                format_limits(s.limits.as_ref()),
            ]
        })
        .collect();
    print_table(
        &["AXIS", "DISPLAY", "POSITION", "PULSE", "STATE", "LIMITS"],
        rows,
    );
}
