use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{format_value, print_json, print_table};
use anyhow::Context;
use std::path::Path;

/// Refresh the group's axes, then append one entry per axis.
pub fn run(root: &Path, link: &LinkArgs, group: &str, comment: &str, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let axes = console.config().group(group)?.axes.clone();
        console.engine().poll_axes(axes).await;

        let receipt = console
            .dispatcher()
            .append_log(group, comment)
            .with_context(|| format!("failed to log group '{group}'"))?;

        if json {
            return print_json(&receipt);
        }
        let rows = receipt
            .entries
            .iter()
            .map(|e| {
                vec![
                    e.axis_name.clone(),
                    e.position
                        .map(|p| format_value(p, e.unit))
                        .unwrap_or_else(|| "ERROR".to_string()),
                ]
            })
            .collect();
        print_table(&["AXIS", "POSITION"], rows);
        println!();
        println!(
            "Logged {} axes to {}",
            receipt.entries.len(),
            receipt.path.display()
        );
        Ok(())
    })
}
