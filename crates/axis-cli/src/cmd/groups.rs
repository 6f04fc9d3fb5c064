use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{print_json, print_table};
use std::path::Path;

// ---------------------------------------------------------------------------
// groups
// ---------------------------------------------------------------------------

pub fn list(root: &Path, link: &LinkArgs, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let groups = console.groups();

        if json {
            return print_json(&groups);
        }
        if groups.is_empty() {
            println!("No groups.");
            return Ok(());
        }
        let rows = groups
            .iter()
            .map(|g| {
                vec![
                    g.name.clone(),
                    g.source.to_string(),
                    g.axes.len().to_string(),
                ]
            })
            .collect();
        print_table(&["GROUP", "SOURCE", "AXES"], rows);
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

pub fn show(root: &Path, link: &LinkArgs, group: &str, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let config = console.config();
        let def = config.group(group)?;
        let axes = def
            .axes
            .iter()
            .map(|name| config.axis(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        if json {
            let value = serde_json::json!({
                "group": def,
                "axes": axes,
            });
            return print_json(&value);
        }

        println!("{} ({})", def.name, def.source);
        let rows = axes
            .iter()
            .map(|a| {
                vec![
                    a.name.clone(),
                    a.display.clone(),
                    a.unit.to_string(),
                    a.val2pulse.to_string(),
                    a.sense.sign().to_string(),
                ]
            })
            .collect();
        print_table(&["AXIS", "DISPLAY", "UNIT", "VAL2PULSE", "SENSE"], rows);
        Ok(())
    })
}
