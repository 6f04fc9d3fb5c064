use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use axis_core::types::LayerSource;
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum FavoriteSubcommand {
    /// Save AXES as group GROUP in the favorites file, replacing any group of that name
    Save {
        group: String,
        #[arg(required = true, num_args = 1..)]
        axes: Vec<String>,
    },

    /// List groups that come from the favorites file
    List,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    link: &LinkArgs,
    subcmd: FavoriteSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        FavoriteSubcommand::Save { group, axes } => save(root, link, &group, &axes, json),
        FavoriteSubcommand::List => list(root, link, json),
    }
}

fn save(root: &Path, link: &LinkArgs, group: &str, axes: &[String], json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let merged = console
            .dispatcher()
            .save_favorite(group, axes)
            .await
            .with_context(|| format!("failed to save favorite group '{group}'"))?;
        let saved = merged.group(group)?;

        if json {
            return print_json(saved);
        }
        println!("Saved '{}' with {} axes.", saved.name, saved.axes.len());
        Ok(())
    })
}

fn list(root: &Path, link: &LinkArgs, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let favorites: Vec<_> = console
            .groups()
            .into_iter()
            .filter(|g| g.source == LayerSource::Favorites)
            .collect();

        if json {
            return print_json(&favorites);
        }
        if favorites.is_empty() {
            println!("No favorite groups.");
            return Ok(());
        }
        let rows = favorites
            .iter()
            .map(|g| vec![g.name.clone(), g.axes.join(" ")])
            .collect();
        print_table(&["GROUP", "AXES"], rows);
        Ok(())
    })
}
