use crate::cmd::{load_settings, LinkArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use axis_core::config::{ConfigSources, ConfigStore, WarnLevel};
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective settings, endpoint, and config layer files
    Show,

    /// Validate settings and axis configuration for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, link: &LinkArgs, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, link, json),
        ConfigSubcommand::Validate => validate(root, link, json),
    }
}

fn store_for(settings: &axis_core::settings::Settings) -> ConfigStore {
    ConfigStore::new(ConfigSources::in_root(
        &settings.root,
        Some(settings.hardware_config_path()),
    ))
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, link: &LinkArgs, json: bool) -> anyhow::Result<()> {
    let settings = load_settings(root, link)?;
    let store = store_for(&settings);
    let merged = store.load_all().context("failed to load axis configuration")?;
    let endpoint = settings.controller.endpoint(&merged.network);
    let sources = store.sources();

    if json {
        let value = serde_json::json!({
            "root": settings.root,
            "settings": settings,
            "endpoint": {
                "host": endpoint.host,
                "port": endpoint.port,
                "bl_object": endpoint.bl_object,
            },
            "files": {
                "defaults": sources.defaults,
                "hardware": sources.hardware,
                "favorites": sources.favorites,
                "log_dir": settings.log_dir(),
            },
            "groups": merged.groups.len(),
            "axes": merged.axes.len(),
        });
        return print_json(&value);
    }

    let hardware = sources
        .hardware
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    let rows = vec![
        vec!["root".to_string(), settings.root.display().to_string()],
        vec!["endpoint".to_string(), endpoint.to_string()],
        vec!["bl_object".to_string(), endpoint.bl_object.clone()],
        vec![
            "timeout".to_string(),
            format!("{} ms", settings.controller.timeout_ms),
        ],
        vec![
            "poll interval".to_string(),
            format!("{} ms", settings.polling.interval_ms),
        ],
        vec!["defaults".to_string(), sources.defaults.display().to_string()],
        vec!["hardware".to_string(), hardware],
        vec!["favorites".to_string(), sources.favorites.display().to_string()],
        vec!["log dir".to_string(), settings.log_dir().display().to_string()],
        vec![
            "axes".to_string(),
            format!("{} in {} groups", merged.axes.len(), merged.groups.len()),
        ],
    ];
    print_table(&["KEY", "VALUE"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, link: &LinkArgs, json: bool) -> anyhow::Result<()> {
    let settings = load_settings(root, link)?;
    let mut warnings = settings.validate();
    let merged = store_for(&settings)
        .load_all()
        .context("failed to load axis configuration")?;
    warnings.extend(merged.warnings);

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            match &w.axis {
                Some(axis) => println!("[{prefix}] {axis}: {}", w.message),
                None => println!("[{prefix}] {}", w.message),
            }
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}
