pub mod config;
pub mod favorite;
pub mod groups;
pub mod log;
pub mod motion;
pub mod probe;
pub mod status;
pub mod watch;

use anyhow::Context;
use axis_core::link::SimulatedLink;
use axis_core::settings::Settings;
use axis_core::Console;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SIMULATED_SETTLE_POLLS: u32 = 2;

/// Global flags that decide where the controller is and how to reach it.
pub struct LinkArgs {
    pub hardware_config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub simulate: bool,
}

/// Settings file under `root`, with command-line overrides applied on top.
pub fn load_settings(root: &Path, link: &LinkArgs) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(root).context("failed to load settings")?;
    if let Some(path) = &link.hardware_config {
        // Flags are relative to where the operator typed them, not the root.
        let path = if path.is_relative() {
            std::env::current_dir()?.join(path)
        } else {
            path.clone()
        };
        settings.files.hardware_config = Some(path);
    }
    if let Some(host) = &link.host {
        settings.controller.host = Some(host.clone());
    }
    if let Some(port) = link.port {
        settings.controller.port = Some(port);
    }
    Ok(settings)
}

pub fn open_console(root: &Path, link: &LinkArgs) -> anyhow::Result<Console> {
    let settings = load_settings(root, link)?;
    let console = if link.simulate {
        let sim = SimulatedLink::new();
        // Report a couple of moving polls after each move, like real hardware.
        sim.set_settle_polls(SIMULATED_SETTLE_POLLS);
        Console::open(settings, Arc::new(sim))
    } else {
        Console::open_tcp(settings)
    }
    .context("failed to load axis configuration")?;

    tracing::debug!(
        endpoint = %console.endpoint(),
        simulate = link.simulate,
        axes = console.registry().len(),
        "console ready"
    );
    Ok(console)
}

/// Block on `fut` inside a fresh runtime.
pub fn block_on<F, T>(fut: F) -> anyhow::Result<T>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}
