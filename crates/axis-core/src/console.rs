use crate::config::{ConfigSources, ConfigStore, ConfigWarning, MergedConfig};
use crate::dispatch::CommandDispatcher;
use crate::error::Result;
use crate::link::{ControllerLink, TcpLink};
use crate::logbook::Logbook;
use crate::registry::{AxisRegistry, AxisSnapshot};
use crate::settings::{Endpoint, Settings};
use crate::sync::{CycleReport, SyncEngine, SyncEvent, SyncHandle};
use crate::types::AxisGroup;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Everything the presentation layer talks to: read-only snapshots, an
/// event stream, and the dispatcher as the only way to change anything.
pub struct Console {
    settings: Settings,
    endpoint: Endpoint,
    engine: SyncEngine,
    dispatcher: Arc<CommandDispatcher>,
    polling: Mutex<Option<SyncHandle>>,
}

impl Console {
    /// Load and merge configuration, build the registry, and wire the
    /// components around the link produced by `make_link`. Fails only when
    /// the defaults layer cannot be loaded.
    pub fn open_with<F>(settings: Settings, make_link: F) -> Result<Self>
    where
        F: FnOnce(&Endpoint) -> Arc<dyn ControllerLink>,
    {
        let sources = ConfigSources::in_root(&settings.root, Some(settings.hardware_config_path()));
        let store = ConfigStore::new(sources);
        let merged = Arc::new(store.load_all()?);
        let endpoint = settings.controller.endpoint(&merged.network);
        tracing::info!(endpoint = %endpoint, bl_object = %endpoint.bl_object, "controller endpoint");

        let registry = Arc::new(AxisRegistry::new());
        registry.bootstrap(&merged);
        let link = make_link(&endpoint);
        let engine = SyncEngine::new(registry, link, settings.polling.clone());
        let dispatcher = Arc::new(CommandDispatcher::new(
            engine.clone(),
            store,
            Logbook::new(settings.log_dir()),
            settings.commands.clone(),
            merged,
        ));

        Ok(Self {
            settings,
            endpoint,
            engine,
            dispatcher,
            polling: Mutex::new(None),
        })
    }

    pub fn open(settings: Settings, link: Arc<dyn ControllerLink>) -> Result<Self> {
        Self::open_with(settings, move |_| link)
    }

    /// Talk to the real controller over TCP.
    pub fn open_tcp(settings: Settings) -> Result<Self> {
        let timeout = settings.controller.timeout();
        Self::open_with(settings, move |endpoint| {
            Arc::new(TcpLink::new(endpoint.clone(), timeout)) as Arc<dyn ControllerLink>
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> Arc<MergedConfig> {
        self.dispatcher.config()
    }

    pub fn warnings(&self) -> Vec<ConfigWarning> {
        self.config().warnings.clone()
    }

    pub fn groups(&self) -> Vec<AxisGroup> {
        self.config().groups.values().cloned().collect()
    }

    pub fn registry(&self) -> &Arc<AxisRegistry> {
        self.engine.registry()
    }

    /// Snapshot of every axis in `group`, in group order.
    pub fn snapshot(&self, group: &str) -> Result<Vec<AxisSnapshot>> {
        let config = self.config();
        config
            .group(group)?
            .axes
            .iter()
            .map(|name| self.registry().get(name))
            .collect()
    }

    pub fn snapshot_axis(&self, name: &str) -> Result<AxisSnapshot> {
        self.registry().get(name)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Run a single poll cycle and wait for it.
    pub async fn poll_once(&self) -> CycleReport {
        self.engine.poll_cycle().await
    }

    /// Start the background poll loop. A second call is a no-op.
    pub fn start_polling(&self) {
        let mut slot = self.polling.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(SyncHandle::is_running) {
            return;
        }
        *slot = Some(self.engine.start());
    }

    pub fn is_polling(&self) -> bool {
        self.polling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(SyncHandle::is_running)
    }

    /// Reload every layer, rebuild the registry, and refill it with one
    /// cycle before returning.
    pub async fn reload(&self) -> Result<Arc<MergedConfig>> {
        let merged = self.dispatcher.reload()?;
        self.engine.poll_cycle().await;
        Ok(merged)
    }

    /// Stop the poll loop, abandoning any fetch in flight.
    pub async fn shutdown(&self) {
        let handle = self
            .polling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AxisError;
    use crate::link::SimulatedLink;
    use crate::paths;
    use crate::types::MotionState;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let mut s = Settings::in_root(dir.path());
        s.files.hardware_config = Some("bss.config".into());
        s.polling.interval_ms = 20;
        s
    }

    #[test]
    fn open_fails_without_defaults() {
        let dir = TempDir::new().unwrap();
        let err = Console::open(settings(&dir), Arc::new(SimulatedLink::new()))
            .err()
            .unwrap();
        assert!(matches!(err, AxisError::ConfigLoadFatal { .. }));
    }

    #[tokio::test]
    async fn endpoint_comes_from_hardware_blob() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::defaults_path(dir.path()), "g:\n  - name: a\n").unwrap();
        std::fs::write(
            dir.path().join("bss.config"),
            "Ms_IP: 10.1.2.3\nBL_Object: 45xu\n_axis_begin\n_axis_name: b\n_axis_end\n",
        )
        .unwrap();
        let console = Console::open_tcp(settings(&dir)).unwrap();
        assert_eq!(console.endpoint().host, "10.1.2.3");
        assert_eq!(console.endpoint().bl_object, "bl_45xu");
        let names: Vec<_> = console.groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["all", "g"]);
    }

    #[tokio::test]
    async fn polling_fills_snapshots_and_stops() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::defaults_path(dir.path()), "g:\n  - name: a\n  - name: b\n").unwrap();
        let link = Arc::new(SimulatedLink::new().with_axis("a", 5).with_axis("b", 6));
        let console = Console::open(settings(&dir), link.clone()).unwrap();
        assert!(!console.warnings().is_empty(), "missing bss.config is reported");

        console.start_polling();
        console.start_polling();
        assert!(console.is_polling());
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        console.shutdown().await;
        assert!(!console.is_polling());

        let snap = console.snapshot("g").unwrap();
        assert_eq!(snap[0].position_pulse, Some(5));
        assert_eq!(snap[1].status, MotionState::Idle);
        assert!(console.snapshot("nope").is_err());
    }
}
