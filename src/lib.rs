pub mod config;
pub mod events;
pub mod exec;
pub mod host;
pub mod manager;
pub mod model;
pub mod store;
pub mod triggers;

use std::sync::Arc;

use config::DaemonConfig;
use events::EventBroadcaster;
use exec::ExecutionService;
use host::HostBridge;
use manager::AutomationManager;
use store::AutomationStore;
use tokio::sync::mpsc;
use triggers::{FireFn, TriggerRegistry};

/// Shared application state wired together at startup.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub store: Arc<AutomationStore>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub registry: Arc<TriggerRegistry>,
    pub manager: Arc<AutomationManager>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Construct and wire the whole orchestration stack: the registry's fire
    /// channel feeds the manager's dispatcher, and the manager consumes the
    /// execution service's notification stream.
    pub fn new(
        config: DaemonConfig,
        exec: Arc<dyn ExecutionService>,
        host: Arc<dyn HostBridge>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(AutomationStore::new());
        for workspace in &config.workspaces {
            store.register_workspace(&workspace.id, &workspace.root);
        }
        let broadcaster = Arc::new(EventBroadcaster::new());

        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let fire: FireFn = Arc::new(move |event| {
            // Receiver gone means the manager is shut down; drop the fire.
            let _ = fire_tx.send(event);
        });
        let registry = Arc::new(TriggerRegistry::new(host, fire));
        let manager = AutomationManager::new(
            config.clone(),
            store.clone(),
            exec,
            broadcaster.clone(),
            registry.clone(),
        );
        manager.start(fire_rx);

        Self {
            config,
            store,
            broadcaster,
            registry,
            manager,
            started_at: std::time::Instant::now(),
        }
    }
}
