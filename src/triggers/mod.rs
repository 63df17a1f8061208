//! Trigger Registry — one active subscription per enabled automation.
//!
//! Every trigger kind is normalized into the same fire signal: the automation
//! id, the kind that fired, and a free-form context payload describing what
//! happened. Registration is best-effort per automation; a kind that fails to
//! subscribe logs a warning and never blocks other automations.

pub mod clipboard;
pub mod fswatch;
pub mod hotkey;
pub mod lifecycle;
pub mod schedule;

use crate::host::HostBridge;
use crate::model::{Automation, TriggerKind};
use anyhow::Result;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, warn};

/// The normalized signal a trigger emits when its condition is met.
#[derive(Debug, Clone)]
pub struct FireEvent {
    pub workspace_id: String,
    pub automation_id: String,
    pub kind: TriggerKind,
    pub context: Value,
}

/// Injected callback invoked on every fire.
pub type FireFn = Arc<dyn Fn(FireEvent) + Send + Sync>;

/// Per-subscription fire hook: the registry pre-binds the automation identity
/// so kind modules only supply the context payload.
pub(crate) type ContextFire = Arc<dyn Fn(Value) + Send + Sync>;

/// Teardown capability for one subscription.
pub(crate) enum StopHandle {
    /// Background task; aborting it drops any timer or watch handle that was
    /// moved into it.
    Task(JoinHandle<()>),
    /// Host-bound accelerator; stopping unbinds it.
    Hotkey { accelerator: String },
}

struct RegisteredTrigger {
    kind: TriggerKind,
    stop: StopHandle,
}

/// Owns the automation-id → subscription table. At most one subscription per
/// automation; registering again replaces the previous one.
pub struct TriggerRegistry {
    triggers: RwLock<HashMap<String, RegisteredTrigger>>,
    fire: FireFn,
    host: Arc<dyn HostBridge>,
}

impl TriggerRegistry {
    pub fn new(host: Arc<dyn HostBridge>, fire: FireFn) -> Self {
        Self {
            triggers: RwLock::new(HashMap::new()),
            fire,
            host,
        }
    }

    /// Subscribe an enabled automation's trigger. Replaces any existing
    /// subscription for the same automation id first.
    pub async fn register(&self, automation: &Automation) {
        self.unregister(&automation.id).await;
        if !automation.enabled {
            debug!(automation_id = %automation.id, "not registering disabled automation");
            return;
        }

        let kind = automation.trigger.kind();
        let fire = self.context_fire(automation, kind);
        let started: Result<Option<StopHandle>> = match &automation.trigger {
            crate::model::TriggerConfig::Schedule {
                expression,
                timezone,
            } => schedule::start(expression, timezone.as_deref(), fire).map(Some),
            crate::model::TriggerConfig::FileChange {
                paths,
                patterns,
                event_kinds,
                debounce_ms,
            } => fswatch::start_file_change(paths, patterns, event_kinds, *debounce_ms, fire)
                .map(Some),
            crate::model::TriggerConfig::FolderWatch {
                folder,
                extensions,
                name_pattern,
                min_size_bytes,
                max_size_bytes,
            } => fswatch::start_folder_watch(
                folder,
                extensions,
                name_pattern.as_deref(),
                *min_size_bytes,
                *max_size_bytes,
                fire,
            )
            .map(Some),
            crate::model::TriggerConfig::Hotkey { accelerator } => {
                hotkey::start(self.host.as_ref(), accelerator, fire).map(Some)
            }
            crate::model::TriggerConfig::AppLifecycle { events } => {
                Ok(Some(lifecycle::start_app(self.host.as_ref(), events, fire)))
            }
            crate::model::TriggerConfig::PowerLifecycle { events } => Ok(Some(
                lifecycle::start_power(self.host.as_ref(), events, fire),
            )),
            crate::model::TriggerConfig::Clipboard {
                pattern,
                poll_interval_ms,
            } => clipboard::start(
                self.host.clone(),
                pattern.as_deref(),
                *poll_interval_ms,
                fire,
            )
            .map(Some),
            // Satisfied by the inbound-request dispatcher / direct API calls;
            // nothing to subscribe here.
            crate::model::TriggerConfig::Webhook { .. }
            | crate::model::TriggerConfig::DeepLink {}
            | crate::model::TriggerConfig::Manual {} => Ok(None),
        };

        match started {
            Ok(Some(stop)) => {
                debug!(automation_id = %automation.id, kind = kind.as_str(), "trigger registered");
                self.triggers
                    .write()
                    .await
                    .insert(automation.id.clone(), RegisteredTrigger { kind, stop });
            }
            Ok(None) => {
                debug!(
                    automation_id = %automation.id,
                    kind = kind.as_str(),
                    "trigger kind has no registry-side subscription"
                );
            }
            Err(e) => {
                // Isolated: one bad automation never blocks the others.
                warn!(
                    automation_id = %automation.id,
                    kind = kind.as_str(),
                    "trigger registration failed: {e:#}"
                );
            }
        }
    }

    /// Stop and remove an automation's subscription. No-op if absent.
    pub async fn unregister(&self, automation_id: &str) {
        let Some(registered) = self.triggers.write().await.remove(automation_id) else {
            return;
        };
        debug!(automation_id, kind = registered.kind.as_str(), "trigger unregistered");
        self.teardown(registered.stop);
    }

    /// Unregister every subscription. Used at process shutdown.
    pub async fn unregister_all(&self) {
        let drained: Vec<_> = self.triggers.write().await.drain().collect();
        for (automation_id, registered) in drained {
            debug!(automation_id = %automation_id, "trigger unregistered (shutdown)");
            self.teardown(registered.stop);
        }
    }

    pub async fn active_count(&self) -> usize {
        self.triggers.read().await.len()
    }

    pub async fn is_registered(&self, automation_id: &str) -> bool {
        self.triggers.read().await.contains_key(automation_id)
    }

    fn teardown(&self, stop: StopHandle) {
        match stop {
            StopHandle::Task(handle) => handle.abort(),
            StopHandle::Hotkey { accelerator } => {
                if let Err(e) = self.host.unbind_hotkey(&accelerator) {
                    // Already unbound is fine.
                    debug!(accelerator, "hotkey unbind: {e}");
                }
            }
        }
    }

    fn context_fire(&self, automation: &Automation, kind: TriggerKind) -> ContextFire {
        let fire = self.fire.clone();
        let workspace_id = automation.workspace_id.clone();
        let automation_id = automation.id.clone();
        Arc::new(move |context: Value| {
            fire(FireEvent {
                workspace_id: workspace_id.clone(),
                automation_id: automation_id.clone(),
                kind,
                context,
            });
        })
    }
}
