//! Typed lifecycle events, fanned out to UI observers as JSON-RPC 2.0
//! notification strings.

use crate::model::{Automation, AutomationRun};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Everything the daemon announces about automations and their runs. Each
/// variant maps to one notification method; record-carrying variants ship
/// the full updated record as params.
#[derive(Debug, Clone)]
pub enum AutomationEvent {
    Created { workspace_id: String, automation: Automation },
    Updated { workspace_id: String, automation: Automation },
    Deleted { workspace_id: String, automation_id: String },
    Enabled { workspace_id: String, automation: Automation },
    Disabled { workspace_id: String, automation: Automation },
    RunStarted { workspace_id: String, run: AutomationRun },
    RunCompleted { workspace_id: String, run: AutomationRun },
    RunFailed { workspace_id: String, run: AutomationRun },
    RunCancelled { workspace_id: String, run: AutomationRun },
    /// Aggregate fields on some automation changed; observers re-list.
    ListChanged { workspace_id: String },
}

impl AutomationEvent {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Created { .. } => "automation.created",
            Self::Updated { .. } => "automation.updated",
            Self::Deleted { .. } => "automation.deleted",
            Self::Enabled { .. } => "automation.enabled",
            Self::Disabled { .. } => "automation.disabled",
            Self::RunStarted { .. } => "automation.runStarted",
            Self::RunCompleted { .. } => "automation.runCompleted",
            Self::RunFailed { .. } => "automation.runFailed",
            Self::RunCancelled { .. } => "automation.runCancelled",
            Self::ListChanged { .. } => "automation.listChanged",
        }
    }

    fn params(&self) -> Value {
        match self {
            Self::Created { workspace_id, automation }
            | Self::Updated { workspace_id, automation }
            | Self::Enabled { workspace_id, automation }
            | Self::Disabled { workspace_id, automation } => {
                json!({ "workspaceId": workspace_id, "automation": automation })
            }
            Self::Deleted { workspace_id, automation_id } => {
                json!({ "workspaceId": workspace_id, "automationId": automation_id })
            }
            Self::RunStarted { workspace_id, run }
            | Self::RunCompleted { workspace_id, run }
            | Self::RunFailed { workspace_id, run }
            | Self::RunCancelled { workspace_id, run } => {
                json!({ "workspaceId": workspace_id, "run": run })
            }
            Self::ListChanged { workspace_id } => json!({ "workspaceId": workspace_id }),
        }
    }
}

/// Broadcasts [`AutomationEvent`]s to all connected UI observers.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Serialize and send one event to all observers.
    pub fn broadcast(&self, event: AutomationEvent) {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": event.method(),
            "params": event.params()
        });
        // Ignore errors — no subscribers is fine
        let _ = self
            .tx
            .send(serde_json::to_string(&notification).unwrap_or_default());
    }

    /// Subscribe to all broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
