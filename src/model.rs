//! Core record types: automations, trigger/action configs, and runs.
//!
//! These are the wire shapes too — everything serializes camelCase so the
//! same JSON goes to disk and out through the broadcaster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ─── Trigger configuration ───────────────────────────────────────────────────

/// Low-level filesystem event classes a file-change trigger can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FsEventKind {
    Create,
    Modify,
    Remove,
    Rename,
}

/// Host application lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppEvent {
    /// The host finished initializing. Fires synchronously at registration
    /// time — by construction triggers are only registered after startup.
    Ready,
    Activated,
    WindowAllClosed,
    BeforeQuit,
}

/// Host power lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerEvent {
    Suspend,
    Resume,
    OnAc,
    OnBattery,
    LockScreen,
    UnlockScreen,
}

impl AppEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Activated => "activated",
            Self::WindowAllClosed => "windowAllClosed",
            Self::BeforeQuit => "beforeQuit",
        }
    }
}

impl PowerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::OnAc => "onAc",
            Self::OnBattery => "onBattery",
            Self::LockScreen => "lockScreen",
            Self::UnlockScreen => "unlockScreen",
        }
    }
}

/// What fires an automation. Exactly one kind is active per automation;
/// changing kind replaces the whole config (no cross-kind field merging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerConfig {
    /// Recurrence expression evaluated in the given timezone.
    #[serde(rename_all = "camelCase")]
    Schedule {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Watch paths for changes, batched through a single debounce window.
    #[serde(rename_all = "camelCase")]
    FileChange {
        paths: Vec<PathBuf>,
        /// Glob patterns; empty = every path qualifies.
        #[serde(default)]
        patterns: Vec<String>,
        /// Allow-list of event kinds; empty = all kinds.
        #[serde(default)]
        event_kinds: Vec<FsEventKind>,
        /// Quiet period in ms before a flush (default 5000).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    /// Global accelerator, e.g. `CmdOrCtrl+Shift+K`.
    #[serde(rename_all = "camelCase")]
    Hotkey { accelerator: String },
    /// Satisfied by the inbound-request dispatcher, not the registry.
    #[serde(rename_all = "camelCase")]
    Webhook {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    /// Satisfied by the deep-link dispatcher, not the registry.
    DeepLink {},
    #[serde(rename_all = "camelCase")]
    AppLifecycle { events: Vec<AppEvent> },
    #[serde(rename_all = "camelCase")]
    PowerLifecycle { events: Vec<PowerEvent> },
    /// Poll the clipboard and fire on new content (optionally regex-gated).
    #[serde(rename_all = "camelCase")]
    Clipboard {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        /// Poll interval in ms (default 2000).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poll_interval_ms: Option<u64>,
    },
    /// Watch one folder for new entries only.
    #[serde(rename_all = "camelCase")]
    FolderWatch {
        folder: PathBuf,
        /// Extension allow-list without dots, e.g. `["pdf", "csv"]`.
        #[serde(default)]
        extensions: Vec<String>,
        /// Glob-like file name pattern, e.g. `invoice-*.pdf`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name_pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_size_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_size_bytes: Option<u64>,
    },
    /// API-initiated only; never registered.
    Manual {},
}

impl TriggerConfig {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Schedule { .. } => TriggerKind::Schedule,
            Self::FileChange { .. } => TriggerKind::FileChange,
            Self::Hotkey { .. } => TriggerKind::Hotkey,
            Self::Webhook { .. } => TriggerKind::Webhook,
            Self::DeepLink {} => TriggerKind::DeepLink,
            Self::AppLifecycle { .. } => TriggerKind::AppLifecycle,
            Self::PowerLifecycle { .. } => TriggerKind::PowerLifecycle,
            Self::Clipboard { .. } => TriggerKind::Clipboard,
            Self::FolderWatch { .. } => TriggerKind::FolderWatch,
            Self::Manual {} => TriggerKind::Manual,
        }
    }
}

/// Discriminant-only view of [`TriggerConfig`] — recorded on every run so the
/// outcome history shows what produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    Schedule,
    FileChange,
    Hotkey,
    Webhook,
    DeepLink,
    AppLifecycle,
    PowerLifecycle,
    Clipboard,
    FolderWatch,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::FileChange => "fileChange",
            Self::Hotkey => "hotkey",
            Self::Webhook => "webhook",
            Self::DeepLink => "deepLink",
            Self::AppLifecycle => "appLifecycle",
            Self::PowerLifecycle => "powerLifecycle",
            Self::Clipboard => "clipboard",
            Self::FolderWatch => "folderWatch",
            Self::Manual => "manual",
        }
    }
}

// ─── Action configuration ────────────────────────────────────────────────────

/// Permission level handed to the execution service when a work unit is
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

/// Execution policy for an automation's runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionConfig {
    /// Model override; None = service default.
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
    /// Cap on agent turns per run.
    pub max_turns: Option<u32>,
    /// Run budget in seconds; None = daemon default.
    pub timeout_seconds: Option<u64>,
    /// Resource scopes the work unit is restricted to (paths, tools).
    pub resource_scopes: Vec<String>,
    /// Working directory; None = workspace root.
    pub working_dir: Option<PathBuf>,
}

// ─── Automation ──────────────────────────────────────────────────────────────

/// A user-defined (trigger, instruction, policy) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: String,
    pub workspace_id: String,
    /// Display name shown in the UI.
    pub name: String,
    /// Free-text instruction delivered to the agent when the trigger fires.
    pub instruction: String,
    pub trigger: TriggerConfig,
    pub action: ActionConfig,
    pub enabled: bool,
    // Aggregate run statistics, maintained by the manager on finalize.
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub run_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    /// New automation, disabled by default — the caller opts into `enabled`.
    pub fn new(
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        instruction: impl Into<String>,
        trigger: TriggerConfig,
        action: ActionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            name: name.into(),
            instruction: instruction.into(),
            trigger,
            action,
            enabled: false,
            last_run_at: None,
            last_status: None,
            run_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─── Runs ────────────────────────────────────────────────────────────────────

/// Run lifecycle. `Success`, `Failure`, and `Cancelled` are terminal — no
/// further transition is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One execution attempt of an automation. Created `pending`; exactly one
/// writer (the manager) transitions it; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRun {
    pub id: String,
    pub automation_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Null until a terminal status is reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Linked execution-service work unit, once one exists.
    pub work_unit_id: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub triggered_by: TriggerKind,
    /// Structured payload describing what fired (size-bounded at the source).
    pub trigger_context: Option<serde_json::Value>,
}

impl AutomationRun {
    pub fn new(
        automation_id: impl Into<String>,
        triggered_by: TriggerKind,
        trigger_context: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            automation_id: automation_id.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            work_unit_id: None,
            summary: None,
            error: None,
            triggered_by,
            trigger_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_config_round_trips_with_type_tag() {
        let trigger = TriggerConfig::Clipboard {
            pattern: Some("^https?://".into()),
            poll_interval_ms: None,
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "clipboard");
        assert_eq!(json["pattern"], "^https?://");
        let back: TriggerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);
    }

    #[test]
    fn changing_trigger_kind_carries_no_foreign_fields() {
        // A schedule config serialized then deserialized as the closed enum
        // cannot retain clipboard fields — the tag decides everything.
        let json = serde_json::json!({
            "type": "schedule",
            "expression": "0 0 9 * * Mon-Fri *",
            "pattern": "leftover-from-other-kind"
        });
        let parsed: TriggerConfig = serde_json::from_value(json).unwrap();
        match parsed {
            TriggerConfig::Schedule { expression, timezone } => {
                assert_eq!(expression, "0 0 9 * * Mon-Fri *");
                assert!(timezone.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn new_automation_is_disabled_by_default() {
        let a = Automation::new(
            "ws-1",
            "daily summary",
            "Summarize open tasks",
            TriggerConfig::Manual {},
            ActionConfig::default(),
        );
        assert!(!a.enabled);
        assert_eq!(a.run_count, 0);
        assert!(a.last_status.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failure.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}
