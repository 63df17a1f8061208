//! The execution-service seam.
//!
//! Agent work is delegated to an opaque service: the manager creates a work
//! unit from an automation's action policy, delivers one composed message,
//! and observes the outcome on the notification stream. It never blocks on
//! the work itself.

pub mod process;

use crate::model::PermissionMode;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Everything the service needs to create a work unit.
#[derive(Debug, Clone)]
pub struct WorkUnitSpec {
    pub workspace_root: PathBuf,
    /// Working directory for the work unit; defaults to the workspace root.
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
    pub max_turns: Option<u32>,
}

/// Notification kinds carried by the stream. The manager only acts on
/// `Completed` and `Error`; anything else passes through unhandled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecEventKind {
    Completed,
    Error,
    /// Progress/log chatter — ignored by the run lifecycle.
    Other,
}

/// One event from the execution service, keyed by work-unit id. Not every
/// work unit belongs to an automation; unknown ids are ignored upstream.
#[derive(Debug, Clone)]
pub struct ExecNotification {
    pub kind: ExecEventKind,
    pub work_unit_id: String,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Contract consumed by the automation manager. Implementations must emit a
/// `Completed` or `Error` notification for every work unit that had a
/// message delivered (duplicates are tolerated downstream).
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Create an addressable unit of agent work. Returns its id.
    async fn create_work_unit(&self, spec: &WorkUnitSpec) -> Result<String>;

    /// Restrict the work unit to the given resource scopes.
    async fn set_resource_scopes(&self, work_unit_id: &str, scopes: &[String]) -> Result<()>;

    /// Deliver the composed instruction to the work unit.
    async fn deliver_message(&self, work_unit_id: &str, text: &str) -> Result<()>;

    /// Request cancellation. Best-effort — may race with normal completion.
    async fn cancel(&self, work_unit_id: &str) -> Result<()>;

    /// Subscribe to completion/error notifications.
    fn notifications(&self) -> broadcast::Receiver<ExecNotification>;
}
