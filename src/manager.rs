//! Automation Manager — the sole authority for starting, bounding, tracking,
//! and finalizing runs.
//!
//! A run's life: `pending` (admitted, recorded) → `running` (work unit
//! created, message delivered) → exactly one of `success` / `failure` /
//! `cancelled`. All terminal paths converge on [`AutomationManager::finalize`],
//! which is a no-op for anything already finalized — duplicate notifications
//! and the cancel-vs-complete race resolve to "first finalize wins".

use crate::config::DaemonConfig;
use crate::events::{AutomationEvent, EventBroadcaster};
use crate::exec::{ExecEventKind, ExecNotification, ExecutionService, WorkUnitSpec};
use crate::model::{
    ActionConfig, Automation, AutomationRun, RunStatus, TriggerConfig, TriggerKind,
};
use crate::store::AutomationStore;
use crate::triggers::{FireEvent, TriggerRegistry};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

const TIMED_OUT_MESSAGE: &str = "Automation timed out";
const SHUTDOWN_MESSAGE: &str = "App shutting down";
const USER_CANCELLED_MESSAGE: &str = "Cancelled by user";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
    #[error("automation not found: {0}")]
    AutomationNotFound(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    /// Concurrency bound reached before the run was created; no record exists.
    #[error("maximum concurrent runs reached ({active}/{max})")]
    AdmissionRejected { active: usize, max: usize },
    /// Work-unit creation or message delivery failed; the run is recorded as
    /// `failure` with this error captured.
    #[error("run setup failed: {0}")]
    Setup(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ─── In-memory tables ────────────────────────────────────────────────────────

/// Join of a run to everything needed to bound and finalize it. Exists only
/// between admission and finalize; never persisted.
struct ActiveRun {
    workspace_id: String,
    automation_id: String,
    work_unit_id: Option<String>,
    started_at: DateTime<Utc>,
    timeout: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ActiveTable {
    /// run id → active run
    runs: HashMap<String, ActiveRun>,
    /// work-unit id → run id
    by_work_unit: HashMap<String, String>,
}

enum Outcome {
    Success { summary: Option<String> },
    Failure { error: String },
    Cancelled { reason: &'static str },
}

// ─── Updates ─────────────────────────────────────────────────────────────────

/// Partial update for an automation. `trigger` and `action` are whole-field
/// replacements — changing the trigger kind never merges fields from a
/// different kind's config.
#[derive(Debug, Default)]
pub struct AutomationUpdate {
    pub name: Option<String>,
    pub instruction: Option<String>,
    pub trigger: Option<TriggerConfig>,
    pub action: Option<ActionConfig>,
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct AutomationManager {
    config: Arc<DaemonConfig>,
    store: Arc<AutomationStore>,
    exec: Arc<dyn ExecutionService>,
    broadcaster: Arc<EventBroadcaster>,
    registry: Arc<TriggerRegistry>,
    /// Guards the check-then-insert admission sequence. Held only across
    /// synchronous sections, never across an await.
    active: Mutex<ActiveTable>,
    /// Background consumers (fire dispatcher, notification stream).
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AutomationManager {
    pub fn new(
        config: Arc<DaemonConfig>,
        store: Arc<AutomationStore>,
        exec: Arc<dyn ExecutionService>,
        broadcaster: Arc<EventBroadcaster>,
        registry: Arc<TriggerRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            exec,
            broadcaster,
            registry,
            active: Mutex::new(ActiveTable::default()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the background consumers: the registry fire channel and the
    /// execution-service notification stream. Call once after construction.
    pub fn start(self: &Arc<Self>, mut fire_rx: mpsc::UnboundedReceiver<FireEvent>) {
        let manager = Arc::clone(self);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = fire_rx.recv().await {
                debug!(
                    automation_id = %event.automation_id,
                    kind = event.kind.as_str(),
                    "trigger fired"
                );
                if let Err(e) = manager
                    .execute(
                        &event.workspace_id,
                        &event.automation_id,
                        event.kind,
                        Some(event.context),
                    )
                    .await
                {
                    warn!(automation_id = %event.automation_id, "triggered run failed: {e}");
                }
            }
        });

        let manager = Arc::clone(self);
        let mut notifications = self.exec.notifications();
        let consumer = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => manager.handle_exec_notification(notification).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!(dropped = n, "execution notification stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.tasks.lock().unwrap().extend([dispatcher, consumer]);
    }

    // ─── Execution ───────────────────────────────────────────────────────────

    /// Admit, create, and start one run of an automation. Returns the run in
    /// `running` state; on setup failure the run is finalized as `failure`
    /// and the error re-raised.
    pub async fn execute(
        self: &Arc<Self>,
        workspace_id: &str,
        automation_id: &str,
        triggered_by: TriggerKind,
        context: Option<Value>,
    ) -> Result<AutomationRun, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        let automation = self
            .store
            .get(&root, automation_id)?
            .ok_or_else(|| AutomationError::AutomationNotFound(automation_id.to_string()))?;

        let run = AutomationRun::new(automation_id, triggered_by, context);

        // Admission check and reservation are one atomic step: no suspension
        // point between counting and inserting, so the bound cannot be
        // oversubscribed by interleaved execute calls. Rejected requests
        // leave no trace — no record has been created yet.
        {
            let mut active = self.active.lock().unwrap();
            if active.runs.len() >= self.config.max_concurrent_runs {
                return Err(AutomationError::AdmissionRejected {
                    active: active.runs.len(),
                    max: self.config.max_concurrent_runs,
                });
            }
            active.runs.insert(
                run.id.clone(),
                ActiveRun {
                    workspace_id: workspace_id.to_string(),
                    automation_id: automation_id.to_string(),
                    work_unit_id: None,
                    started_at: run.started_at,
                    timeout: None,
                },
            );
        }

        if let Err(e) = self.store.create_run(&root, &run) {
            self.active.lock().unwrap().runs.remove(&run.id);
            return Err(e.into());
        }
        info!(
            run_id = %run.id,
            automation_id,
            triggered_by = triggered_by.as_str(),
            "run started"
        );
        self.broadcaster.broadcast(AutomationEvent::RunStarted {
            workspace_id: workspace_id.to_string(),
            run: run.clone(),
        });

        match self.setup(&root, &automation, &run).await {
            Ok(running) => Ok(running),
            Err(e) => {
                warn!(run_id = %run.id, automation_id, "run setup failed: {e:#}");
                // Best-effort: don't leave an orphaned work unit behind.
                let work_unit_id = {
                    let active = self.active.lock().unwrap();
                    active.runs.get(&run.id).and_then(|r| r.work_unit_id.clone())
                };
                if let Some(work_unit_id) = work_unit_id {
                    if let Err(cancel_err) = self.exec.cancel(&work_unit_id).await {
                        debug!(work_unit_id, "work unit cancel after setup failure: {cancel_err}");
                    }
                }
                self.finalize(&run.id, Outcome::Failure { error: format!("{e:#}") })
                    .await;
                Err(AutomationError::Setup(e))
            }
        }
    }

    /// Everything between admission and `running`: work-unit creation, scope
    /// restriction, instruction composition, delivery, timeout arming.
    async fn setup(
        self: &Arc<Self>,
        root: &Path,
        automation: &Automation,
        run: &AutomationRun,
    ) -> anyhow::Result<AutomationRun> {
        let spec = WorkUnitSpec {
            workspace_root: root.to_path_buf(),
            working_dir: automation.action.working_dir.clone(),
            model: automation.action.model.clone(),
            permission_mode: automation.action.permission_mode,
            max_turns: automation.action.max_turns,
        };
        let work_unit_id = self.exec.create_work_unit(&spec).await?;

        // Link before delivery so an immediate notification can already route.
        let linked = {
            let mut active = self.active.lock().unwrap();
            match active.runs.get_mut(&run.id) {
                Some(entry) => {
                    entry.work_unit_id = Some(work_unit_id.clone());
                    active
                        .by_work_unit
                        .insert(work_unit_id.clone(), run.id.clone());
                    true
                }
                None => false,
            }
        };
        if !linked {
            // Finalized mid-setup (shutdown). The unit was never linked, so
            // no other path will ever cancel it.
            if let Err(e) = self.exec.cancel(&work_unit_id).await {
                debug!(work_unit_id, "unlinked work unit cancel: {e}");
            }
            anyhow::bail!("run {} is no longer active", run.id);
        }

        if !automation.action.resource_scopes.is_empty() {
            self.exec
                .set_resource_scopes(&work_unit_id, &automation.action.resource_scopes)
                .await?;
        }

        let instruction = compose_instruction(&automation.instruction, run.trigger_context.as_ref());
        self.exec.deliver_message(&work_unit_id, &instruction).await?;

        let mut running = run.clone();
        running.status = RunStatus::Running;
        running.work_unit_id = Some(work_unit_id);
        self.store.update_run(root, &running)?;

        let timeout_secs = automation
            .action
            .timeout_seconds
            .unwrap_or(self.config.default_timeout_seconds);
        let manager = Arc::clone(self);
        let run_id = run.id.clone();
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            manager.handle_timeout(&run_id).await;
        });
        {
            let mut active = self.active.lock().unwrap();
            match active.runs.get_mut(&run.id) {
                Some(entry) => entry.timeout = Some(timeout),
                None => timeout.abort(),
            }
        }

        Ok(running)
    }

    /// Cancel an active run. Returns false if the run is not currently active.
    pub async fn cancel(self: &Arc<Self>, workspace_id: &str, run_id: &str) -> bool {
        let work_unit_id = {
            let active = self.active.lock().unwrap();
            match active.runs.get(run_id) {
                Some(entry) if entry.workspace_id == workspace_id => entry.work_unit_id.clone(),
                _ => return false,
            }
        };
        if let Some(work_unit_id) = &work_unit_id {
            if let Err(e) = self.exec.cancel(work_unit_id).await {
                warn!(run_id, work_unit_id, "work unit cancel failed: {e}");
            }
        }
        self.finalize(run_id, Outcome::Cancelled { reason: USER_CANCELLED_MESSAGE })
            .await;
        true
    }

    pub fn active_run_count(&self) -> usize {
        self.active.lock().unwrap().runs.len()
    }

    pub fn is_automation_running(&self, automation_id: &str) -> bool {
        self.active
            .lock()
            .unwrap()
            .runs
            .values()
            .any(|r| r.automation_id == automation_id)
    }

    // ─── Notification / timeout handlers ─────────────────────────────────────

    async fn handle_exec_notification(self: &Arc<Self>, notification: ExecNotification) {
        let outcome = match notification.kind {
            ExecEventKind::Completed => Outcome::Success {
                summary: notification.summary,
            },
            ExecEventKind::Error => Outcome::Failure {
                error: notification
                    .error
                    .unwrap_or_else(|| "execution failed".to_string()),
            },
            // Progress chatter and other kinds are not run transitions.
            ExecEventKind::Other => return,
        };
        let run_id = {
            let active = self.active.lock().unwrap();
            active.by_work_unit.get(&notification.work_unit_id).cloned()
        };
        // Not every work unit belongs to an automation, and a finalized run's
        // index entry is already gone — both are silent no-ops.
        let Some(run_id) = run_id else { return };
        self.finalize(&run_id, outcome).await;
    }

    async fn handle_timeout(self: &Arc<Self>, run_id: &str) {
        let work_unit_id = {
            let active = self.active.lock().unwrap();
            match active.runs.get(run_id) {
                Some(entry) => entry.work_unit_id.clone(),
                None => return, // finalized before the timer fired
            }
        };
        warn!(run_id, "run timed out");
        if let Some(work_unit_id) = &work_unit_id {
            if let Err(e) = self.exec.cancel(work_unit_id).await {
                warn!(run_id, work_unit_id, "work unit cancel on timeout failed: {e}");
            }
        }
        self.finalize(run_id, Outcome::Failure { error: TIMED_OUT_MESSAGE.to_string() })
            .await;
    }

    // ─── Finalize ────────────────────────────────────────────────────────────

    /// Shared terminal path. Removing the run from the active table is the
    /// commit point: whichever caller gets here first wins, every later
    /// caller observes the run absent and returns.
    async fn finalize(&self, run_id: &str, outcome: Outcome) {
        let entry = {
            let mut active = self.active.lock().unwrap();
            let Some(entry) = active.runs.remove(run_id) else {
                return; // already finalized
            };
            if let Some(work_unit_id) = &entry.work_unit_id {
                active.by_work_unit.remove(work_unit_id);
            }
            entry
        };
        if let Some(timeout) = entry.timeout {
            timeout.abort();
        }

        let Some(root) = self.store.workspace_root(&entry.workspace_id) else {
            warn!(run_id, workspace_id = %entry.workspace_id, "finalize: workspace vanished");
            return;
        };
        let mut run = match self.store.get_run(&root, &entry.automation_id, run_id) {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!(run_id, "finalize: run record missing");
                return;
            }
            Err(e) => {
                warn!(run_id, "finalize: failed to load run: {e:#}");
                return;
            }
        };
        if run.status.is_terminal() {
            return;
        }

        run.completed_at = Some(Utc::now());
        match outcome {
            Outcome::Success { summary } => {
                run.status = RunStatus::Success;
                run.summary = summary;
                run.error = None;
            }
            Outcome::Failure { error } => {
                run.status = RunStatus::Failure;
                run.error = Some(error);
            }
            Outcome::Cancelled { reason } => {
                run.status = RunStatus::Cancelled;
                run.error = Some(reason.to_string());
            }
        }

        if let Err(e) = self.store.update_run(&root, &run) {
            warn!(run_id, "finalize: failed to persist run: {e:#}");
        }
        // Separate file from the run record — an ill-timed crash leaves the
        // aggregates one run behind until the next finalize (documented weak
        // consistency window).
        match self.store.update_after_run(&root, &entry.automation_id, &run) {
            Ok(_) => {}
            Err(e) => warn!(run_id, "finalize: failed to update aggregates: {e:#}"),
        }

        let elapsed_ms = (Utc::now() - entry.started_at).num_milliseconds();
        info!(
            run_id,
            automation_id = %entry.automation_id,
            status = run.status.as_str(),
            elapsed_ms,
            "run finalized"
        );
        let workspace_id = entry.workspace_id;
        self.broadcaster.broadcast(match run.status {
            RunStatus::Failure => AutomationEvent::RunFailed {
                workspace_id: workspace_id.clone(),
                run,
            },
            RunStatus::Cancelled => AutomationEvent::RunCancelled {
                workspace_id: workspace_id.clone(),
                run,
            },
            _ => AutomationEvent::RunCompleted {
                workspace_id: workspace_id.clone(),
                run,
            },
        });
        self.broadcaster
            .broadcast(AutomationEvent::ListChanged { workspace_id });
    }

    // ─── Automation CRUD ─────────────────────────────────────────────────────

    pub async fn create_automation(
        &self,
        automation: Automation,
    ) -> Result<Automation, AutomationError> {
        let root = self
            .store
            .workspace_root(&automation.workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(automation.workspace_id.clone()))?;
        self.store.create(&root, &automation)?;
        info!(automation_id = %automation.id, name = %automation.name, "automation created");
        self.broadcaster.broadcast(AutomationEvent::Created {
            workspace_id: automation.workspace_id.clone(),
            automation: automation.clone(),
        });
        if automation.enabled {
            self.registry.register(&automation).await;
        }
        Ok(automation)
    }

    pub async fn update_automation(
        &self,
        workspace_id: &str,
        automation_id: &str,
        update: AutomationUpdate,
    ) -> Result<Automation, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        let mut automation = self
            .store
            .get(&root, automation_id)?
            .ok_or_else(|| AutomationError::AutomationNotFound(automation_id.to_string()))?;

        if let Some(name) = update.name {
            automation.name = name;
        }
        if let Some(instruction) = update.instruction {
            automation.instruction = instruction;
        }
        if let Some(trigger) = update.trigger {
            automation.trigger = trigger;
        }
        if let Some(action) = update.action {
            automation.action = action;
        }
        automation.updated_at = Utc::now();
        self.store.update(&root, &automation)?;
        self.broadcaster.broadcast(AutomationEvent::Updated {
            workspace_id: workspace_id.to_string(),
            automation: automation.clone(),
        });
        self.refresh_trigger(workspace_id, automation_id).await;
        Ok(automation)
    }

    pub async fn delete_automation(
        &self,
        workspace_id: &str,
        automation_id: &str,
    ) -> Result<(), AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        self.registry.unregister(automation_id).await;
        self.store.delete(&root, automation_id)?;
        info!(automation_id, "automation deleted");
        self.broadcaster.broadcast(AutomationEvent::Deleted {
            workspace_id: workspace_id.to_string(),
            automation_id: automation_id.to_string(),
        });
        Ok(())
    }

    pub async fn set_enabled(
        &self,
        workspace_id: &str,
        automation_id: &str,
        enabled: bool,
    ) -> Result<Automation, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        let mut automation = self
            .store
            .get(&root, automation_id)?
            .ok_or_else(|| AutomationError::AutomationNotFound(automation_id.to_string()))?;
        automation.enabled = enabled;
        automation.updated_at = Utc::now();
        self.store.update(&root, &automation)?;
        self.broadcaster.broadcast(if enabled {
            AutomationEvent::Enabled {
                workspace_id: workspace_id.to_string(),
                automation: automation.clone(),
            }
        } else {
            AutomationEvent::Disabled {
                workspace_id: workspace_id.to_string(),
                automation: automation.clone(),
            }
        });
        self.refresh_trigger(workspace_id, automation_id).await;
        Ok(automation)
    }

    pub fn list_automations(&self, workspace_id: &str) -> Result<Vec<Automation>, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        Ok(self.store.list(&root)?)
    }

    pub fn get_automation(
        &self,
        workspace_id: &str,
        automation_id: &str,
    ) -> Result<Automation, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        self.store
            .get(&root, automation_id)?
            .ok_or_else(|| AutomationError::AutomationNotFound(automation_id.to_string()))
    }

    pub fn list_runs(
        &self,
        workspace_id: &str,
        automation_id: &str,
    ) -> Result<Vec<AutomationRun>, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        Ok(self.store.list_runs(&root, automation_id)?)
    }

    pub fn get_run(
        &self,
        workspace_id: &str,
        automation_id: &str,
        run_id: &str,
    ) -> Result<AutomationRun, AutomationError> {
        let root = self
            .store
            .workspace_root(workspace_id)
            .ok_or_else(|| AutomationError::WorkspaceNotFound(workspace_id.to_string()))?;
        self.store
            .get_run(&root, automation_id, run_id)?
            .ok_or_else(|| AutomationError::RunNotFound(run_id.to_string()))
    }

    // ─── Trigger bookkeeping ─────────────────────────────────────────────────

    /// Re-read an automation and bring its trigger subscription in line:
    /// deleted ⇒ unregister, disabled ⇒ unregister, enabled ⇒ (re)register.
    pub async fn refresh_trigger(&self, workspace_id: &str, automation_id: &str) {
        let Some(root) = self.store.workspace_root(workspace_id) else {
            self.registry.unregister(automation_id).await;
            return;
        };
        match self.store.get(&root, automation_id) {
            Ok(Some(automation)) if automation.enabled => {
                self.registry.register(&automation).await;
            }
            Ok(_) => self.registry.unregister(automation_id).await,
            Err(e) => {
                warn!(automation_id, "refresh_trigger: failed to load automation: {e:#}");
                self.registry.unregister(automation_id).await;
            }
        }
    }

    /// Register triggers for every enabled automation in every workspace.
    /// Called once at daemon startup.
    pub async fn register_all(&self) {
        for workspace_id in self.store.workspace_ids() {
            let Some(root) = self.store.workspace_root(&workspace_id) else {
                continue;
            };
            let automations = match self.store.list(&root) {
                Ok(list) => list,
                Err(e) => {
                    warn!(workspace_id = %workspace_id, "register_all: list failed: {e:#}");
                    continue;
                }
            };
            for automation in automations.iter().filter(|a| a.enabled) {
                self.registry.register(automation).await;
            }
        }
        info!(
            registered = self.registry.active_count().await,
            "trigger registration complete"
        );
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Tear down every trigger, force-finalize every active run as
    /// `cancelled`, and stop consuming the notification stream.
    pub async fn shutdown(self: &Arc<Self>) {
        self.registry.unregister_all().await;

        let entries: Vec<(String, Option<String>)> = {
            let active = self.active.lock().unwrap();
            active
                .runs
                .iter()
                .map(|(id, r)| (id.clone(), r.work_unit_id.clone()))
                .collect()
        };
        for (run_id, work_unit_id) in entries {
            if let Some(work_unit_id) = &work_unit_id {
                if let Err(e) = self.exec.cancel(work_unit_id).await {
                    warn!(run_id = %run_id, work_unit_id, "shutdown cancel failed: {e}");
                }
            }
            self.finalize(&run_id, Outcome::Cancelled { reason: SHUTDOWN_MESSAGE })
                .await;
        }

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        info!("automation manager shut down");
    }
}

// ─── Instruction composition ─────────────────────────────────────────────────

/// The delivered instruction is the automation's prompt plus, when the
/// trigger carried any context, a structured rendering of that payload.
fn compose_instruction(instruction: &str, context: Option<&Value>) -> String {
    match context {
        Some(ctx) if !is_empty_context(ctx) => {
            let rendered = serde_json::to_string_pretty(ctx).unwrap_or_default();
            format!("{instruction}\n\nTrigger context:\n{rendered}")
        }
        _ => instruction.to_string(),
    }
}

fn is_empty_context(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
