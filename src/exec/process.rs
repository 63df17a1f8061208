//! Process-backed execution service — one `claude` CLI invocation per work
//! unit, run in print mode with the automation's policy mapped to CLI flags.

use super::{ExecEventKind, ExecNotification, ExecutionService, WorkUnitSpec};
use crate::model::PermissionMode;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::{collections::HashMap, process::Stdio, sync::Arc, sync::Mutex};
use tokio::{process::Command, sync::broadcast, sync::Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Unit {
    spec: WorkUnitSpec,
    scopes: Vec<String>,
    cancel: Arc<Notify>,
    delivered: bool,
}

/// Spawns the agent CLI per work unit and reports exits on the notification
/// stream. The process is created lazily on `deliver_message` — a work unit
/// with no delivered message never spawns anything.
pub struct ProcessExecutionService {
    units: Mutex<HashMap<String, Unit>>,
    tx: broadcast::Sender<ExecNotification>,
}

impl Default for ProcessExecutionService {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutionService {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            units: Mutex::new(HashMap::new()),
            tx,
        }
    }
}

#[async_trait]
impl ExecutionService for ProcessExecutionService {
    async fn create_work_unit(&self, spec: &WorkUnitSpec) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.units.lock().unwrap().insert(
            id.clone(),
            Unit {
                spec: spec.clone(),
                scopes: vec![],
                cancel: Arc::new(Notify::new()),
                delivered: false,
            },
        );
        debug!(work_unit_id = %id, "work unit created");
        Ok(id)
    }

    async fn set_resource_scopes(&self, work_unit_id: &str, scopes: &[String]) -> Result<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(work_unit_id)
            .ok_or_else(|| anyhow!("unknown work unit: {work_unit_id}"))?;
        unit.scopes = scopes.to_vec();
        Ok(())
    }

    async fn deliver_message(&self, work_unit_id: &str, text: &str) -> Result<()> {
        let (spec, scopes, cancel) = {
            let mut units = self.units.lock().unwrap();
            let unit = units
                .get_mut(work_unit_id)
                .ok_or_else(|| anyhow!("unknown work unit: {work_unit_id}"))?;
            if unit.delivered {
                return Err(anyhow!("work unit already has a message: {work_unit_id}"));
            }
            unit.delivered = true;
            (unit.spec.clone(), unit.scopes.clone(), unit.cancel.clone())
        };

        let mut cmd = Command::new("claude");
        cmd.arg("-p").arg(text);
        if let Some(model) = &spec.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(max_turns) = spec.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        match spec.permission_mode {
            PermissionMode::Default => {}
            PermissionMode::AcceptEdits => {
                cmd.arg("--permission-mode").arg("acceptEdits");
            }
            PermissionMode::BypassPermissions => {
                cmd.arg("--permission-mode").arg("bypassPermissions");
            }
            PermissionMode::Plan => {
                cmd.arg("--permission-mode").arg("plan");
            }
        }
        for scope in &scopes {
            cmd.arg("--add-dir").arg(scope);
        }
        cmd.current_dir(spec.working_dir.as_ref().unwrap_or(&spec.workspace_root))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on cancel must take the process with it.
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .context("failed to spawn `claude` — is it installed and on PATH?")?;
        info!(work_unit_id, "agent process spawned");

        let tx = self.tx.clone();
        let id = work_unit_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                result = child.wait_with_output() => {
                    let notification = match result {
                        Ok(output) if output.status.success() => ExecNotification {
                            kind: ExecEventKind::Completed,
                            work_unit_id: id.clone(),
                            summary: last_line(&output.stdout),
                            error: None,
                        },
                        Ok(output) => ExecNotification {
                            kind: ExecEventKind::Error,
                            work_unit_id: id.clone(),
                            summary: None,
                            error: Some(
                                last_line(&output.stderr)
                                    .unwrap_or_else(|| format!("agent exited with {}", output.status)),
                            ),
                        },
                        Err(e) => ExecNotification {
                            kind: ExecEventKind::Error,
                            work_unit_id: id.clone(),
                            summary: None,
                            error: Some(format!("failed to wait for agent process: {e}")),
                        },
                    };
                    let _ = tx.send(notification);
                }
                _ = cancel.notified() => {
                    // Losing the select drops the wait future and, with
                    // kill_on_drop set, the process. Duplicate notifications
                    // are tolerated upstream.
                    let _ = tx.send(ExecNotification {
                        kind: ExecEventKind::Error,
                        work_unit_id: id.clone(),
                        summary: None,
                        error: Some("work unit cancelled".into()),
                    });
                }
            }
        });
        Ok(())
    }

    async fn cancel(&self, work_unit_id: &str) -> Result<()> {
        let cancel = {
            let units = self.units.lock().unwrap();
            units
                .get(work_unit_id)
                .map(|u| u.cancel.clone())
                .ok_or_else(|| anyhow!("unknown work unit: {work_unit_id}"))?
        };
        cancel.notify_one();
        warn!(work_unit_id, "work unit cancel requested");
        Ok(())
    }

    fn notifications(&self) -> broadcast::Receiver<ExecNotification> {
        self.tx.subscribe()
    }
}

fn last_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
}
