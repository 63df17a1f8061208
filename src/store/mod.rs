//! File-per-record persistence for automations and runs.
//!
//! Layout under each workspace root:
//! ```text
//! <root>/.triggerd/automations/<automation-id>.json
//! <root>/.triggerd/runs/<automation-id>/<run-id>.json
//! ```
//!
//! Writes are file-granular with no cross-file transaction. A crash between
//! a run-record write and the owning automation's aggregate write leaves the
//! two inconsistent until the next successful finalize; that window is
//! accepted and reconciled by later runs, never repaired in place.

use crate::model::{Automation, AutomationRun, RunStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::{debug, warn};

const STORE_DIR: &str = ".triggerd";

/// Workspace-scoped record store. All operations are synchronous — callers
/// on the event loop must not hold locks across them and awaits.
pub struct AutomationStore {
    /// Workspace id → root path. Single daemon process is the only writer.
    workspaces: RwLock<HashMap<String, PathBuf>>,
}

impl Default for AutomationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AutomationStore {
    pub fn new() -> Self {
        Self {
            workspaces: RwLock::new(HashMap::new()),
        }
    }

    // ─── Workspaces ──────────────────────────────────────────────────────────

    /// Register a workspace root. Idempotent; a re-register replaces the path.
    pub fn register_workspace(&self, id: impl Into<String>, root: impl Into<PathBuf>) {
        self.workspaces.write().unwrap().insert(id.into(), root.into());
    }

    /// Resolve a workspace id to its root path.
    pub fn workspace_root(&self, id: &str) -> Option<PathBuf> {
        self.workspaces.read().unwrap().get(id).cloned()
    }

    pub fn workspace_ids(&self) -> Vec<String> {
        self.workspaces.read().unwrap().keys().cloned().collect()
    }

    // ─── Automations ─────────────────────────────────────────────────────────

    pub fn list(&self, workspace_root: &Path) -> Result<Vec<Automation>> {
        let dir = workspace_root.join(STORE_DIR).join("automations");
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut automations = vec![];
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Automation>(&path) {
                Ok(a) => automations.push(a),
                // One corrupt record never hides the rest of the list.
                Err(e) => warn!(path = %path.display(), "skipping unreadable automation: {e}"),
            }
        }
        automations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(automations)
    }

    pub fn get(&self, workspace_root: &Path, id: &str) -> Result<Option<Automation>> {
        let path = automation_path(workspace_root, id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn create(&self, workspace_root: &Path, automation: &Automation) -> Result<()> {
        write_json(&automation_path(workspace_root, &automation.id), automation)
    }

    pub fn update(&self, workspace_root: &Path, automation: &Automation) -> Result<()> {
        write_json(&automation_path(workspace_root, &automation.id), automation)
    }

    /// Delete an automation together with all of its run records.
    pub fn delete(&self, workspace_root: &Path, id: &str) -> Result<()> {
        let path = automation_path(workspace_root, id);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        let runs_dir = runs_dir(workspace_root, id);
        if runs_dir.exists() {
            fs::remove_dir_all(&runs_dir)
                .with_context(|| format!("remove {}", runs_dir.display()))?;
        }
        debug!(id, "automation deleted");
        Ok(())
    }

    // ─── Runs ────────────────────────────────────────────────────────────────

    pub fn create_run(&self, workspace_root: &Path, run: &AutomationRun) -> Result<()> {
        write_json(&run_path(workspace_root, &run.automation_id, &run.id), run)
    }

    pub fn update_run(&self, workspace_root: &Path, run: &AutomationRun) -> Result<()> {
        write_json(&run_path(workspace_root, &run.automation_id, &run.id), run)
    }

    pub fn get_run(
        &self,
        workspace_root: &Path,
        automation_id: &str,
        run_id: &str,
    ) -> Result<Option<AutomationRun>> {
        let path = run_path(workspace_root, automation_id, run_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// List runs for an automation, most recent first.
    pub fn list_runs(&self, workspace_root: &Path, automation_id: &str) -> Result<Vec<AutomationRun>> {
        let dir = runs_dir(workspace_root, automation_id);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut runs = vec![];
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<AutomationRun>(&path) {
                Ok(r) => runs.push(r),
                Err(e) => warn!(path = %path.display(), "skipping unreadable run: {e}"),
            }
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Fold a finalized run into the owning automation's aggregate fields and
    /// persist the updated record.
    ///
    /// A cancelled run counts toward `run_count` and bumps `last_run_at` but
    /// does not overwrite `last_status` — cancellation says nothing about
    /// whether the automation works.
    pub fn update_after_run(
        &self,
        workspace_root: &Path,
        automation_id: &str,
        run: &AutomationRun,
    ) -> Result<Option<Automation>> {
        let Some(mut automation) = self.get(workspace_root, automation_id)? else {
            // Automation deleted while its run was in flight; nothing to fold.
            return Ok(None);
        };
        automation.last_run_at = Some(run.completed_at.unwrap_or(run.started_at));
        automation.run_count += 1;
        match run.status {
            RunStatus::Cancelled => {}
            status => automation.last_status = Some(status),
        }
        automation.updated_at = Utc::now();
        self.update(workspace_root, &automation)?;
        Ok(Some(automation))
    }
}

// ─── Paths & JSON helpers ────────────────────────────────────────────────────

fn automation_path(workspace_root: &Path, id: &str) -> PathBuf {
    workspace_root
        .join(STORE_DIR)
        .join("automations")
        .join(format!("{id}.json"))
}

fn runs_dir(workspace_root: &Path, automation_id: &str) -> PathBuf {
    workspace_root.join(STORE_DIR).join("runs").join(automation_id)
}

fn run_path(workspace_root: &Path, automation_id: &str, run_id: &str) -> PathBuf {
    runs_dir(workspace_root, automation_id).join(format!("{run_id}.json"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))
}
