//! Shared test doubles: a scripted execution service and a scriptable host.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::{broadcast, Notify};
use triggerd::exec::{ExecEventKind, ExecNotification, ExecutionService, WorkUnitSpec};
use triggerd::host::{HostBridge, HostSignal, HotkeyCallback};

// ─── Mock execution service ──────────────────────────────────────────────────

pub struct MockExec {
    tx: broadcast::Sender<ExecNotification>,
    counter: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_deliver: AtomicBool,
    /// When set, `create_work_unit` parks until `release_create` is called.
    pub hold_create: AtomicBool,
    release_create: Notify,
    pub created: Mutex<Vec<(String, WorkUnitSpec)>>,
    pub delivered: Mutex<Vec<(String, String)>>,
    pub cancelled: Mutex<Vec<String>>,
    pub scoped: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockExec {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            tx,
            counter: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_deliver: AtomicBool::new(false),
            hold_create: AtomicBool::new(false),
            release_create: Notify::new(),
            created: Mutex::new(vec![]),
            delivered: Mutex::new(vec![]),
            cancelled: Mutex::new(vec![]),
            scoped: Mutex::new(vec![]),
        })
    }

    pub fn complete(&self, work_unit_id: &str, summary: Option<&str>) {
        let _ = self.tx.send(ExecNotification {
            kind: ExecEventKind::Completed,
            work_unit_id: work_unit_id.to_string(),
            summary: summary.map(str::to_string),
            error: None,
        });
    }

    pub fn error(&self, work_unit_id: &str, error: &str) {
        let _ = self.tx.send(ExecNotification {
            kind: ExecEventKind::Error,
            work_unit_id: work_unit_id.to_string(),
            summary: None,
            error: Some(error.to_string()),
        });
    }

    pub fn release_create(&self) {
        self.release_create.notify_one();
    }

    pub fn chatter(&self, work_unit_id: &str) {
        let _ = self.tx.send(ExecNotification {
            kind: ExecEventKind::Other,
            work_unit_id: work_unit_id.to_string(),
            summary: None,
            error: None,
        });
    }
}

#[async_trait]
impl ExecutionService for MockExec {
    async fn create_work_unit(&self, spec: &WorkUnitSpec) -> Result<String> {
        if self.hold_create.load(Ordering::SeqCst) {
            self.release_create.notified().await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("scripted create failure");
        }
        let id = format!("wu-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.created.lock().unwrap().push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn set_resource_scopes(&self, work_unit_id: &str, scopes: &[String]) -> Result<()> {
        self.scoped
            .lock()
            .unwrap()
            .push((work_unit_id.to_string(), scopes.to_vec()));
        Ok(())
    }

    async fn deliver_message(&self, work_unit_id: &str, text: &str) -> Result<()> {
        if self.fail_deliver.load(Ordering::SeqCst) {
            bail!("scripted delivery failure");
        }
        self.delivered
            .lock()
            .unwrap()
            .push((work_unit_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn cancel(&self, work_unit_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(work_unit_id.to_string());
        Ok(())
    }

    fn notifications(&self) -> broadcast::Receiver<ExecNotification> {
        self.tx.subscribe()
    }
}

// ─── Mock host ───────────────────────────────────────────────────────────────

pub struct MockHost {
    signals: broadcast::Sender<HostSignal>,
    clipboard: Mutex<Option<String>>,
    hotkeys: Mutex<HashMap<String, Arc<HotkeyCallback>>>,
    pub fail_binds: AtomicBool,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        let (signals, _) = broadcast::channel(64);
        Arc::new(Self {
            signals,
            clipboard: Mutex::new(None),
            hotkeys: Mutex::new(HashMap::new()),
            fail_binds: AtomicBool::new(false),
        })
    }

    pub fn set_clipboard(&self, content: &str) {
        *self.clipboard.lock().unwrap() = Some(content.to_string());
    }

    pub fn emit(&self, signal: HostSignal) {
        let _ = self.signals.send(signal);
    }

    /// Simulate the user pressing a bound accelerator.
    pub fn press(&self, accelerator: &str) {
        let callback = self.hotkeys.lock().unwrap().get(accelerator).cloned();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn bound_count(&self) -> usize {
        self.hotkeys.lock().unwrap().len()
    }
}

impl HostBridge for MockHost {
    fn bind_hotkey(&self, accelerator: &str, callback: HotkeyCallback) -> Result<()> {
        if self.fail_binds.load(Ordering::SeqCst) {
            bail!("scripted bind failure");
        }
        self.hotkeys
            .lock()
            .unwrap()
            .insert(accelerator.to_string(), Arc::new(callback));
        Ok(())
    }

    fn unbind_hotkey(&self, accelerator: &str) -> Result<()> {
        self.hotkeys.lock().unwrap().remove(accelerator);
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }

    fn read_clipboard(&self) -> Option<String> {
        self.clipboard.lock().unwrap().clone()
    }
}

// ─── Polling helper ──────────────────────────────────────────────────────────

/// Await a condition with a bounded poll loop instead of a fixed sleep.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 3s");
}
