//! The host-environment seam: global hotkeys, app/power lifecycle signals,
//! and clipboard access. GUI hosts implement [`HostBridge`] with real
//! accelerators; the daemon default is [`HeadlessHost`].

use crate::model::{AppEvent, PowerEvent};
use anyhow::{bail, Result};
use tokio::sync::broadcast;

/// A lifecycle signal from the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    App(AppEvent),
    Power(PowerEvent),
}

impl HostSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App(e) => e.as_str(),
            Self::Power(e) => e.as_str(),
        }
    }
}

/// Callback invoked when a bound accelerator is pressed.
pub type HotkeyCallback = Box<dyn Fn() + Send + Sync>;

pub trait HostBridge: Send + Sync {
    /// Bind a global accelerator. Binding can fail (conflicting shortcut,
    /// unsupported host) — callers treat that as non-fatal.
    fn bind_hotkey(&self, accelerator: &str, callback: HotkeyCallback) -> Result<()>;

    /// Unbind a previously bound accelerator. Must tolerate "already unbound".
    fn unbind_hotkey(&self, accelerator: &str) -> Result<()>;

    /// Subscribe to app/power lifecycle signals.
    fn signals(&self) -> broadcast::Receiver<HostSignal>;

    /// Current clipboard text, if the host exposes one.
    fn read_clipboard(&self) -> Option<String>;
}

/// Host bridge for the headless daemon: no accelerators, no clipboard, and a
/// signal stream nothing publishes to unless [`HeadlessHost::emit`] is called.
pub struct HeadlessHost {
    tx: broadcast::Sender<HostSignal>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Emit a lifecycle signal to all subscribers. An embedding host wires
    /// its own lifecycle hooks through this.
    pub fn emit(&self, signal: HostSignal) {
        let _ = self.tx.send(signal);
    }
}

impl HostBridge for HeadlessHost {
    fn bind_hotkey(&self, accelerator: &str, _callback: HotkeyCallback) -> Result<()> {
        bail!("headless host has no global accelerator support ({accelerator})")
    }

    fn unbind_hotkey(&self, _accelerator: &str) -> Result<()> {
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<HostSignal> {
        self.tx.subscribe()
    }

    fn read_clipboard(&self) -> Option<String> {
        None
    }
}
