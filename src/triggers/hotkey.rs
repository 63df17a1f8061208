//! Hotkey trigger — binds a global accelerator through the host bridge.

use super::{ContextFire, StopHandle};
use crate::host::HostBridge;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

/// Accelerator shape check: modifier(+modifier...)+key, e.g.
/// `CmdOrCtrl+Shift+K`. The host does the real validation at bind time; this
/// only rejects obvious garbage before touching the host API.
static ACCELERATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+(\+[A-Za-z0-9]+)*$").unwrap());

pub(crate) fn start(
    host: &dyn HostBridge,
    accelerator: &str,
    fire: ContextFire,
) -> Result<StopHandle> {
    let accelerator = accelerator.trim().to_string();
    if accelerator.is_empty() || !ACCELERATOR_RE.is_match(&accelerator) {
        bail!("invalid accelerator `{accelerator}`");
    }

    let callback_accel = accelerator.clone();
    host.bind_hotkey(
        &accelerator,
        Box::new(move || {
            fire(json!({
                "accelerator": callback_accel,
                "firedAt": Utc::now().to_rfc3339(),
            }));
        }),
    )
    .with_context(|| format!("failed to bind accelerator `{accelerator}`"))?;

    Ok(StopHandle::Hotkey { accelerator })
}
