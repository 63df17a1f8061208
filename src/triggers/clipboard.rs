//! Clipboard trigger — poll, compare, optionally pattern-match.

use super::{ContextFire, StopHandle};
use crate::host::HostBridge;
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde_json::json;
use std::{sync::Arc, time::Duration};

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// Cap on the content copied into the fire context.
const MAX_CONTEXT_CHARS: usize = 500;

pub(crate) fn start(
    host: Arc<dyn HostBridge>,
    pattern: Option<&str>,
    poll_interval_ms: Option<u64>,
    fire: ContextFire,
) -> Result<StopHandle> {
    let pattern = pattern
        .map(|p| Regex::new(p).with_context(|| format!("invalid clipboard pattern `{p}`")))
        .transpose()?;
    let interval = Duration::from_millis(poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));

    let task = tokio::spawn(async move {
        // Whatever is on the clipboard at registration time is "already seen";
        // only subsequent changes fire.
        let mut last_seen = host.read_clipboard();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(content) = host.read_clipboard() else {
                continue;
            };
            if last_seen.as_deref() == Some(content.as_str()) {
                continue;
            }
            last_seen = Some(content.clone());
            if let Some(pattern) = &pattern {
                if !pattern.is_match(&content) {
                    continue;
                }
            }
            fire(json!({
                "content": truncate_chars(&content, MAX_CONTEXT_CHARS),
                "firedAt": Utc::now().to_rfc3339(),
            }));
        }
    });
    Ok(StopHandle::Task(task))
}

/// Truncate on a char boundary — clipboard text is arbitrary unicode.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
