//! App/power lifecycle triggers — a 1:1 mapping from configured event names
//! to host signals.

use super::{ContextFire, StopHandle};
use crate::host::{HostBridge, HostSignal};
use crate::model::{AppEvent, PowerEvent};
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

pub(crate) fn start_app(
    host: &dyn HostBridge,
    events: &[AppEvent],
    fire: ContextFire,
) -> StopHandle {
    // `ready` is a pseudo-event: registration only happens after host
    // startup, so it fires synchronously instead of waiting for a signal
    // that already passed.
    if events.contains(&AppEvent::Ready) {
        fire_event(&fire, AppEvent::Ready.as_str());
    }
    let wanted: Vec<AppEvent> = events
        .iter()
        .copied()
        .filter(|e| *e != AppEvent::Ready)
        .collect();
    subscribe(host, fire, move |signal| match signal {
        HostSignal::App(e) if wanted.contains(&e) => Some(e.as_str()),
        _ => None,
    })
}

pub(crate) fn start_power(
    host: &dyn HostBridge,
    events: &[PowerEvent],
    fire: ContextFire,
) -> StopHandle {
    let wanted: Vec<PowerEvent> = events.to_vec();
    subscribe(host, fire, move |signal| match signal {
        HostSignal::Power(e) if wanted.contains(&e) => Some(e.as_str()),
        _ => None,
    })
}

fn subscribe(
    host: &dyn HostBridge,
    fire: ContextFire,
    matches: impl Fn(HostSignal) -> Option<&'static str> + Send + 'static,
) -> StopHandle {
    let mut rx = host.signals();
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(signal) => {
                    if let Some(event) = matches(signal) {
                        fire_event(&fire, event);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(dropped = n, "lifecycle trigger lagged behind host signals");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    StopHandle::Task(task)
}

fn fire_event(fire: &ContextFire, event: &str) {
    fire(json!({
        "event": event,
        "firedAt": Utc::now().to_rfc3339(),
    }));
}
