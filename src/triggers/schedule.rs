//! Schedule trigger — recurrence expression + timezone.
//!
//! Next-fire computation is delegated to the `cron` crate; we only ask for
//! upcoming occurrences and sleep until each one.

use super::{ContextFire, StopHandle};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::json;
use std::str::FromStr;
use tracing::{debug, warn};

pub(crate) fn start(
    expression: &str,
    timezone: Option<&str>,
    fire: ContextFire,
) -> Result<StopHandle> {
    let expression = expression.trim().to_string();
    if expression.is_empty() {
        bail!("schedule trigger has no expression");
    }
    let schedule = Schedule::from_str(&expression)
        .with_context(|| format!("invalid recurrence expression `{expression}`"))?;

    let tz: Tz = match timezone {
        Some(name) => match name.parse() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(timezone = name, "unknown timezone, falling back to UTC");
                Tz::UTC
            }
        },
        None => Tz::UTC,
    };

    let task = tokio::spawn(async move {
        loop {
            let now = Utc::now().with_timezone(&tz);
            let mut upcoming = schedule.after(&now);
            let Some(next) = upcoming.next() else {
                debug!(expression, "schedule has no further occurrences");
                break;
            };
            let next_after = upcoming.next();

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            fire(json!({
                "expression": expression,
                "firedAt": Utc::now().to_rfc3339(),
                "nextRunAt": next_after.map(|t| t.to_rfc3339()),
            }));
        }
    });
    Ok(StopHandle::Task(task))
}
