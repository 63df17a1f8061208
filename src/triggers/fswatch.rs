//! Filesystem triggers: general file-change watching and the restricted
//! folder-watch ("new entry") case.
//!
//! Both share one debounce discipline: qualifying low-level events buffer,
//! and a single deadline — pushed out on every qualifying event, untouched
//! by filtered-out noise — flushes the whole buffer as one fire. A directory
//! rewrite storm becomes one run.

use super::{ContextFire, StopHandle};
use crate::model::FsEventKind;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{
    event::{CreateKind, ModifyKind, RenameMode},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use serde_json::{json, Value};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::warn;

const DEFAULT_DEBOUNCE_MS: u64 = 5_000;
const FOLDER_WATCH_DEBOUNCE_MS: u64 = 3_000;

// ─── File-change trigger ─────────────────────────────────────────────────────

pub(crate) fn start_file_change(
    paths: &[PathBuf],
    patterns: &[String],
    event_kinds: &[FsEventKind],
    debounce_ms: Option<u64>,
    fire: ContextFire,
) -> Result<StopHandle> {
    if paths.is_empty() {
        bail!("file-change trigger has no paths");
    }
    let globs = build_globset(patterns)?;
    let kinds = event_kinds.to_vec();
    let debounce = Duration::from_millis(debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

    let (watcher, mut rx) = open_watcher(paths, RecursiveMode::Recursive)?;

    let task = tokio::spawn(async move {
        // Keep the OS watch handles alive for the life of the task.
        let _watcher = watcher;
        let mut buffered: Vec<Value> = vec![];
        let mut flush_at = Instant::now();
        loop {
            if buffered.is_empty() {
                match rx.recv().await {
                    Some(event) => {
                        if buffer_change(&mut buffered, &event, &globs, &kinds) {
                            flush_at = Instant::now() + debounce;
                        }
                    }
                    None => break,
                }
            } else {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            // Noise that doesn't qualify must not starve the
                            // pending flush, so the deadline stays put.
                            if buffer_change(&mut buffered, &event, &globs, &kinds) {
                                flush_at = Instant::now() + debounce;
                            }
                        }
                        None => break,
                    },
                    () = tokio::time::sleep_until(flush_at) => {
                        let changes: Vec<Value> = buffered.drain(..).collect();
                        fire(json!({
                            "changes": changes,
                            "firedAt": Utc::now().to_rfc3339(),
                        }));
                    }
                }
            }
        }
    });
    Ok(StopHandle::Task(task))
}

/// Returns true when the event qualified and the buffer grew — the caller's
/// cue to push the flush deadline out.
fn buffer_change(
    buffered: &mut Vec<Value>,
    event: &notify::Event,
    globs: &Option<GlobSet>,
    kinds: &[FsEventKind],
) -> bool {
    let before = buffered.len();
    let Some(kind) = classify(&event.kind) else {
        return false;
    };
    if !kinds.is_empty() && !kinds.contains(&kind) {
        return false;
    }
    for path in &event.paths {
        if let Some(globs) = globs {
            if !globs.is_match(path) {
                continue;
            }
        }
        buffered.push(json!({
            "path": path.display().to_string(),
            "kind": kind,
        }));
    }
    buffered.len() > before
}

// ─── Folder-watch trigger ────────────────────────────────────────────────────

pub(crate) fn start_folder_watch(
    folder: &Path,
    extensions: &[String],
    name_pattern: Option<&str>,
    min_size_bytes: Option<u64>,
    max_size_bytes: Option<u64>,
    fire: ContextFire,
) -> Result<StopHandle> {
    let name_glob = name_pattern
        .map(|p| Glob::new(p).with_context(|| format!("invalid name pattern `{p}`")))
        .transpose()?
        .map(|g| g.compile_matcher());
    let extensions: Vec<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();

    let (watcher, mut rx) = open_watcher(std::slice::from_ref(&folder.to_path_buf()), RecursiveMode::NonRecursive)?;
    let debounce = Duration::from_millis(FOLDER_WATCH_DEBOUNCE_MS);

    let task = tokio::spawn(async move {
        let _watcher = watcher;
        let mut buffered: Vec<String> = vec![];
        let mut flush_at = Instant::now();
        loop {
            if buffered.is_empty() {
                match rx.recv().await {
                    Some(event) => {
                        if buffer_new_entry(
                            &mut buffered,
                            &event,
                            &extensions,
                            name_glob.as_ref(),
                            min_size_bytes,
                            max_size_bytes,
                        ) {
                            flush_at = Instant::now() + debounce;
                        }
                    }
                    None => break,
                }
            } else {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            if buffer_new_entry(
                                &mut buffered,
                                &event,
                                &extensions,
                                name_glob.as_ref(),
                                min_size_bytes,
                                max_size_bytes,
                            ) {
                                flush_at = Instant::now() + debounce;
                            }
                        }
                        None => break,
                    },
                    () = tokio::time::sleep_until(flush_at) => {
                        let files: Vec<String> = buffered.drain(..).collect();
                        fire(json!({
                            "files": files,
                            "firedAt": Utc::now().to_rfc3339(),
                        }));
                    }
                }
            }
        }
    });
    Ok(StopHandle::Task(task))
}

fn buffer_new_entry(
    buffered: &mut Vec<String>,
    event: &notify::Event,
    extensions: &[String],
    name_glob: Option<&globset::GlobMatcher>,
    min_size_bytes: Option<u64>,
    max_size_bytes: Option<u64>,
) -> bool {
    let before = buffered.len();
    // Only entries appearing in the folder matter — creations and
    // renames-into, never content modifications.
    let is_new_entry = matches!(
        event.kind,
        EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    );
    if !is_new_entry {
        return false;
    }
    for path in &event.paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !extensions.is_empty() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if !ext.is_some_and(|e| extensions.contains(&e)) {
                continue;
            }
        }
        if let Some(glob) = name_glob {
            if !glob.is_match(name) {
                continue;
            }
        }
        if min_size_bytes.is_some() || max_size_bytes.is_some() {
            // Best-effort: an entry that vanished before stat is still reported.
            if let Ok(meta) = std::fs::metadata(path) {
                let size = meta.len();
                if min_size_bytes.is_some_and(|min| size < min)
                    || max_size_bytes.is_some_and(|max| size > max)
                {
                    continue;
                }
            }
        }
        buffered.push(name.to_string());
    }
    buffered.len() > before
}

// ─── Plumbing ────────────────────────────────────────────────────────────────

/// Open one OS watcher over `paths` and bridge its callback into a tokio
/// channel the debounce task can select on.
fn open_watcher(
    paths: &[PathBuf],
    mode: RecursiveMode,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<notify::Event>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!(err = %e, "file watcher error"),
        }
    })
    .context("failed to create file watcher")?;

    for path in paths {
        watcher
            .watch(path, mode)
            .with_context(|| format!("failed to watch {}", path.display()))?;
    }
    Ok((watcher, rx))
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob `{pattern}`"))?);
    }
    Ok(Some(builder.build()?))
}

fn classify(kind: &EventKind) -> Option<FsEventKind> {
    match kind {
        EventKind::Create(_) => Some(FsEventKind::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FsEventKind::Rename),
        EventKind::Modify(_) => Some(FsEventKind::Modify),
        EventKind::Remove(_) => Some(FsEventKind::Remove),
        // Access chatter and catch-all events never qualify.
        _ => None,
    }
}
