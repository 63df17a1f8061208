//! Integration tests for the trigger registry: subscription bookkeeping and
//! the fire behavior of the kinds that can be driven without a real host.

mod common;

use common::{wait_until, MockHost};
use std::sync::{atomic::Ordering, Arc, Mutex};
use std::time::Duration;
use triggerd::{
    host::HostSignal,
    model::{ActionConfig, AppEvent, Automation, FsEventKind, PowerEvent, TriggerConfig, TriggerKind},
    triggers::{FireEvent, FireFn, TriggerRegistry},
};

struct Harness {
    host: Arc<MockHost>,
    registry: TriggerRegistry,
    fires: Arc<Mutex<Vec<FireEvent>>>,
}

fn harness() -> Harness {
    let host = MockHost::new();
    let fires: Arc<Mutex<Vec<FireEvent>>> = Arc::new(Mutex::new(vec![]));
    let sink = fires.clone();
    let fire: FireFn = Arc::new(move |event| sink.lock().unwrap().push(event));
    let registry = TriggerRegistry::new(host.clone(), fire);
    Harness {
        host,
        registry,
        fires,
    }
}

impl Harness {
    fn fire_count(&self) -> usize {
        self.fires.lock().unwrap().len()
    }
}

fn automation(trigger: TriggerConfig) -> Automation {
    let mut automation = Automation::new(
        "ws-test",
        "registry test",
        "Do something",
        trigger,
        ActionConfig::default(),
    );
    automation.enabled = true;
    automation
}

/// The folder-watch debounce window is longer than [`wait_until`] tolerates.
async fn wait_long(mut condition: impl FnMut() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 6s");
}

// ── Bookkeeping ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn disabled_automations_are_never_registered() {
    let h = harness();
    let mut a = automation(TriggerConfig::Manual {});
    a.trigger = TriggerConfig::Clipboard {
        pattern: None,
        poll_interval_ms: Some(50),
    };
    a.enabled = false;
    h.registry.register(&a).await;
    assert!(!h.registry.is_registered(&a.id).await);
    assert_eq!(h.registry.active_count().await, 0);
}

#[tokio::test]
async fn dispatcher_satisfied_kinds_have_no_subscription() {
    let h = harness();
    for trigger in [
        TriggerConfig::Manual {},
        TriggerConfig::DeepLink {},
        TriggerConfig::Webhook {
            path: "/hooks/build".into(),
            secret: None,
        },
    ] {
        let a = automation(trigger);
        h.registry.register(&a).await;
        assert!(!h.registry.is_registered(&a.id).await);
    }
    assert_eq!(h.registry.active_count().await, 0);
}

#[tokio::test]
async fn failed_registration_is_isolated() {
    let h = harness();
    // bad recurrence expression
    let bad_schedule = automation(TriggerConfig::Schedule {
        expression: "every other tuesday".into(),
        timezone: None,
    });
    h.registry.register(&bad_schedule).await;
    assert!(!h.registry.is_registered(&bad_schedule.id).await);

    // bad clipboard regex
    let bad_pattern = automation(TriggerConfig::Clipboard {
        pattern: Some("[unclosed".into()),
        poll_interval_ms: Some(50),
    });
    h.registry.register(&bad_pattern).await;
    assert!(!h.registry.is_registered(&bad_pattern.id).await);

    // a good one still registers afterwards
    let good = automation(TriggerConfig::Schedule {
        expression: "0 0 * * * *".into(),
        timezone: Some("Europe/Berlin".into()),
    });
    h.registry.register(&good).await;
    assert!(h.registry.is_registered(&good.id).await);
    assert_eq!(h.registry.active_count().await, 1);
}

#[tokio::test]
async fn unregister_all_tears_everything_down() {
    let h = harness();
    let a = automation(TriggerConfig::Clipboard {
        pattern: None,
        poll_interval_ms: Some(50),
    });
    let b = automation(TriggerConfig::Hotkey {
        accelerator: "Ctrl+Shift+K".into(),
    });
    h.registry.register(&a).await;
    h.registry.register(&b).await;
    assert_eq!(h.registry.active_count().await, 2);
    assert_eq!(h.host.bound_count(), 1);

    h.registry.unregister_all().await;
    assert_eq!(h.registry.active_count().await, 0);
    assert_eq!(h.host.bound_count(), 0);
}

// ── Clipboard ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn clipboard_fires_on_new_matching_content_only() {
    let h = harness();
    // content present at registration is "already seen"
    h.host.set_clipboard("https://seeded.example");
    let a = automation(TriggerConfig::Clipboard {
        pattern: Some("^https?://".into()),
        poll_interval_ms: Some(50),
    });
    h.registry.register(&a).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.fire_count(), 0);

    h.host.set_clipboard("https://example.com/article");
    wait_until(|| h.fire_count() == 1).await;
    {
        let fires = h.fires.lock().unwrap();
        assert_eq!(fires[0].automation_id, a.id);
        assert_eq!(fires[0].kind, TriggerKind::Clipboard);
        assert_eq!(
            fires[0].context["content"],
            "https://example.com/article"
        );
    }

    // unchanged content never re-fires
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.fire_count(), 1);

    // non-matching content is observed but not fired...
    h.host.set_clipboard("grocery list");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.fire_count(), 1);

    // ...and a later match fires again
    h.host.set_clipboard("http://example.com/next");
    wait_until(|| h.fire_count() == 2).await;
}

#[tokio::test]
async fn reregistration_replaces_the_previous_subscription() {
    let h = harness();
    h.host.set_clipboard("baseline");
    let a = automation(TriggerConfig::Clipboard {
        pattern: None,
        poll_interval_ms: Some(50),
    });
    h.registry.register(&a).await;
    h.registry.register(&a).await;
    assert_eq!(h.registry.active_count().await, 1);

    h.host.set_clipboard("one change");
    wait_until(|| h.fire_count() >= 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    // a single poller — not two
    assert_eq!(h.fire_count(), 1);
}

#[tokio::test]
async fn unregister_stops_the_poller() {
    let h = harness();
    h.host.set_clipboard("baseline");
    let a = automation(TriggerConfig::Clipboard {
        pattern: None,
        poll_interval_ms: Some(50),
    });
    h.registry.register(&a).await;
    h.registry.unregister(&a.id).await;
    assert!(!h.registry.is_registered(&a.id).await);

    h.host.set_clipboard("should go unnoticed");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.fire_count(), 0);
}

// ── Hotkey ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hotkey_binds_and_fires_on_press() {
    let h = harness();
    let a = automation(TriggerConfig::Hotkey {
        accelerator: "CmdOrCtrl+Shift+K".into(),
    });
    h.registry.register(&a).await;
    assert_eq!(h.host.bound_count(), 1);

    h.host.press("CmdOrCtrl+Shift+K");
    assert_eq!(h.fire_count(), 1);
    {
        let fires = h.fires.lock().unwrap();
        assert_eq!(fires[0].kind, TriggerKind::Hotkey);
        assert_eq!(fires[0].context["accelerator"], "CmdOrCtrl+Shift+K");
    }

    h.registry.unregister(&a.id).await;
    assert_eq!(h.host.bound_count(), 0);
    h.host.press("CmdOrCtrl+Shift+K");
    assert_eq!(h.fire_count(), 1);
}

#[tokio::test]
async fn hotkey_bind_failure_leaves_nothing_registered() {
    let h = harness();
    h.host.fail_binds.store(true, Ordering::SeqCst);
    let a = automation(TriggerConfig::Hotkey {
        accelerator: "Ctrl+Alt+P".into(),
    });
    h.registry.register(&a).await;
    assert!(!h.registry.is_registered(&a.id).await);
    assert_eq!(h.host.bound_count(), 0);
}

#[tokio::test]
async fn malformed_accelerator_is_rejected() {
    let h = harness();
    let a = automation(TriggerConfig::Hotkey {
        accelerator: "Ctrl++".into(),
    });
    h.registry.register(&a).await;
    assert!(!h.registry.is_registered(&a.id).await);
    assert_eq!(h.host.bound_count(), 0);
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn app_ready_fires_synchronously_at_registration() {
    let h = harness();
    let a = automation(TriggerConfig::AppLifecycle {
        events: vec![AppEvent::Ready, AppEvent::Activated],
    });
    h.registry.register(&a).await;
    // no signal needed — registration happens after host startup
    assert_eq!(h.fire_count(), 1);
    assert_eq!(h.fires.lock().unwrap()[0].context["event"], "ready");

    h.host.emit(HostSignal::App(AppEvent::Activated));
    wait_until(|| h.fire_count() == 2).await;
    assert_eq!(h.fires.lock().unwrap()[1].context["event"], "activated");

    // not in the configured set
    h.host.emit(HostSignal::App(AppEvent::BeforeQuit));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.fire_count(), 2);
}

#[tokio::test]
async fn power_events_are_filtered_to_the_configured_set() {
    let h = harness();
    let a = automation(TriggerConfig::PowerLifecycle {
        events: vec![PowerEvent::Suspend, PowerEvent::OnBattery],
    });
    h.registry.register(&a).await;

    h.host.emit(HostSignal::Power(PowerEvent::Suspend));
    wait_until(|| h.fire_count() == 1).await;
    assert_eq!(h.fires.lock().unwrap()[0].context["event"], "suspend");
    assert_eq!(h.fires.lock().unwrap()[0].kind, TriggerKind::PowerLifecycle);

    h.host.emit(HostSignal::Power(PowerEvent::Resume));
    h.host.emit(HostSignal::App(AppEvent::Activated));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.fire_count(), 1);
}

// ── Filesystem ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_changes_are_batched_into_one_fire() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let a = automation(TriggerConfig::FileChange {
        paths: vec![dir.path().to_path_buf()],
        patterns: vec!["**/*.md".into()],
        event_kinds: vec![FsEventKind::Create],
        debounce_ms: Some(200),
    });
    h.registry.register(&a).await;
    assert!(h.registry.is_registered(&a.id).await);
    // let the OS watch settle before producing events
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(dir.path().join("one.md"), "a").unwrap();
    std::fs::write(dir.path().join("two.md"), "b").unwrap();
    std::fs::write(dir.path().join("three.md"), "c").unwrap();
    std::fs::write(dir.path().join("ignored.txt"), "d").unwrap();

    wait_until(|| h.fire_count() >= 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    // the burst collapsed into a single fire
    assert_eq!(h.fire_count(), 1);

    let fires = h.fires.lock().unwrap();
    assert_eq!(fires[0].kind, TriggerKind::FileChange);
    let changes = fires[0].context["changes"].as_array().unwrap().clone();
    let paths: Vec<&str> = changes.iter().map(|c| c["path"].as_str().unwrap()).collect();
    for name in ["one.md", "two.md", "three.md"] {
        assert!(paths.iter().any(|p| p.ends_with(name)), "missing {name}");
    }
    assert!(!paths.iter().any(|p| p.ends_with("ignored.txt")));
    assert!(changes.iter().all(|c| c["kind"] == "create"));
}

#[tokio::test]
async fn filtered_out_churn_does_not_starve_the_flush() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let a = automation(TriggerConfig::FileChange {
        paths: vec![dir.path().to_path_buf()],
        patterns: vec!["**/*.md".into()],
        event_kinds: vec![],
        debounce_ms: Some(300),
    });
    h.registry.register(&a).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(dir.path().join("one.md"), "a").unwrap();
    // sustained noise that never matches the glob, arriving faster than the
    // debounce window for longer than the window itself
    let noise_dir = dir.path().to_path_buf();
    let churn = tokio::spawn(async move {
        for i in 0..20 {
            std::fs::write(noise_dir.join(format!("noise-{i}.txt")), "x").unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    // the buffered markdown change still flushes after its quiet period
    wait_until(|| h.fire_count() >= 1).await;
    churn.abort();

    let fires = h.fires.lock().unwrap();
    let changes = fires[0].context["changes"].as_array().unwrap();
    assert!(changes
        .iter()
        .all(|c| c["path"].as_str().unwrap().ends_with(".md")));
}

#[tokio::test]
async fn empty_file_change_path_list_is_rejected() {
    let h = harness();
    let a = automation(TriggerConfig::FileChange {
        paths: vec![],
        patterns: vec![],
        event_kinds: vec![],
        debounce_ms: None,
    });
    h.registry.register(&a).await;
    assert!(!h.registry.is_registered(&a.id).await);
}

#[tokio::test]
async fn folder_watch_reports_only_matching_new_entries() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let a = automation(TriggerConfig::FolderWatch {
        folder: dir.path().to_path_buf(),
        extensions: vec!["pdf".into()],
        name_pattern: None,
        min_size_bytes: None,
        max_size_bytes: None,
    });
    h.registry.register(&a).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(dir.path().join("invoice.PDF"), "x").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "y").unwrap();

    wait_long(|| h.fire_count() >= 1).await;
    let fires = h.fires.lock().unwrap();
    assert_eq!(fires[0].kind, TriggerKind::FolderWatch);
    let files = fires[0].context["files"].as_array().unwrap().clone();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0], "invoice.PDF");
}
