//! Batch orchestration tests
//!
//! Drives the coordinator's reconciliation cycle with fabricated
//! enumeration snapshots and real (fast-failing) sessions: no tools are
//! resolved, so every spawned session reaches its terminal state
//! immediately, which is exactly what the lifecycle assertions need.

use std::sync::Arc;
use std::time::Duration;

use flashbrew::backends::Backend;
use flashbrew::coordinator::Coordinator;
use flashbrew::manifest::Manifest;
use flashbrew::models::{AppEvent, EspConfig, PortState, Profile, ProfileConfig};
use flashbrew::tools::Tools;
use tokio::sync::mpsc;

fn esp_profile() -> Arc<Profile> {
    Arc::new(Profile {
        name: "batch-test".into(),
        chip_type: "esp32".into(),
        description: String::new(),
        root: std::env::temp_dir(),
        config: ProfileConfig::Esp(EspConfig::default()),
    })
}

async fn coordinator_with_profile() -> (Coordinator, mpsc::UnboundedReceiver<AppEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(Arc::new(Tools::default()), tx);
    coordinator.select_profile(esp_profile()).await.unwrap();
    (coordinator, rx)
}

fn live(ports: &[&str]) -> Vec<String> {
    ports.iter().map(|p| p.to_string()).collect()
}

/// Collect events until every listed port has finished its session, or the
/// timeout hits.
async fn collect_until_finished(
    rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    ports: &[&str],
) -> Vec<AppEvent> {
    let mut events = Vec::new();
    let mut remaining: std::collections::HashSet<String> =
        ports.iter().map(|p| p.to_string()).collect();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !remaining.is_empty() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => {
                if let AppEvent::SessionFinished(port, _) = &event {
                    remaining.remove(port);
                }
                events.push(event);
            }
            _ => break,
        }
    }
    events
}

/// Drain events until the wanted session finishes or the timeout hits.
async fn wait_session_finished(rx: &mut mpsc::UnboundedReceiver<AppEvent>, port: &str) -> bool {
    let events = collect_until_finished(rx, &[port]).await;
    events
        .iter()
        .any(|e| matches!(e, AppEvent::SessionFinished(p, _) if p == port))
}

fn count_started(events: &[AppEvent], port: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AppEvent::SessionStarted(p) if p == port))
        .count()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn new_port_is_flashed_once_and_ends_idle() {
    // Scenario: batch started with zero live ports, then one appears.
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&[])).await;
    coordinator.start_batch().await;

    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    assert!(wait_session_finished(&mut rx, "ttyUSB0").await);
    // Session completed: working -> idle, never back to init.
    assert_eq!(
        coordinator.port_state("ttyUSB0").await,
        Some(PortState::Idle)
    );

    // The completed port stays idle on later cycles, not re-claimed.
    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        coordinator.port_state("ttyUSB0").await,
        Some(PortState::Idle)
    );
    let events = drain(&mut rx);
    assert_eq!(count_started(&events, "ttyUSB0"), 0);

    let records = coordinator.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "ttyUSB0");
    assert!(records[0].1.done);
}

#[tokio::test]
async fn init_ports_are_never_auto_claimed_while_present() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    coordinator.start_batch().await;

    for _ in 0..3 {
        coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        coordinator.port_state("ttyUSB0").await,
        Some(PortState::Init)
    );
    let events = drain(&mut rx);
    assert_eq!(count_started(&events, "ttyUSB0"), 0);
    assert!(coordinator.records().await.is_empty());
}

#[tokio::test]
async fn removed_init_port_is_flashed_on_reappearance() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    coordinator.start_batch().await;

    // Unplug: the port leaves init entirely.
    coordinator.reconcile_with(live(&[])).await;
    assert_eq!(coordinator.port_state("ttyUSB0").await, None);

    // Replug: now it is genuinely new and gets a session.
    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    assert!(wait_session_finished(&mut rx, "ttyUSB0").await);
    assert_eq!(
        coordinator.port_state("ttyUSB0").await,
        Some(PortState::Idle)
    );
}

#[tokio::test]
async fn each_port_gets_exactly_one_session_per_insertion() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&[])).await;
    coordinator.start_batch().await;

    // The same live snapshot arriving repeatedly must not spawn twice: a
    // port is claimed as working before its session task even starts, and
    // once finished it rests in idle.
    for _ in 0..4 {
        coordinator.reconcile_with(live(&["ttyACM0", "ttyACM1"])).await;
    }
    let mut events = collect_until_finished(&mut rx, &["ttyACM0", "ttyACM1"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    events.extend(drain(&mut rx));

    assert_eq!(count_started(&events, "ttyACM0"), 1);
    assert_eq!(count_started(&events, "ttyACM1"), 1);
    assert_eq!(coordinator.records().await.len(), 2);
}

#[tokio::test]
async fn stopping_batch_suppresses_new_spawns() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&[])).await;
    coordinator.start_batch().await;
    coordinator.stop_batch().await;

    coordinator.reconcile_with(live(&["ttyUSB7"])).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.port_state("ttyUSB7").await, None);
    let events = drain(&mut rx);
    assert_eq!(count_started(&events, "ttyUSB7"), 0);
    assert!(coordinator.records().await.is_empty());
}

#[tokio::test]
async fn tracked_ports_are_a_subset_of_live_after_each_cycle() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&["a", "b"])).await;
    coordinator.start_batch().await;

    let snapshots: Vec<Vec<String>> = vec![
        live(&["a", "b", "c"]),
        live(&["a", "c"]),
        live(&["c", "d"]),
        live(&[]),
        live(&["a"]),
    ];
    for snapshot in snapshots {
        coordinator.reconcile_with(snapshot.clone()).await;
        // Let any session spawned for this snapshot reach its terminal
        // state, then re-run the cycle so its bookkeeping is settled.
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.reconcile_with(snapshot.clone()).await;
        for port in ["a", "b", "c", "d"] {
            if coordinator.port_state(port).await.is_some() {
                assert!(
                    snapshot.contains(&port.to_string()),
                    "{} tracked but not live",
                    port
                );
            }
        }
    }
    drain(&mut rx);
}

#[tokio::test]
async fn removed_ports_drop_their_display_records() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&[])).await;
    coordinator.start_batch().await;

    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    assert!(wait_session_finished(&mut rx, "ttyUSB0").await);
    assert_eq!(coordinator.records().await.len(), 1);

    coordinator.reconcile_with(live(&[])).await;
    assert!(coordinator.records().await.is_empty());
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AppEvent::PortsRemoved(ports) if ports == &vec!["ttyUSB0".to_string()]
    )));
}

#[tokio::test]
async fn live_ports_are_published_without_batch_mode() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    coordinator.reconcile_with(live(&["ttyUSB0"])).await;
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AppEvent::PortsUpdated(ports) if ports == &vec!["ttyUSB0".to_string()]
    )));
    // No batch started: nothing is tracked or spawned.
    assert_eq!(coordinator.port_state("ttyUSB0").await, None);
    assert_eq!(coordinator.live_ports().await, vec!["ttyUSB0"]);
}

#[tokio::test]
async fn unsupported_profile_cannot_become_the_active_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(
        &path,
        r#"{"Custom": {"type": "bogus", "description": "unknown"}}"#,
    )
    .unwrap();

    let manifest = Manifest::load(&path).unwrap();
    assert_eq!(
        manifest.logs,
        vec!["Unsupported chip type \"bogus\" in profile \"Custom\""]
    );

    let profile = manifest.get("Custom").unwrap();
    assert_eq!(Backend::for_profile(&profile), None);

    let (tx, _rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(Arc::new(Tools::default()), tx);
    let err = coordinator.select_profile(profile).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unsupported chip type \"bogus\" in profile \"Custom\""
    );
}

#[tokio::test]
async fn single_flash_reaches_a_terminal_failed_state_without_tools() {
    let (coordinator, mut rx) = coordinator_with_profile().await;
    let ctx = coordinator.flash_once("ttyUSB0".to_string()).await.unwrap();
    assert!(ctx.done);
    assert_eq!(ctx.ok, Some(false));
    assert_eq!(ctx.progress, 0);
    assert_eq!(ctx.logs.last().map(String::as_str), Some("Error"));

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, AppEvent::SessionFinished(p, false) if p == "ttyUSB0")));
}
