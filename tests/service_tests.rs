mod common;

use common::{press, send_code, RecordingTransport};
use deskctl::protocol::CODE_IDLE;
use deskctl::transport::TransportEvent;
use deskctl::*;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

struct Harness {
    handle: DeskHandle,
    events: mpsc::Sender<TransportEvent>,
    snapshots: broadcast::Receiver<DeskSnapshot>,
    transport: RecordingTransport,
    task: JoinHandle<Desk<RecordingTransport>>,
}

fn start_service() -> Harness {
    let config = DeskConfig::default();
    let transport = RecordingTransport::new();
    let (events_tx, events_rx) = mpsc::channel(64);
    let desk = Desk::new(transport.clone(), &config);
    let (service, handle) = DeskService::new(desk, events_rx, &config);
    let snapshots = handle.subscribe();
    let task = tokio::spawn(service.run());

    Harness {
        handle,
        events: events_tx,
        snapshots,
        transport,
        task,
    }
}

async fn wait_for(snapshots: &mut broadcast::Receiver<DeskSnapshot>, done: impl Fn(&DeskSnapshot) -> bool) -> DeskSnapshot {
    loop {
        let snapshot = snapshots.recv().await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_publishes_and_resends_reset() {
    let mut h = start_service();
    h.handle.connect().await.unwrap();

    let snapshot = wait_for(&mut h.snapshots, |_| true).await;
    assert_eq!(snapshot.state, DeskState::Invalid);
    assert_eq!(h.transport.sent(), vec![vec![0x77]]);

    // No answer from the controller, so the reset repeats every two seconds
    tokio::time::sleep(Duration::from_millis(2100)).await;
    h.handle.snapshot().await.unwrap();
    assert_eq!(h.transport.sent(), vec![vec![0x77], vec![0x77]]);

    let stats = h.handle.scheduler_stats().await.unwrap();
    assert_eq!(stats.total_fired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_held_button_is_resent_while_busy() {
    let mut h = start_service();
    h.handle.connect().await.unwrap();

    send_code(&h.events, 11).await;
    wait_for(&mut h.snapshots, |s| s.state == DeskState::Ready).await;

    h.handle.toggle_button(DeskButton::Up).await.unwrap();
    wait_for(&mut h.snapshots, |s| s.active_button == DeskButton::Up).await;

    send_code(&h.events, 450).await;
    let snapshot = wait_for(&mut h.snapshots, |s| s.state == DeskState::Busy).await;
    assert_eq!(snapshot.height, 450);
    assert_eq!(snapshot.height_label(), "45.0cm");
    h.transport.take_sent();

    tokio::time::sleep(Duration::from_millis(460)).await;
    h.handle.snapshot().await.unwrap();

    let sent = h.transport.take_sent();
    assert!(sent.len() >= 3, "expected at least three resends, got {:?}", sent);
    assert!(sent.iter().all(|bytes| *bytes == press(0b100)));
}

#[tokio::test(start_paused = true)]
async fn test_idle_reports_end_a_free_run() {
    let mut h = start_service();
    h.handle.connect().await.unwrap();

    // Height while invalid reads as ready
    send_code(&h.events, 720).await;
    wait_for(&mut h.snapshots, |s| s.state == DeskState::Ready).await;

    // Movement without any button held, e.g. from the physical keypad
    send_code(&h.events, 725).await;
    wait_for(&mut h.snapshots, |s| s.state == DeskState::Busy).await;

    for _ in 0..3 {
        send_code(&h.events, CODE_IDLE).await;
    }
    let snapshot = wait_for(&mut h.snapshots, |s| s.state == DeskState::Ready).await;
    assert_eq!(snapshot.active_button, DeskButton::None);
    assert_eq!(snapshot.height, 725);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_all_traffic() {
    let mut h = start_service();
    h.handle.connect().await.unwrap();
    send_code(&h.events, 11).await;
    wait_for(&mut h.snapshots, |s| s.state == DeskState::Ready).await;

    h.handle.disconnect().await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, DeskState::Invalid);
    h.transport.take_sent();

    tokio::time::sleep(Duration::from_secs(10)).await;
    h.handle.snapshot().await.unwrap();
    assert!(h.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_published() {
    let mut h = start_service();
    h.handle.connect().await.unwrap();
    send_code(&h.events, 11).await;
    wait_for(&mut h.snapshots, |s| s.state == DeskState::Ready).await;

    h.transport.drop_link();
    h.events
        .send(TransportEvent::ConnectionStateChanged {
            is_open: false,
            error: Some("Input/output error".to_string()),
        })
        .await
        .unwrap();

    let snapshot = wait_for(&mut h.snapshots, |s| s.error_message.is_some()).await;
    assert_eq!(snapshot.state, DeskState::Invalid);

    // Manual reconnect is the only way back
    h.handle.connect().await.unwrap();
    let snapshot = wait_for(&mut h.snapshots, |s| s.error_message.is_none()).await;
    assert_eq!(snapshot.state, DeskState::Invalid);
    assert_eq!(h.transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_returns_closed_desk() {
    let h = start_service();
    h.handle.connect().await.unwrap();
    h.handle.shutdown().await.unwrap();

    let desk = h.task.await.unwrap();
    assert!(!desk.is_connected());
    assert!(h.handle.snapshot().await.is_err());
}
