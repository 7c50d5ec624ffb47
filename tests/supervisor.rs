mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{FakeCentral, NOTIFY_HANDLE, Peripheral, WRITE_HANDLE, config, eventually};
use microbit_uart_bridge_lib::core::bluetooth::constants::{RETRY_AFTER_FAILURE_MS, RETRY_AFTER_SESSION_MS};
use microbit_uart_bridge_lib::core::bluetooth::{LinkError, LinkState, SessionSettings, SessionSupervisor};
use microbit_uart_bridge_lib::core::clock::MonotonicClock;
use microbit_uart_bridge_lib::core::controller::{LedController, Role};
use microbit_uart_bridge_lib::core::gpio::NullOutput;

fn supervisor(peripheral: &Arc<Peripheral>) -> SessionSupervisor {
    let central = Arc::new(FakeCentral {
        peripheral: peripheral.clone(),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    let led = LedController::new(Role::Controller, Box::new(NullOutput), tx);
    SessionSupervisor::new(
        central,
        SessionSettings::from(&config(Role::Controller)),
        Arc::new(Mutex::new(led)),
        rx,
        Arc::new(MonotonicClock::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_no_peer_in_range_retries_after_failure_delay() {
    let peripheral = Peripheral::microbit();
    peripheral.present.store(false, Ordering::SeqCst);
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);

    let started = Instant::now();
    let outcome = sup.run_once().await;
    assert!(!outcome.reached_active);
    assert!(matches!(outcome.error, LinkError::ScanTimeout(20_000)));
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(20_000 + RETRY_AFTER_FAILURE_MS)
    );

    let outcome = sup.run_once().await;
    assert!(matches!(outcome.error, LinkError::ScanTimeout(_)));
    assert_eq!(peripheral.scan_count(), 2);
    assert_eq!(sup.attempts(), 2);
    assert_eq!(peripheral.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_link_lost_rescans_within_one_delay() {
    let peripheral = Arc::new(Peripheral::microbit());
    let sup = supervisor(&peripheral);
    let state = sup.state_receiver();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(sup.run_until_cancelled(cancel.clone()));

    eventually(|| *state.borrow() == LinkState::Active).await;
    let lost_at = Instant::now();
    peripheral.notify(Err(LinkError::LinkLost("supervision timeout".into())));

    eventually(|| peripheral.scan_count() == 2).await;
    let rescan_at = peripheral.scans.lock().unwrap()[1];
    assert!(rescan_at - lost_at <= Duration::from_millis(RETRY_AFTER_SESSION_MS));

    eventually(|| *state.borrow() == LinkState::Active).await;
    assert_eq!(peripheral.connects.load(Ordering::SeqCst), 2);
    assert!(!task.is_finished());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_peer_ends_session_on_receive_error() {
    let peripheral = Arc::new(Peripheral::microbit());
    let mut sup = supervisor(&peripheral);
    let state = sup.state_receiver();
    let p = peripheral.clone();
    let driver = tokio::spawn(async move {
        eventually(|| *state.borrow() == LinkState::Active).await;
        p.connected.store(false, Ordering::SeqCst);
        p.notify(Err(LinkError::transport("GATT error")));
    });

    let outcome = sup.run_once().await;
    driver.await.unwrap();
    assert!(outcome.reached_active);
    assert!(matches!(outcome.error, LinkError::LinkLost(_)));
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_waits_failure_delay_then_recovers() {
    let peripheral = Arc::new(Peripheral::microbit());
    *peripheral.connect_error.lock().unwrap() = Some(LinkError::ConnectRefused("busy".into()));
    let mut sup = supervisor(&peripheral);
    let state = sup.state_receiver();

    let started = Instant::now();
    let outcome = sup.run_once().await;
    assert!(!outcome.reached_active);
    assert!(matches!(outcome.error, LinkError::ConnectRefused(_)));
    assert_eq!(started.elapsed(), Duration::from_millis(RETRY_AFTER_FAILURE_MS));
    assert_eq!(*state.borrow(), LinkState::Idle);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(sup.run_until_cancelled(cancel.clone()));
    eventually(|| *state.borrow() == LinkState::Active).await;
    cancel.cancel();
    task.await.unwrap();
    assert_eq!(*state.borrow(), LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_cccd_offsets_fail_the_attempt() {
    let mut peripheral = Peripheral::microbit();
    peripheral.subscribe_fails = true;
    peripheral.raw_writes = true;
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);

    let outcome = sup.run_once().await;
    assert!(!outcome.reached_active);
    assert!(matches!(outcome.error, LinkError::SubscribeFailed(_)));

    let tried: Vec<u16> = peripheral
        .writes
        .lock()
        .unwrap()
        .iter()
        .filter(|w| w.handle != WRITE_HANDLE)
        .map(|w| w.handle.0 - NOTIFY_HANDLE.0)
        .collect();
    assert_eq!(tried, vec![1, 2, 3]);
    assert!(!peripheral.connected.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_without_raw_writes_skips_fallback() {
    let mut peripheral = Peripheral::microbit();
    peripheral.subscribe_fails = true;
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);

    let outcome = sup.run_once().await;
    assert!(matches!(outcome.error, LinkError::SubscribeFailed(_)));
    assert!(peripheral.writes.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_subscribe_fails_the_attempt() {
    let mut peripheral = Peripheral::microbit();
    peripheral.subscribe_hangs = true;
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);
    let write_ms = config(Role::Controller).write_ms;

    let started = Instant::now();
    let outcome = sup.run_once().await;
    assert!(!outcome.reached_active);
    assert!(matches!(outcome.error, LinkError::SubscribeFailed(_)));
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(write_ms + RETRY_AFTER_FAILURE_MS)
    );
    assert_eq!(sup.attempts(), 1);
    assert!(!peripheral.connected.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_hung_disconnect_is_bounded() {
    let mut peripheral = Peripheral::microbit();
    peripheral.subscribe_fails = true;
    peripheral.disconnect_hangs = true;
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);
    let state = sup.state_receiver();
    let disconnect_ms = config(Role::Controller).disconnect_ms;

    let started = Instant::now();
    let outcome = sup.run_once().await;
    assert!(matches!(outcome.error, LinkError::SubscribeFailed(_)));
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(disconnect_ms + RETRY_AFTER_FAILURE_MS)
    );
    assert_eq!(*state.borrow(), LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_rescans_after_failure_delay() {
    let mut peripheral = Peripheral::microbit();
    peripheral.connect_hangs = true;
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);
    let connect_ms = config(Role::Controller).connect_ms;

    let started = Instant::now();
    let outcome = sup.run_once().await;
    assert!(!outcome.reached_active);
    assert_eq!(outcome.error, LinkError::ConnectTimeout(connect_ms));
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(connect_ms + RETRY_AFTER_FAILURE_MS)
    );
    assert!(!peripheral.connected.load(Ordering::SeqCst));

    sup.run_once().await;
    assert_eq!(peripheral.scan_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic_fails_discovery_and_disconnects() {
    let mut peripheral = Peripheral::microbit();
    peripheral.missing_write_char = true;
    let peripheral = Arc::new(peripheral);
    let mut sup = supervisor(&peripheral);

    let started = Instant::now();
    let outcome = sup.run_once().await;
    assert!(!outcome.reached_active);
    assert!(matches!(outcome.error, LinkError::DiscoveryFailed(_)));
    assert_eq!(started.elapsed(), Duration::from_millis(RETRY_AFTER_FAILURE_MS));
    assert!(!peripheral.connected.load(Ordering::SeqCst));
    // Discovery is not retried within the attempt: nothing was subscribed or written.
    assert!(peripheral.writes.lock().unwrap().is_empty());

    sup.run_once().await;
    assert_eq!(peripheral.scan_count(), 2);
    assert_eq!(peripheral.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_link_lost_during_setup_ends_attempt_at_any_step() {
    for step in [
        LinkState::DiscoveringServices,
        LinkState::DiscoveringCharacteristics,
        LinkState::SubscribingRx,
    ] {
        let mut peripheral = Peripheral::microbit();
        peripheral.lose_link_in = Some(step);
        let peripheral = Arc::new(peripheral);
        let mut sup = supervisor(&peripheral);
        let state = sup.state_receiver();

        let started = Instant::now();
        let outcome = sup.run_once().await;
        assert!(!outcome.reached_active, "{step}");
        assert!(matches!(outcome.error, LinkError::LinkLost(_)), "{step}: {:?}", outcome.error);
        assert_eq!(started.elapsed(), Duration::from_millis(RETRY_AFTER_FAILURE_MS), "{step}");
        assert!(!peripheral.connected.load(Ordering::SeqCst), "{step}");
        assert_eq!(*state.borrow(), LinkState::Idle);
    }
}
