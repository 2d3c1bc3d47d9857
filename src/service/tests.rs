//! Service connection tests
//!
//! Drives `ServiceConnection` against the in-process mock worker.

use std::sync::Arc;
use tokio::time::{sleep, Duration};

use super::*;
use crate::worker::{MockWorker, MockWorkerConnector, TrafficStats, WorkerEvent};

const WAIT: Duration = Duration::from_secs(2);

fn setup(state: ServiceState) -> (Arc<MockWorkerConnector>, ServiceConnection) {
    setup_with(
        state,
        ReconnectPolicy {
            attempts: 3,
            backoff: Duration::from_millis(10),
        },
    )
}

fn setup_with(
    state: ServiceState,
    policy: ReconnectPolicy,
) -> (Arc<MockWorkerConnector>, ServiceConnection) {
    let connector = Arc::new(MockWorkerConnector::new(Arc::new(MockWorker::with_state(state))));
    let connection = ServiceConnection::new(connector.clone(), policy);
    (connector, connection)
}

fn slow_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        attempts: 5,
        backoff: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn test_connect_reconciles_current_state() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());

    connection.connect(callback.clone()).await.unwrap();

    assert_eq!(
        callback.records(),
        vec![CallbackRecord::StateChanged {
            state: ServiceState::Connected,
            profile_name: None,
            error: None,
        }]
    );
    assert_eq!(connection.state(), ServiceState::Connected);
    assert!(connection.can_stop());
    assert_eq!(connector.worker().register_calls(), 1);
}

#[tokio::test]
async fn test_connect_twice_is_idempotent() {
    let (connector, connection) = setup(ServiceState::Idle);
    let callback = Arc::new(RecordingCallback::new());

    connection.connect(callback.clone()).await.unwrap();
    connection.connect(callback.clone()).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.bind_calls(), 1);
    assert_eq!(connector.worker().register_calls(), 1);
    assert_eq!(callback.len(), 1);
}

#[tokio::test]
async fn test_connect_with_new_target_replaces_slot() {
    let (connector, connection) = setup(ServiceState::Idle);
    let first = Arc::new(RecordingCallback::new());
    let second = Arc::new(RecordingCallback::new());

    connection.connect(first.clone()).await.unwrap();
    connection.connect(second.clone()).await.unwrap();
    assert_eq!(connector.bind_calls(), 1);
    assert_eq!(second.states(), vec![ServiceState::Idle]);

    connector
        .worker()
        .emit(WorkerEvent::TrafficPersisted { profile_id: 3 })
        .await;
    assert!(second.wait_for(2, WAIT).await);
    assert_eq!(first.len(), 1);
}

#[tokio::test]
async fn test_start_follows_worker_transitions() {
    let (_connector, connection) = setup(ServiceState::Idle);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    assert!(connection.start().await);
    assert!(callback.wait_for(3, WAIT).await);

    assert_eq!(
        callback.states(),
        vec![
            ServiceState::Idle,
            ServiceState::Connecting,
            ServiceState::Connected
        ]
    );
    assert_eq!(connection.state(), ServiceState::Connected);
    assert!(callback.errors().is_empty());
}

#[tokio::test]
async fn test_stop_outside_can_stop_sends_nothing() {
    let (connector, connection) = setup(ServiceState::Idle);
    connection
        .connect(Arc::new(RecordingCallback::new()))
        .await
        .unwrap();

    assert!(!connection.can_stop());
    assert!(!connection.stop().await);
    assert_eq!(connector.worker().stop_calls(), 0);
}

#[tokio::test]
async fn test_stopping_accepts_neither_start_nor_stop() {
    let (connector, connection) = setup(ServiceState::Stopping);
    connection
        .connect(Arc::new(RecordingCallback::new()))
        .await
        .unwrap();

    assert!(!connection.start().await);
    assert!(!connection.stop().await);
    assert_eq!(connector.worker().start_calls(), 0);
    assert_eq!(connector.worker().stop_calls(), 0);
}

#[tokio::test]
async fn test_failure_transition_is_surfaced_verbatim() {
    let (connector, connection) = setup(ServiceState::Idle);
    connector
        .worker()
        .fail_next_start("libev: bind failed: Address already in use")
        .await;
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    assert!(connection.start().await);
    assert!(callback.wait_for(3, WAIT).await);

    assert_eq!(
        callback.errors(),
        vec!["libev: bind failed: Address already in use".to_string()]
    );
    assert_eq!(connection.state(), ServiceState::Stopped);

    // Stopped accepts a fresh start
    assert!(connection.start().await);
    assert_eq!(connector.worker().start_calls(), 2);
}

#[tokio::test]
async fn test_toggle_and_reload() {
    let (connector, connection) = setup(ServiceState::Idle);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    assert!(!connection.reload().await);

    assert!(connection.toggle().await);
    assert!(callback.wait_for(3, WAIT).await);
    assert!(connection.reload().await);
    assert_eq!(connector.worker().reload_calls(), 1);

    assert!(connection.toggle().await);
    assert!(callback.wait_for(5, WAIT).await);
    assert_eq!(connector.worker().stop_calls(), 1);
    assert_eq!(connection.state(), ServiceState::Idle);
}

#[tokio::test]
async fn test_worker_death_is_repaired_silently() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connector.worker().kill().await;
    assert!(callback.wait_for(2, WAIT).await);

    assert_eq!(
        callback.states(),
        vec![ServiceState::Connected, ServiceState::Connected]
    );
    assert!(callback.errors().is_empty());
    assert_eq!(connector.bind_calls(), 2);
    assert_eq!(connector.worker().register_calls(), 2);
    assert_eq!(connection.query_state().await, ServiceState::Connected);
}

#[tokio::test]
async fn test_rebind_reports_true_state_after_death() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    // restarted worker comes back idle
    connector.worker().set_state(ServiceState::Idle).await;
    connector.worker().kill().await;
    assert!(callback.wait_for(2, WAIT).await);

    assert_eq!(
        callback.states(),
        vec![ServiceState::Connected, ServiceState::Idle]
    );
    assert!(callback.errors().is_empty());
    assert_eq!(connection.state(), ServiceState::Idle);
}

#[tokio::test]
async fn test_recovery_failure_collapses_to_idle() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connector.refuse_binds(3);
    connector.worker().kill().await;
    assert!(callback.wait_for(2, WAIT).await);

    assert_eq!(
        callback.states(),
        vec![ServiceState::Connected, ServiceState::Idle]
    );
    assert!(callback.errors().is_empty());
    assert_eq!(connector.bind_calls(), 4);
    assert!(!connection.is_bound().await);
    assert_eq!(connection.state(), ServiceState::Idle);

    // a later connect with the same target binds again
    connection.connect(callback.clone()).await.unwrap();
    assert!(connection.is_bound().await);
    assert_eq!(connection.state(), ServiceState::Connected);
}

#[tokio::test]
async fn test_initial_bind_failure_reports_idle() {
    let (connector, connection) = setup(ServiceState::Connected);
    connector.refuse_binds(1);
    let callback = Arc::new(RecordingCallback::new());

    let result = connection.connect(callback.clone()).await;

    assert!(result.unwrap_err().is_channel());
    assert_eq!(callback.states(), vec![ServiceState::Idle]);
    assert_eq!(connection.state(), ServiceState::Idle);
}

#[tokio::test]
async fn test_bandwidth_interval_without_reconnect() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());

    connection.set_bandwidth_interval(500).await;
    connection.connect(callback.clone()).await.unwrap();
    assert_eq!(connector.worker().bandwidth_interval(), 500);

    let stats = TrafficStats {
        tx_rate: 10,
        rx_rate: 20,
        tx_total: 100,
        rx_total: 200,
    };
    connector
        .worker()
        .emit(WorkerEvent::TrafficUpdated { profile_id: 0, stats })
        .await;
    assert!(callback.wait_for(2, WAIT).await);

    connection.set_bandwidth_interval(0).await;
    assert_eq!(connector.worker().bandwidth_interval(), 0);

    connector
        .worker()
        .emit(WorkerEvent::TrafficUpdated { profile_id: 0, stats })
        .await;
    connector
        .worker()
        .emit(WorkerEvent::TrafficPersisted { profile_id: 0 })
        .await;
    assert!(callback.wait_for(3, WAIT).await);

    let records = callback.records();
    assert_eq!(records.len(), 3);
    assert_eq!(
        records[1],
        CallbackRecord::TrafficUpdated { profile_id: 0, stats }
    );
    assert_eq!(records[2], CallbackRecord::TrafficPersisted { profile_id: 0 });
    assert_eq!(connector.bind_calls(), 1);

    connection.set_bandwidth_interval(1000).await;
    assert_eq!(connector.worker().bandwidth_interval(), 1000);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_clean() {
    let (connector, connection) = setup(ServiceState::Connected);
    connection.disconnect().await;

    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();
    connection.disconnect().await;
    connection.disconnect().await;

    assert!(!connection.is_bound().await);
    assert_eq!(connector.worker().unregister_calls(), 1);
    assert!(!connector.worker().has_callback().await);
    assert_eq!(connection.query_state().await, ServiceState::Idle);
    assert!(!connection.stop().await);
    assert_eq!(connector.worker().stop_calls(), 0);

    // a crash after a clean disconnect does not trigger a rebind
    connector.worker().kill().await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.bind_calls(), 1);
    assert_eq!(callback.len(), 1);
}

#[tokio::test]
async fn test_rebind_keeps_callback() {
    let (connector, connection) = setup(ServiceState::Idle);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connection.rebind().await.unwrap();

    assert_eq!(connector.bind_calls(), 2);
    assert_eq!(connector.worker().unregister_calls(), 1);
    assert_eq!(callback.states(), vec![ServiceState::Idle, ServiceState::Idle]);
}

#[tokio::test]
async fn test_drop_releases_worker_registration() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());
    connection.set_bandwidth_interval(500).await;
    connection.connect(callback.clone()).await.unwrap();
    assert!(connector.worker().has_callback().await);

    drop(connection);
    sleep(Duration::from_millis(100)).await;

    assert!(!connector.worker().has_callback().await);
    assert_eq!(connector.worker().unregister_calls(), 1);
    assert_eq!(connector.worker().bandwidth_interval(), 0);

    connector.worker().kill().await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.bind_calls(), 1);
    assert_eq!(callback.len(), 1);
}

#[tokio::test]
async fn test_disconnect_aborts_recovery() {
    let (connector, connection) = setup_with(ServiceState::Connected, slow_policy());
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connector.refuse_binds(2);
    connector.worker().kill().await;
    // first rebind is refused, second is waiting out its backoff
    sleep(Duration::from_millis(50)).await;
    connection.disconnect().await;
    sleep(Duration::from_millis(600)).await;

    assert_eq!(connector.bind_calls(), 2);
    assert_eq!(callback.states(), vec![ServiceState::Connected]);
    assert!(!connection.is_bound().await);
}

#[tokio::test]
async fn test_drop_aborts_recovery() {
    let (connector, connection) = setup_with(ServiceState::Connected, slow_policy());
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connector.refuse_binds(2);
    connector.worker().kill().await;
    sleep(Duration::from_millis(50)).await;
    drop(connection);
    sleep(Duration::from_millis(600)).await;

    assert_eq!(connector.bind_calls(), 2);
    assert_eq!(callback.len(), 1);
    assert!(!connector.worker().has_callback().await);
}

#[tokio::test]
async fn test_slow_rebind_leaves_connection_responsive() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connector.delay_binds(300);
    connector.worker().kill().await;
    sleep(Duration::from_millis(50)).await;

    let bound = tokio::time::timeout(Duration::from_millis(100), connection.is_bound()).await;
    assert_eq!(bound.ok(), Some(false));

    assert!(callback.wait_for(2, WAIT).await);
    assert_eq!(
        callback.states(),
        vec![ServiceState::Connected, ServiceState::Connected]
    );
    assert!(connection.is_bound().await);
}

#[tokio::test]
async fn test_disconnect_during_slow_rebind_releases_fresh_channel() {
    let (connector, connection) = setup(ServiceState::Connected);
    let callback = Arc::new(RecordingCallback::new());
    connection.connect(callback.clone()).await.unwrap();

    connector.delay_binds(200);
    connector.worker().kill().await;
    sleep(Duration::from_millis(50)).await;

    let disconnected =
        tokio::time::timeout(Duration::from_millis(100), connection.disconnect()).await;
    assert!(disconnected.is_ok());
    sleep(Duration::from_millis(300)).await;

    assert_eq!(connector.bind_calls(), 2);
    assert_eq!(connector.worker().register_calls(), 2);
    assert_eq!(connector.worker().unregister_calls(), 1);
    assert!(!connector.worker().has_callback().await);
    assert!(!connection.is_bound().await);
    assert_eq!(callback.len(), 1);
}
