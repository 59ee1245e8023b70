//! Behaviour of `PushConnection` against an in-memory gateway.
//!
//! Covers sequencing, input validation, queued writes while connecting and
//! recovery after the gateway rejects a notification.

use std::time::Duration;

use apnwire::{
    ConnectionState,
    DeviceToken,
    FrameFormat,
    GatewayStatus,
    Notification,
    PushConfig,
    PushConnection,
    SendError,
};
use apnwire_testing::{GatewayPeer, MockServer, MockTransport, payload_json};
use rstest::rstest;
use tokio::{
    sync::{mpsc, watch},
    time::timeout,
};
use tracing_test::traced_test;

type Rejection = (GatewayStatus, Option<Notification>);

fn note(alert: &str) -> Notification {
    Notification::new(DeviceToken::new(vec![0x11; 32])).with_alert(alert)
}

fn connect(
    config: PushConfig,
) -> (PushConnection, MockTransport, MockServer, mpsc::UnboundedReceiver<Rejection>) {
    let (transport, server) = MockTransport::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let push = PushConnection::builder(config)
        .on_gateway_error(move |status, failed| {
            let _ = tx.send((status, failed));
        })
        .build_with_transport(transport.clone());
    (push, transport, server, rx)
}

async fn wait_for_state(mut state: watch::Receiver<ConnectionState>, want: ConnectionState) {
    timeout(Duration::from_secs(2), state.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for state")
        .expect("connection task stopped");
}

async fn next_rejection(rx: &mut mpsc::UnboundedReceiver<Rejection>) -> Rejection {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for gateway error handler")
        .expect("handler dropped")
}

fn alert_of(frame: &apnwire::PushFrame) -> String {
    payload_json(frame)["aps"]["alert"]
        .as_str()
        .expect("alert is a string")
        .to_owned()
}

#[tokio::test]
async fn sequence_ids_start_at_zero_and_increase() {
    let (push, _transport, mut server, _rx) = connect(PushConfig::default());
    for (expected, alert) in ["a", "b", "c"].into_iter().enumerate() {
        let id = push.send(note(alert)).await.expect("send");
        assert_eq!(id as usize, expected);
    }
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let frames = gateway.frames(3).await;
    assert_eq!(frames.iter().map(|f| f.sequence_id).collect::<Vec<_>>(), [0, 1, 2]);
    assert_eq!(frames[1].token.as_ref(), &[0x11; 32]);
    assert_eq!(alert_of(&frames[2]), "c");
    push.close().await;
}

#[tokio::test]
async fn state_moves_through_connecting_to_open() {
    let (push, transport, mut server, _rx) = connect(PushConfig::default());
    wait_for_state(push.subscribe(), ConnectionState::Disconnected).await;
    transport.hold();
    push.send(note("a")).await.expect("send");
    assert_eq!(push.state(), ConnectionState::Connecting);
    transport.release(1);
    let _gateway = server.accept().await;
    wait_for_state(push.subscribe(), ConnectionState::Open).await;
    assert!(push.state().is_open());
}

#[tokio::test]
async fn missing_device_token_consumes_no_sequence_id() {
    let (push, transport, mut server, mut rx) = connect(PushConfig::default());
    let err = push
        .send(Notification::default().with_alert("nobody"))
        .await
        .expect_err("notification without device must be refused");
    assert!(matches!(err, SendError::MissingDeviceToken));
    assert_eq!(err.code(), Some(2));
    assert_eq!(transport.connects(), 0);

    assert_eq!(push.send(note("a")).await.expect("send"), 0);
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    assert_eq!(gateway.next_frame().await.sequence_id, 0);

    // The refused notification never entered the cache, so rejecting the
    // only accepted one leaves nothing to replay.
    gateway.reject(GatewayStatus::InvalidToken, 0).await;
    let (_, failed) = next_rejection(&mut rx).await;
    assert_eq!(failed.and_then(|n| n.sequence_id()), Some(0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!server.has_pending(), "nothing cached after the rejected send");
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn oversized_payload_is_refused() {
    let (push, transport, mut server, _rx) = connect(PushConfig::default());
    let big = note("a").with_custom("blob", "x".repeat(300));
    let err = push.send(big).await.expect_err("payload over 256 bytes");
    match &err {
        SendError::InvalidPayloadSize { size, max } => {
            assert!(*size > 256);
            assert_eq!(*max, 256);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), Some(7));
    assert_eq!(push.send(note("ok")).await.expect("send"), 0);
    let _gateway = server.accept().await;
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn sends_while_connecting_share_one_connect_and_flush_once() {
    let (push, transport, mut server, _rx) = connect(PushConfig::default());
    transport.hold();
    for alert in ["a", "b", "c"] {
        push.send(note(alert)).await.expect("send");
    }
    push.connect().expect("connect command");
    transport.release(1);

    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let frames = gateway.frames(3).await;
    let alerts: Vec<_> = frames.iter().map(alert_of).collect();
    assert_eq!(alerts, ["a", "b", "c"]);
    gateway.assert_idle().await;
    assert_eq!(transport.connects(), 1);
    assert!(!server.has_pending());
}

#[traced_test]
#[tokio::test]
async fn rejection_reports_failed_notification_and_resends_the_rest() {
    let config = PushConfig::default().with_cache_length(3);
    let (push, transport, mut server, mut rx) = connect(config);
    for alert in ["A", "B", "C", "D"] {
        push.send(note(alert)).await.expect("send");
    }
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    assert_eq!(gateway.sequence_ids(4).await, [0, 1, 2, 3]);
    gateway.reject(GatewayStatus::InvalidToken, 2).await;

    let (status, failed) = next_rejection(&mut rx).await;
    assert_eq!(status, GatewayStatus::InvalidToken);
    let failed = failed.expect("rejected notification still cached");
    assert_eq!(failed.sequence_id(), Some(2));
    assert_eq!(failed.alert, Some("C".into()));

    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let resent = gateway.next_frame().await;
    assert_eq!(resent.sequence_id, 4);
    assert_eq!(alert_of(&resent), "D");
    gateway.assert_idle().await;
    assert_eq!(transport.connects(), 2);
    assert!(logs_contain("gateway rejected notification"));

    assert_eq!(push.send(note("E")).await.expect("send"), 5);
    assert_eq!(gateway.next_frame().await.sequence_id, 5);
}

#[traced_test]
#[tokio::test]
async fn rejection_while_a_backlog_is_written_is_recovered() {
    let config = PushConfig::default().with_cache_length(5_000);
    let (push, transport, mut server, mut rx) = connect(config);
    transport.hold();
    for i in 0..3_000 {
        push.send(note(&format!("n{i}"))).await.expect("send");
    }
    transport.release(1);

    // The backlog is far larger than the stream buffer, so the connection is
    // still writing when the gateway answers and hangs up.
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    assert_eq!(gateway.sequence_ids(5).await, [0, 1, 2, 3, 4]);
    gateway.reject(GatewayStatus::InvalidToken, 2).await;

    let (status, failed) = next_rejection(&mut rx).await;
    assert_eq!(status, GatewayStatus::InvalidToken);
    assert_eq!(failed.and_then(|n| n.sequence_id()), Some(2));
    assert!(logs_contain("gateway write failed"));

    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let frames = gateway.frames(2_997).await;
    let expected: Vec<String> = (3..3_000).map(|i| format!("n{i}")).collect();
    assert_eq!(frames.iter().map(alert_of).collect::<Vec<_>>(), expected);
    assert_eq!(frames[0].sequence_id, 3_000);
    assert_eq!(frames[2_996].sequence_id, 5_996);
    gateway.assert_idle().await;
    assert_eq!(transport.connects(), 2);
}

#[rstest]
#[case::second_of_six(5, 6, 1, 4)]
#[case::first_of_three(3, 3, 0, 2)]
#[case::last_sent(4, 4, 3, 0)]
#[tokio::test]
async fn resend_count_depends_on_position_in_cache(
    #[case] cache_length: usize,
    #[case] sent: u32,
    #[case] rejected: u32,
    #[case] expected_resends: usize,
) {
    let config = PushConfig::default().with_cache_length(cache_length);
    let (push, _transport, mut server, mut rx) = connect(config);
    for i in 0..sent {
        push.send(note(&format!("n{i}"))).await.expect("send");
    }
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    gateway.frames(sent as usize).await;
    gateway.reject(GatewayStatus::ProcessingError, rejected).await;

    let (_, failed) = next_rejection(&mut rx).await;
    assert_eq!(failed.and_then(|n| n.sequence_id()), Some(rejected));

    if expected_resends == 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.has_pending());
        return;
    }
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let frames = gateway.frames(expected_resends).await;
    let expected_alerts: Vec<String> = (rejected + 1..sent).map(|i| format!("n{i}")).collect();
    assert_eq!(frames.iter().map(alert_of).collect::<Vec<_>>(), expected_alerts);
    let new_ids: Vec<u32> = (sent..sent + expected_resends as u32).collect();
    assert_eq!(frames.iter().map(|f| f.sequence_id).collect::<Vec<_>>(), new_ids);
    gateway.assert_idle().await;
}

#[tokio::test]
async fn unknown_sequence_id_resends_whole_cache() {
    let config = PushConfig::default().with_cache_length(2);
    let (push, _transport, mut server, mut rx) = connect(config);
    for alert in ["a", "b", "c"] {
        push.send(note(alert)).await.expect("send");
    }
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    gateway.frames(3).await;
    gateway.reject(GatewayStatus::Unknown, 0).await;

    let (status, failed) = next_rejection(&mut rx).await;
    assert_eq!(status.code(), 255);
    assert!(failed.is_none(), "evicted notification cannot be reported");

    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let frames = gateway.frames(2).await;
    assert_eq!(frames.iter().map(alert_of).collect::<Vec<_>>(), ["b", "c"]);
    assert_eq!(frames.iter().map(|f| f.sequence_id).collect::<Vec<_>>(), [3, 4]);
}

#[tokio::test]
async fn simple_format_writes_legacy_frames_without_caching() {
    let config = PushConfig::default().with_enhanced_format(false);
    let (push, _transport, mut server, mut rx) = connect(config);
    push.send(note("a").with_expiry(99)).await.expect("send");
    push.send(note("b")).await.expect("send");

    let mut gateway = GatewayPeer::new(server.accept().await, FrameFormat::Simple);
    let frames = gateway.frames(2).await;
    assert!(frames.iter().all(|f| f.sequence_id == 0 && f.expiry == 0));
    assert_eq!(alert_of(&frames[0]), "a");

    gateway.reject(GatewayStatus::ProcessingError, 0).await;
    let (_, failed) = next_rejection(&mut rx).await;
    assert!(failed.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!server.has_pending(), "nothing cached so nothing resent");
}

#[tokio::test]
async fn remote_close_does_not_reconnect() {
    let (push, transport, mut server, _rx) = connect(PushConfig::default());
    push.send(note("a")).await.expect("send");
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    gateway.next_frame().await;
    wait_for_state(push.subscribe(), ConnectionState::Open).await;

    gateway.close().await;
    wait_for_state(push.subscribe(), ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connects(), 1);

    push.send(note("b")).await.expect("send");
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    assert_eq!(gateway.next_frame().await.sequence_id, 1);
    assert_eq!(transport.connects(), 2);
}

#[traced_test]
#[tokio::test]
async fn failed_connect_keeps_queued_frames() {
    let (push, transport, mut server, _rx) = connect(PushConfig::default());
    transport.fail_next(1);
    push.send(note("a")).await.expect("send");
    wait_for_state(push.subscribe(), ConnectionState::Disconnected).await;
    assert!(logs_contain("gateway connect failed"));

    push.connect().expect("connect command");
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    let frame = gateway.next_frame().await;
    assert_eq!(frame.sequence_id, 0);
    assert_eq!(alert_of(&frame), "a");
    assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn close_shuts_the_gateway_stream() {
    let (push, _transport, mut server, _rx) = connect(PushConfig::default());
    push.send(note("a")).await.expect("send");
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    gateway.next_frame().await;
    push.close().await;
    gateway.assert_closed().await;
}
