#![cfg(feature = "metrics")]
//! Tests for `apnwire` metrics helpers and their use by the connections.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use apnwire::{
    DeviceToken,
    FeedbackConfig,
    FeedbackConnection,
    GatewayStatus,
    Notification,
    PushConfig,
    PushConnection,
    metrics::{
        CONNECTIONS_ACTIVE,
        Channel,
        FEEDBACK_RECORDS,
        GATEWAY_ERRORS,
        NOTIFICATIONS_RESENT,
        NOTIFICATIONS_SENT,
    },
};
use apnwire_testing::{
    GatewayPeer,
    MockTransport,
    counter_value,
    debugging_recorder,
    feedback_record,
};
use metrics_util::debugging::DebugValue;
use rstest::rstest;
use tokio::io::AsyncWriteExt;

#[rstest]
#[case(GatewayStatus::InvalidToken, "invalid_token")]
#[case(GatewayStatus::ProcessingError, "processing_error")]
fn gateway_error_metric_is_labelled_by_status(#[case] status: GatewayStatus, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder();
    metrics::with_local_recorder(&recorder, || {
        apnwire::metrics::inc_gateway_errors(status);
    });
    assert_eq!(counter_value(&snapshotter, GATEWAY_ERRORS, Some(("status", label))), Some(1));
}

#[test]
fn connection_gauge_tracks_channel() {
    let (snapshotter, recorder) = debugging_recorder();
    metrics::with_local_recorder(&recorder, || {
        apnwire::metrics::inc_connections(Channel::Feedback);
        apnwire::metrics::inc_connections(Channel::Feedback);
        apnwire::metrics::dec_connections(Channel::Feedback);
    });
    let found = snapshotter.snapshot().into_vec().into_iter().any(|(k, _, _, v)| {
        k.key().name() == CONNECTIONS_ACTIVE
            && k.key()
                .labels()
                .any(|l| l.key() == "channel" && l.value() == "feedback")
            && matches!(v, DebugValue::Gauge(g) if g.into_inner() == 1.0)
    });
    assert!(found, "feedback connection gauge not recorded");
}

#[tokio::test]
async fn push_connection_counts_sends_errors_and_resends() {
    let (snapshotter, recorder) = debugging_recorder();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let (transport, mut server) = MockTransport::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let push = PushConnection::builder(PushConfig::default())
        .on_gateway_error(move |status, _| {
            let _ = tx.send(status);
        })
        .build_with_transport(transport);
    for _ in 0..3 {
        push.send(Notification::new(DeviceToken::new(vec![5; 32])))
            .await
            .expect("send");
    }
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    gateway.frames(3).await;
    gateway.reject(GatewayStatus::InvalidTopicSize, 0).await;
    assert_eq!(rx.recv().await, Some(GatewayStatus::InvalidTopicSize));
    let mut gateway = GatewayPeer::enhanced(server.accept().await);
    gateway.frames(2).await;

    assert_eq!(counter_value(&snapshotter, NOTIFICATIONS_SENT, None), Some(5));
    assert_eq!(counter_value(&snapshotter, NOTIFICATIONS_RESENT, None), Some(2));
    assert_eq!(
        counter_value(&snapshotter, GATEWAY_ERRORS, Some(("status", "invalid_topic_size"))),
        Some(1)
    );
}

#[tokio::test]
async fn feedback_connection_counts_records() {
    let (snapshotter, recorder) = debugging_recorder();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let (transport, mut server) = MockTransport::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _feedback = FeedbackConnection::builder(FeedbackConfig::default(), move |ts, _| {
        let _ = tx.send(ts);
    })
    .build_with_transport(transport);
    let mut service = server.accept().await;
    let mut bytes = feedback_record(1, &[1; 32]);
    bytes.extend(feedback_record(2, &[2; 32]));
    service.write_all(&bytes).await.expect("write records");
    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(rx.recv().await, Some(2));

    assert_eq!(counter_value(&snapshotter, FEEDBACK_RECORDS, None), Some(2));
}
