//! Ingestion channel accounting: after shutdown, every taken message is
//! accepted, rejected, or recorded as a failure with its reason.

use dp_client::models::{Bucket, SamplingClock, Timestamp, TimestampSpec};
use dp_client::{
    BufferConfig, BufferState, IngestMessage, IngestionChannel, IngestionChannelConfig,
    MessageBuffer,
};
use dp_test_utils::{AckDecision, MockIngestTransport};
use std::sync::Arc;
use std::time::Duration;

fn message(id: &str) -> IngestMessage {
    let clock = SamplingClock::new(Timestamp::EPOCH, 1_000_000, 3).unwrap();
    IngestMessage::new(
        id,
        vec![Bucket::new(
            "bpm_01:x",
            TimestampSpec::Clock(clock),
            vec![0.1, 0.2, 0.3],
        )],
    )
}

fn config(max_streams: usize) -> IngestionChannelConfig {
    IngestionChannelConfig {
        max_streams,
        operation_timeout: Duration::from_secs(5),
        provider_id: "beamline-7".to_owned(),
    }
}

async fn stage(supplier: &MessageBuffer<IngestMessage>, count: usize) {
    for i in 0..count {
        supplier.offer(message(&format!("m-{i:03}"))).await.unwrap();
    }
}

#[tokio::test]
async fn all_accepted_messages_are_accounted() {
    let transport = MockIngestTransport::accept_all();
    let supplier = Arc::new(MessageBuffer::new(BufferConfig::default()));
    supplier.activate().unwrap();

    let channel =
        IngestionChannel::new(Arc::clone(&transport), config(2), Arc::clone(&supplier)).unwrap();
    channel.activate().unwrap();
    stage(&supplier, 20).await;

    let result = channel.shutdown().await.unwrap();
    assert_eq!(result.accepted, 20);
    assert_eq!(result.rejected, 0);
    assert!(result.errors.is_empty());
    assert_eq!(
        channel.request_count(),
        result.accepted + result.rejected + result.errors.len() as u64
    );
    assert_eq!(channel.response_count(), 20);
    assert_eq!(transport.seen_count(), 20);
    assert_eq!(supplier.state(), BufferState::Closed);
}

#[tokio::test]
async fn rejections_are_counted_separately_from_failures() {
    let transport = MockIngestTransport::with_policy(|request| {
        if request.client_request_id.ends_with('3') {
            AckDecision::Reject("archive window closed".to_owned())
        } else {
            AckDecision::Accept
        }
    });
    let supplier = Arc::new(MessageBuffer::new(BufferConfig::default()));
    supplier.activate().unwrap();

    let channel =
        IngestionChannel::new(Arc::clone(&transport), config(3), Arc::clone(&supplier)).unwrap();
    channel.activate().unwrap();
    stage(&supplier, 30).await;

    let result = channel.shutdown().await.unwrap();
    // m-003, m-013, m-023
    assert_eq!(result.rejected, 3);
    assert_eq!(result.accepted, 27);
    assert!(result.errors.is_empty());
    assert_eq!(
        channel.request_count(),
        result.accepted + result.rejected + result.errors.len() as u64
    );
}

#[tokio::test]
async fn a_stream_failure_before_ack_is_recorded_with_its_reason() {
    let transport = MockIngestTransport::with_policy(|request| {
        if request.client_request_id == "m-002" {
            AckDecision::FailBeforeAck("connection reset".to_owned())
        } else {
            AckDecision::Accept
        }
    });
    let supplier = Arc::new(MessageBuffer::new(BufferConfig::default()));
    supplier.activate().unwrap();

    // One stream: the failure kills the only worker; staged messages
    // behind the failed one are reported as leftovers, not silently lost.
    let channel =
        IngestionChannel::new(Arc::clone(&transport), config(1), Arc::clone(&supplier)).unwrap();
    channel.activate().unwrap();
    stage(&supplier, 5).await;

    let result = channel.shutdown().await.unwrap();
    assert_eq!(result.accepted, 2, "m-000 and m-001 acked before the failure");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].client_request_id, "m-002");
    assert!(result.errors[0].reason.contains("connection reset"));
    assert_eq!(
        channel.request_count(),
        result.accepted + result.rejected + result.errors.len() as u64
    );
}

#[tokio::test]
async fn shutdown_now_discards_staged_messages_but_keeps_the_invariant() {
    let transport = MockIngestTransport::accept_all();
    let supplier = Arc::new(MessageBuffer::new(BufferConfig::default()));
    supplier.activate().unwrap();

    let channel =
        IngestionChannel::new(Arc::clone(&transport), config(1), Arc::clone(&supplier)).unwrap();
    stage(&supplier, 50).await;
    channel.activate().unwrap();

    let (result, _discarded) = channel.shutdown_now().await.unwrap();
    assert_eq!(
        channel.request_count(),
        result.accepted + result.rejected + result.errors.len() as u64
    );
    assert_eq!(supplier.state(), BufferState::Closed);
}

#[tokio::test]
async fn activate_twice_is_rejected() {
    let transport = MockIngestTransport::accept_all();
    let supplier = Arc::new(MessageBuffer::new(BufferConfig::default()));
    supplier.activate().unwrap();
    let channel =
        IngestionChannel::new(Arc::clone(&transport), config(1), Arc::clone(&supplier)).unwrap();
    channel.activate().unwrap();
    assert!(channel.activate().is_err());
    channel.shutdown().await.unwrap();
}
