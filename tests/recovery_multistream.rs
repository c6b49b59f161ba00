//! Multi-stream recovery behaviour through the scripted query transport:
//! stream-local ordering, failure fan-out, rejected-frame passthrough,
//! bidirectional paging, and cancellation.

use dp_client::{
    BufferConfig, BufferState, DataRequestBuilder, DecompositionPolicy, DpError, FrameStatus,
    QueryChannel, QueryChannelConfig, StreamType, Timestamp,
};
use dp_test_utils::{MockQueryTransport, ScriptItem};
use std::sync::Arc;
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

fn request(sources: &[&str], seconds: i64) -> dp_client::DataRequest {
    DataRequestBuilder::new()
        .select_sources(sources.iter().copied())
        .range_between(
            Timestamp::from_nanos(0),
            Timestamp::from_nanos(seconds * NANOS_PER_SEC),
        )
        .request_id("req")
        .build()
        .unwrap()
}

fn channel_config(
    policy: DecompositionPolicy,
    max_streams: usize,
    pivot: u64,
) -> QueryChannelConfig {
    QueryChannelConfig {
        stream_type: StreamType::Unidirectional,
        max_streams,
        multistream_domain_pivot: pivot,
        decomposition: policy,
        operation_timeout: Duration::from_secs(5),
    }
}

fn tagged_frame(request_id: &str, tag: &str) -> dp_wire::QueryDataResponse {
    dp_wire::QueryDataResponse {
        request_id: request_id.to_owned(),
        status: dp_wire::FrameStatus::Ok as i32,
        message: tag.to_owned(),
        buckets: vec![],
    }
}

#[tokio::test]
async fn small_request_stays_on_a_single_stream() {
    let transport = MockQueryTransport::uniform_clock(1_000);
    let channel = QueryChannel::new(
        Arc::clone(&transport),
        channel_config(DecompositionPolicy::Auto, 4, 60),
        BufferConfig::default(),
    )
    .unwrap();

    let stats = channel.recover(&request(&["src_1"], 1)).await.unwrap();
    assert_eq!(stats.streams, 1);
    assert_eq!(transport.streams_opened(), 1);
    assert_eq!(channel.request_count(), 1);
    assert_eq!(channel.response_count(), 1);
}

#[tokio::test]
async fn frames_keep_wire_order_within_each_stream() {
    let transport = MockQueryTransport::scripted();
    // Interleave delivery so the two streams genuinely interleave in the
    // buffer; order must still hold per stream.
    transport.script_for(
        "req/h0",
        vec![
            ScriptItem::Frame(tagged_frame("req/h0", "s0-0")),
            ScriptItem::Delay(Duration::from_millis(10)),
            ScriptItem::Frame(tagged_frame("req/h0", "s0-1")),
            ScriptItem::Delay(Duration::from_millis(20)),
            ScriptItem::Frame(tagged_frame("req/h0", "s0-2")),
        ],
    );
    transport.script_for(
        "req/h1",
        vec![
            ScriptItem::Delay(Duration::from_millis(5)),
            ScriptItem::Frame(tagged_frame("req/h1", "s1-0")),
            ScriptItem::Delay(Duration::from_millis(10)),
            ScriptItem::Frame(tagged_frame("req/h1", "s1-1")),
        ],
    );

    let channel = QueryChannel::new(
        Arc::clone(&transport),
        channel_config(DecompositionPolicy::Horizontal, 2, 1),
        BufferConfig::default(),
    )
    .unwrap();
    channel.recover(&request(&["a", "b"], 2)).await.unwrap();

    let buffer = channel.buffer();
    let mut per_stream: Vec<Vec<String>> = vec![Vec::new(), Vec::new()];
    while let Some(frame) = buffer.take().await.unwrap() {
        per_stream[frame.stream_index].push(frame.message.clone().unwrap());
    }
    assert_eq!(per_stream[0], ["s0-0", "s0-1", "s0-2"]);
    assert_eq!(per_stream[1], ["s1-0", "s1-1"]);
}

#[tokio::test]
async fn transport_error_fails_the_recovery_and_cancels_siblings() {
    let transport = MockQueryTransport::scripted();
    transport.script_for(
        "req/h0",
        vec![
            ScriptItem::Frame(tagged_frame("req/h0", "first")),
            ScriptItem::Fail("backend went away".to_owned()),
        ],
    );
    // The sibling would take far longer than the test allows; it must be
    // cancelled, not awaited.
    transport.script_for(
        "req/h1",
        vec![
            ScriptItem::Delay(Duration::from_secs(60)),
            ScriptItem::Frame(tagged_frame("req/h1", "never")),
        ],
    );

    let channel = QueryChannel::new(
        Arc::clone(&transport),
        channel_config(DecompositionPolicy::Horizontal, 2, 1),
        BufferConfig::default(),
    )
    .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        channel.recover(&request(&["a", "b"], 2)),
    )
    .await
    .expect("recovery must not wait for the cancelled sibling");

    assert!(matches!(outcome, Err(DpError::Transport(_))));
    assert!(channel.error().unwrap().contains("backend went away"));
    assert_eq!(channel.buffer().state(), BufferState::Closed);
}

#[tokio::test]
async fn rejected_frames_flow_through_with_their_status() {
    let transport = MockQueryTransport::scripted();
    transport.script_for(
        "req",
        vec![
            ScriptItem::Frame(tagged_frame("req", "ok-1")),
            ScriptItem::Frame(dp_wire::QueryDataResponse {
                request_id: "req".to_owned(),
                status: dp_wire::FrameStatus::Rejected as i32,
                message: "window closed".to_owned(),
                buckets: vec![],
            }),
            ScriptItem::Frame(tagged_frame("req", "ok-2")),
        ],
    );

    let channel = QueryChannel::new(
        Arc::clone(&transport),
        channel_config(DecompositionPolicy::Auto, 1, 60),
        BufferConfig::default(),
    )
    .unwrap();
    channel.recover(&request(&["a"], 1)).await.unwrap();

    let buffer = channel.buffer();
    let mut statuses = Vec::new();
    while let Some(frame) = buffer.take().await.unwrap() {
        statuses.push(frame.status);
    }
    assert_eq!(
        statuses,
        [FrameStatus::Ok, FrameStatus::Rejected, FrameStatus::Ok],
        "a rejected frame is data, not an error"
    );
}

#[tokio::test]
async fn bidirectional_streams_page_through_cursor_acks() {
    let transport = MockQueryTransport::uniform_clock(100);
    let config = QueryChannelConfig {
        stream_type: StreamType::Bidirectional,
        ..channel_config(DecompositionPolicy::Auto, 1, 60)
    };
    let channel =
        QueryChannel::new(Arc::clone(&transport), config, BufferConfig::default()).unwrap();
    channel
        .recover(&request(&["bpm_x", "bpm_y"], 1))
        .await
        .unwrap();

    let buffer = channel.buffer();
    let mut frames = 0;
    while let Some(frame) = buffer.take().await.unwrap() {
        assert_eq!(frame.buckets.len(), 1);
        assert_eq!(frame.buckets[0].values.len(), 101);
        frames += 1;
    }
    assert_eq!(frames, 2, "one paged frame per source");
}

#[tokio::test]
async fn cancellation_mid_recovery_closes_hard() {
    let transport = MockQueryTransport::scripted();
    for i in 0..4 {
        transport.script_for(
            &format!("req/h{i}"),
            vec![
                ScriptItem::Frame(tagged_frame(&format!("req/h{i}"), "early")),
                ScriptItem::Delay(Duration::from_secs(60)),
                ScriptItem::Frame(tagged_frame(&format!("req/h{i}"), "late")),
            ],
        );
    }

    let channel = Arc::new(
        QueryChannel::new(
            Arc::clone(&transport),
            channel_config(DecompositionPolicy::Horizontal, 4, 1),
            BufferConfig::default(),
        )
        .unwrap(),
    );
    let buffer = channel.buffer();

    let recovery = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.recover(&request(&["a", "b", "c", "d"], 4)).await })
    };

    // Wait for the first enqueued frame, then cancel.
    let first = tokio::time::timeout(Duration::from_secs(5), buffer.take())
        .await
        .expect("first frame arrives")
        .unwrap();
    assert!(first.is_some());
    channel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), recovery)
        .await
        .expect("recovery unwinds promptly")
        .unwrap();
    assert!(matches!(outcome, Err(DpError::Cancelled)));

    // Hard shutdown: Closed, and whatever was still queued is gone.
    assert_eq!(buffer.state(), BufferState::Closed);
    assert_eq!(buffer.take().await.unwrap(), None);
}
