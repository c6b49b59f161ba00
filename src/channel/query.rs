//! Multi-stream query channel: the concurrent recovery engine.
//!
//! `recover` estimates the request size, optionally decomposes it, and
//! drives one worker task per sub-request.  Every worker deposits its
//! frames into the shared message buffer in wire order; nothing is promised
//! about interleaving across streams.  The supervisor records the first
//! failure, cancels the siblings, and hard-shuts the buffer; a clean run
//! ends with a soft shutdown so consumers drain to end-of-stream.

use crate::buffer::{BufferConfig, BufferError, MessageBuffer};
use crate::channel::cancelled;
use crate::config::ConfigError;
use crate::decompose::{SplitStrategy, decompose};
use crate::error::DpError;
use crate::models::bucket::DataFrame;
use crate::request::DataRequest;
use dp_wire::QueryTransport;
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Server-streaming recovery: the channel only receives.
    Unidirectional,
    /// Bidirectional recovery: the channel acknowledges each frame with a
    /// cursor operation.
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionPolicy {
    Horizontal,
    Vertical,
    Grid,
    /// Pick the axis with more parallel headroom: sources when there are
    /// at least as many as the stream count, time otherwise.
    Auto,
}

#[derive(Debug, Clone)]
pub struct QueryChannelConfig {
    pub stream_type: StreamType,
    /// Upper bound on parallel recovery streams.
    pub max_streams: usize,
    /// Requests estimated below this many source-seconds stay on a single
    /// stream.
    pub multistream_domain_pivot: u64,
    pub decomposition: DecompositionPolicy,
    /// Deadline for opening a stream and for each receive.
    pub operation_timeout: Duration,
}

impl Default for QueryChannelConfig {
    fn default() -> Self {
        QueryChannelConfig {
            stream_type: StreamType::Unidirectional,
            max_streams: 4,
            multistream_domain_pivot: 60,
            decomposition: DecompositionPolicy::Auto,
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters of one completed recovery.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryStats {
    /// Streams opened (equals sub-requests submitted).
    pub streams: usize,
    pub requests: u64,
    pub responses: u64,
}

/// One recovery engine instance.  A channel owns its buffer (already
/// accepting, so consumers may park on `take` before the first stream
/// opens) and runs a single `recover`.
pub struct QueryChannel<T: QueryTransport> {
    transport: Arc<T>,
    config: QueryChannelConfig,
    buffer: Arc<MessageBuffer<DataFrame>>,
    requests_sent: Arc<AtomicU64>,
    responses_seen: Arc<AtomicU64>,
    last_error: std::sync::Mutex<Option<String>>,
    cancel_tx: watch::Sender<bool>,
    recovering: std::sync::atomic::AtomicBool,
}

impl<T: QueryTransport> QueryChannel<T> {
    pub fn new(
        transport: Arc<T>,
        config: QueryChannelConfig,
        buffer_config: BufferConfig,
    ) -> Result<Self, DpError> {
        if config.max_streams == 0 {
            return Err(DpError::Config(ConfigError::InvalidValue(
                "multistream.max_streams must be at least 1".to_owned(),
            )));
        }
        let buffer = MessageBuffer::new(buffer_config);
        buffer.activate().expect("fresh buffer accepts activation");
        let (cancel_tx, _) = watch::channel(false);
        Ok(QueryChannel {
            transport,
            config,
            buffer: Arc::new(buffer),
            requests_sent: Arc::new(AtomicU64::new(0)),
            responses_seen: Arc::new(AtomicU64::new(0)),
            last_error: std::sync::Mutex::new(None),
            cancel_tx,
            recovering: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// The frame buffer consumers drain.  Frames appear while `recover`
    /// runs; end-of-stream follows its completion.
    pub fn buffer(&self) -> Arc<MessageBuffer<DataFrame>> {
        Arc::clone(&self.buffer)
    }

    pub fn request_count(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn response_count(&self) -> u64 {
        self.responses_seen.load(Ordering::Relaxed)
    }

    /// The first error of the last recovery, if any.
    pub fn error(&self) -> Option<String> {
        self.last_error.lock().expect("error mutex").clone()
    }

    /// Cooperative cancellation: workers exit at their next suspension
    /// point and the buffer is shut down hard (queued frames discarded).
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        self.buffer.shutdown_now();
    }

    /// Run one recovery to completion.  Blocks until every stream finished,
    /// failed, or was cancelled.
    pub async fn recover(&self, request: &DataRequest) -> Result<RecoveryStats, DpError> {
        if self.recovering.swap(true, Ordering::SeqCst) {
            return Err(DpError::InvalidState(
                "a recovery already ran on this channel".to_owned(),
            ));
        }
        let subs = self.plan(request)?;
        let streams = subs.len();
        info!(
            request_id = %request.request_id(),
            streams,
            stream_type = ?self.config.stream_type,
            "starting recovery"
        );

        let mut join_set = JoinSet::new();
        for (index, sub) in subs.into_iter().enumerate() {
            let worker = StreamWorker {
                transport: Arc::clone(&self.transport),
                buffer: Arc::clone(&self.buffer),
                cancel: self.cancel_tx.subscribe(),
                responses: Arc::clone(&self.responses_seen),
                stream_type: self.config.stream_type,
                op_timeout: self.config.operation_timeout,
                index,
            };
            self.requests_sent.fetch_add(1, Ordering::Relaxed);
            join_set.spawn(worker.run(sub.to_wire_spec()));
        }

        let mut first_error: Option<DpError> = None;
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.unwrap_or_else(|join_error| {
                Err(DpError::Transport(Status::internal(format!(
                    "stream worker panicked: {join_error}"
                ))))
            });
            if let Err(e) = outcome {
                if first_error.is_none() {
                    warn!(error = %e, "stream failed, cancelling siblings");
                    let _ = self.cancel_tx.send(true);
                    self.buffer.shutdown_now();
                    first_error = Some(e);
                } else {
                    debug!(error = %e, "sibling stream exited after cancellation");
                }
            }
        }

        match first_error {
            None => {
                self.buffer.shutdown().map_err(DpError::from)?;
                Ok(RecoveryStats {
                    streams,
                    requests: self.request_count(),
                    responses: self.response_count(),
                })
            }
            Some(e) => {
                *self.last_error.lock().expect("error mutex") = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Decide how many streams to open and which axis to split on.
    fn plan(&self, request: &DataRequest) -> Result<Vec<DataRequest>, DpError> {
        let est = request.estimated_source_seconds().map_err(DpError::Time)?;
        let pivot = self.config.multistream_domain_pivot.max(1);
        if self.config.max_streams == 1 || est < pivot {
            return Ok(vec![request.clone()]);
        }
        let count = usize::try_from(est.div_ceil(pivot))
            .unwrap_or(usize::MAX)
            .min(self.config.max_streams);
        if count <= 1 {
            return Ok(vec![request.clone()]);
        }
        let strategy = match self.config.decomposition {
            DecompositionPolicy::Horizontal => SplitStrategy::Horizontal,
            DecompositionPolicy::Vertical => SplitStrategy::Vertical,
            DecompositionPolicy::Grid => SplitStrategy::Grid,
            DecompositionPolicy::Auto => {
                if request.sources().len() >= count {
                    SplitStrategy::Horizontal
                } else {
                    SplitStrategy::Vertical
                }
            }
        };
        let decomposition = decompose(request, strategy, count)?;
        debug!(
            requested = decomposition.requested,
            effective = decomposition.effective(),
            strategy = ?strategy,
            est_source_seconds = est,
            "decomposed request"
        );
        Ok(decomposition.sub_requests)
    }
}

// ---------------------------------------------------------------------------
// Stream worker
// ---------------------------------------------------------------------------

struct StreamWorker<T> {
    transport: Arc<T>,
    buffer: Arc<MessageBuffer<DataFrame>>,
    cancel: watch::Receiver<bool>,
    responses: Arc<AtomicU64>,
    stream_type: StreamType,
    op_timeout: Duration,
    index: usize,
}

impl<T: QueryTransport> StreamWorker<T> {
    /// Drive one RPC stream until the remote ends it, an error occurs, or
    /// cancellation is observed.
    async fn run(self, spec: dp_wire::QuerySpec) -> Result<(), DpError> {
        let StreamWorker {
            transport,
            buffer,
            mut cancel,
            responses,
            stream_type,
            op_timeout,
            index,
        } = self;
        let request_id = spec.request_id.clone();

        let (mut stream, ack_tx) = match stream_type {
            StreamType::Unidirectional => {
                let opening = tokio::time::timeout(
                    op_timeout,
                    transport.server_stream(dp_wire::QueryDataRequest::spec(spec)),
                );
                let opened = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return Err(DpError::Cancelled),
                    opened = opening => opened,
                };
                let stream = opened
                    .map_err(|_| DpError::Timeout(format!("opening recovery stream {index}")))?
                    .map_err(DpError::Transport)?;
                (stream, None)
            }
            StreamType::Bidirectional => {
                let (tx, rx) = mpsc::channel::<dp_wire::QueryDataRequest>(4);
                tx.send(dp_wire::QueryDataRequest::spec(spec))
                    .await
                    .expect("receiver is held locally");
                let outbound: dp_wire::RequestStream = Box::pin(ReceiverStream::new(rx));
                let opening = tokio::time::timeout(op_timeout, transport.bidi_stream(outbound));
                let opened = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return Err(DpError::Cancelled),
                    opened = opening => opened,
                };
                let stream = opened
                    .map_err(|_| DpError::Timeout(format!("opening recovery stream {index}")))?
                    .map_err(DpError::Transport)?;
                (stream, Some(tx))
            }
        };

        loop {
            let received = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(DpError::Cancelled),
                received = tokio::time::timeout(op_timeout, stream.next()) => received,
            };
            let item = received
                .map_err(|_| DpError::Timeout(format!("receive on recovery stream {index}")))?;
            match item {
                // Remote signalled END: the stream is complete.
                None => return Ok(()),
                Some(Err(status)) => return Err(DpError::Transport(status)),
                Some(Ok(response)) => {
                    let frame = DataFrame::from_wire(index, response).map_err(DpError::Time)?;
                    responses.fetch_add(1, Ordering::Relaxed);
                    match buffer.offer(frame).await {
                        Ok(()) => {}
                        Err(BufferError::ShuttingDown) => return Err(DpError::Cancelled),
                        Err(e) => return Err(e.into()),
                    }
                    if let Some(tx) = &ack_tx {
                        // The remote may have ended the stream already;
                        // a failed ack send is not an error.
                        let _ = tx
                            .send(dp_wire::QueryDataRequest::cursor(request_id.clone()))
                            .await;
                    }
                }
            }
        }
    }
}
