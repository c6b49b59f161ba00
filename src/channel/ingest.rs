//! Ingestion streaming channel: the write-path mirror of the recovery
//! engine.
//!
//! The caller stages [`IngestMessage`]s into a supplier buffer; the channel
//! drains it over up to `max_streams` parallel upstream RPCs.  Each worker
//! runs a strict take / send / await-ack loop, so every taken message is
//! accounted exactly once: accepted, rejected, or recorded as a failure
//! with its reason.

use crate::buffer::{ByteSized, MessageBuffer};
use crate::channel::cancelled;
use crate::config::ConfigError;
use crate::error::DpError;
use crate::models::bucket::Bucket;
use dp_wire::IngestTransport;
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// One staged ingestion request: a batch of buckets under a client-chosen
/// request id.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestMessage {
    pub client_request_id: String,
    pub buckets: Vec<Bucket>,
}

impl IngestMessage {
    pub fn new(client_request_id: impl Into<String>, buckets: Vec<Bucket>) -> Self {
        IngestMessage {
            client_request_id: client_request_id.into(),
            buckets,
        }
    }

    fn into_wire(self, provider_id: &str) -> dp_wire::IngestDataRequest {
        dp_wire::IngestDataRequest {
            client_request_id: self.client_request_id,
            provider_id: provider_id.to_owned(),
            buckets: self.buckets.iter().map(Into::into).collect(),
        }
    }
}

impl ByteSized for IngestMessage {
    fn byte_size(&self) -> u64 {
        self.client_request_id.len() as u64
            + self.buckets.iter().map(Bucket::byte_size).sum::<u64>()
    }
}

#[derive(Debug, Clone)]
pub struct IngestionChannelConfig {
    pub max_streams: usize,
    /// Deadline for opening a stream and for each ack.
    pub operation_timeout: Duration,
    /// Provider identity stamped on every wire request.
    pub provider_id: String,
}

impl Default for IngestionChannelConfig {
    fn default() -> Self {
        IngestionChannelConfig {
            max_streams: 2,
            operation_timeout: Duration::from_secs(30),
            provider_id: "dp-client".to_owned(),
        }
    }
}

/// A message whose stream failed before its ack arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFailure {
    pub client_request_id: String,
    pub reason: String,
}

/// Aggregate outcome after shutdown.  `accepted + rejected` counts only
/// messages that received an ack; failures carry the rest.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub accepted: u64,
    pub rejected: u64,
    pub errors: Vec<IngestFailure>,
}

#[derive(Debug, Default)]
struct IngestionState {
    requests: AtomicU64,
    responses: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    failures: std::sync::Mutex<Vec<IngestFailure>>,
}

impl IngestionState {
    fn record_failure(&self, client_request_id: String, reason: impl Into<String>) {
        self.failures
            .lock()
            .expect("failure mutex")
            .push(IngestFailure {
                client_request_id,
                reason: reason.into(),
            });
    }
}

/// The write-path channel.  `activate` spawns the workers; `shutdown`
/// closes the supplier softly and blocks until the last ack.
pub struct IngestionChannel<T: IngestTransport> {
    transport: Arc<T>,
    config: IngestionChannelConfig,
    supplier: Arc<MessageBuffer<IngestMessage>>,
    state: Arc<IngestionState>,
    cancel_tx: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    activated: AtomicBool,
}

impl<T: IngestTransport> IngestionChannel<T> {
    pub fn new(
        transport: Arc<T>,
        config: IngestionChannelConfig,
        supplier: Arc<MessageBuffer<IngestMessage>>,
    ) -> Result<Self, DpError> {
        if config.max_streams == 0 {
            return Err(DpError::Config(ConfigError::InvalidValue(
                "ingest.multistream.max_streams must be at least 1".to_owned(),
            )));
        }
        let (cancel_tx, _) = watch::channel(false);
        Ok(IngestionChannel {
            transport,
            config,
            supplier,
            state: Arc::new(IngestionState::default()),
            cancel_tx,
            workers: std::sync::Mutex::new(Vec::new()),
            activated: AtomicBool::new(false),
        })
    }

    pub fn supplier(&self) -> Arc<MessageBuffer<IngestMessage>> {
        Arc::clone(&self.supplier)
    }

    /// Spawn the worker streams, activating the supplier first if the
    /// caller has not done so already.
    pub fn activate(&self) -> Result<(), DpError> {
        if self.activated.swap(true, Ordering::SeqCst) {
            return Err(DpError::InvalidState(
                "ingestion channel already activated".to_owned(),
            ));
        }
        if self.supplier.state() == crate::buffer::BufferState::New {
            self.supplier.activate().map_err(DpError::from)?;
        }
        let mut workers = self.workers.lock().expect("worker mutex");
        for index in 0..self.config.max_streams {
            workers.push(tokio::spawn(run_worker(
                Arc::clone(&self.transport),
                Arc::clone(&self.supplier),
                Arc::clone(&self.state),
                self.cancel_tx.subscribe(),
                self.config.provider_id.clone(),
                self.config.operation_timeout,
                index,
            )));
        }
        Ok(())
    }

    /// Stop accepting new messages, wait for every staged message to be
    /// sent and acked (or recorded as failed), and report the aggregate.
    pub async fn shutdown(&self) -> Result<IngestionResult, DpError> {
        if !self.activated.load(Ordering::SeqCst) {
            return Err(DpError::InvalidState(
                "ingestion channel was never activated".to_owned(),
            ));
        }
        self.supplier.shutdown().map_err(DpError::from)?;
        self.join_workers().await;
        let leftover = self.supplier.shutdown_now();
        if leftover > 0 {
            warn!(leftover, "messages left unsent after all streams exited");
        }
        Ok(self.ingestion_result())
    }

    /// Cancel the workers and discard staged messages.  Returns the
    /// aggregate together with the discard count.
    pub async fn shutdown_now(&self) -> Result<(IngestionResult, usize), DpError> {
        if !self.activated.load(Ordering::SeqCst) {
            return Err(DpError::InvalidState(
                "ingestion channel was never activated".to_owned(),
            ));
        }
        let _ = self.cancel_tx.send(true);
        let discarded = self.supplier.shutdown_now();
        self.join_workers().await;
        Ok((self.ingestion_result(), discarded))
    }

    async fn join_workers(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("worker mutex");
            workers.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "ingestion worker did not shut down cleanly");
            }
        }
    }

    pub fn ingestion_result(&self) -> IngestionResult {
        IngestionResult {
            accepted: self.state.accepted.load(Ordering::Relaxed),
            rejected: self.state.rejected.load(Ordering::Relaxed),
            errors: self.state.failures.lock().expect("failure mutex").clone(),
        }
    }

    /// Messages taken from the supplier and sent upstream.
    pub fn request_count(&self) -> u64 {
        self.state.requests.load(Ordering::Relaxed)
    }

    /// Acks received from the server.
    pub fn response_count(&self) -> u64 {
        self.state.responses.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker<T: IngestTransport>(
    transport: Arc<T>,
    supplier: Arc<MessageBuffer<IngestMessage>>,
    state: Arc<IngestionState>,
    mut cancel: watch::Receiver<bool>,
    provider_id: String,
    op_timeout: Duration,
    index: usize,
) {
    let (tx, rx) = mpsc::channel::<dp_wire::IngestDataRequest>(1);
    let outbound: dp_wire::IngestRequestStream = Box::pin(ReceiverStream::new(rx));
    let mut acks = match tokio::time::timeout(op_timeout, transport.ingest_stream(outbound)).await
    {
        Err(_) => {
            warn!(stream = index, "timed out opening ingestion stream");
            return;
        }
        Ok(Err(status)) => {
            warn!(stream = index, error = %status, "failed to open ingestion stream");
            return;
        }
        Ok(Ok(stream)) => stream,
    };

    loop {
        let taken = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            taken = supplier.take() => taken,
        };
        let message = match taken {
            Ok(Some(message)) => message,
            // Supplier drained: half-close and exit.
            Ok(None) => break,
            Err(e) => {
                debug!(stream = index, error = %e, "supplier unavailable");
                break;
            }
        };

        state.requests.fetch_add(1, Ordering::Relaxed);
        let request_id = message.client_request_id.clone();
        if tx.send(message.into_wire(&provider_id)).await.is_err() {
            state.record_failure(request_id, "stream closed before send");
            break;
        }

        let ack = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                state.record_failure(request_id, "cancelled while awaiting ack");
                break;
            }
            ack = tokio::time::timeout(op_timeout, acks.next()) => ack,
        };
        match ack {
            Err(_) => {
                state.record_failure(request_id, "timed out awaiting ack");
                break;
            }
            Ok(None) => {
                state.record_failure(request_id, "stream closed before ack");
                break;
            }
            Ok(Some(Err(status))) => {
                state.record_failure(request_id, status.to_string());
                break;
            }
            Ok(Some(Ok(response))) => {
                state.responses.fetch_add(1, Ordering::Relaxed);
                match dp_wire::AckStatus::try_from(response.ack) {
                    Ok(dp_wire::AckStatus::Accepted) => {
                        state.accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(dp_wire::AckStatus::Rejected) => {
                        state.rejected.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            stream = index,
                            request = %response.client_request_id,
                            reason = %response.message,
                            "ingest request rejected"
                        );
                    }
                    Err(_) => {
                        state.record_failure(
                            request_id,
                            format!("unknown ack status {}", response.ack),
                        );
                        break;
                    }
                }
            }
        }
    }

    // Half-close, then drain trailing acks so the transport closes cleanly.
    drop(tx);
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_millis(50), acks.next()).await
    {}
}
