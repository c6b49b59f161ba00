//! Service facade: thin entry points wiring configuration into the
//! channels and the correlator.  No business logic lives here.

use crate::buffer::MessageBuffer;
use crate::channel::ingest::{IngestMessage, IngestionChannel};
use crate::channel::query::{QueryChannel, RecoveryStats};
use crate::config::ClientConfig;
use crate::connect::Connection;
use crate::correlate::{RawDataCorrelator, coalesce_blocks};
use crate::error::DpError;
use crate::models::block::CorrelatedBlock;
use crate::models::bucket::DataFrame;
use crate::request::DataRequest;
use dp_wire::{IngestTransport, QueryTransport};
use std::sync::Arc;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Query service
// ---------------------------------------------------------------------------

/// Read-path entry point.
pub struct QueryService<T: QueryTransport> {
    transport: Arc<T>,
    config: ClientConfig,
}

impl QueryService<Connection> {
    /// Connect to the configured query endpoint.
    pub async fn connect(config: ClientConfig) -> Result<Self, DpError> {
        let connection = Connection::connect(&config.connections.query).await?;
        Ok(QueryService::with_transport(Arc::new(connection), config))
    }
}

impl<T: QueryTransport> QueryService<T> {
    pub fn with_transport(transport: Arc<T>, config: ClientConfig) -> Self {
        QueryService { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a recovery and hand back the live frame buffer plus the
    /// supervisor handle.  The caller drains the buffer to end-of-stream
    /// and then joins for the stats.
    pub fn query(&self, request: &DataRequest) -> Result<ActiveRecovery<T>, DpError> {
        self.validate_request(request)?;
        let channel = Arc::new(QueryChannel::new(
            Arc::clone(&self.transport),
            self.config.query_channel_config(),
            self.config.frame_buffer_config(),
        )?);
        let task_channel = Arc::clone(&channel);
        let request = request.clone();
        let handle = tokio::spawn(async move { task_channel.recover(&request).await });
        Ok(ActiveRecovery { channel, handle })
    }

    /// Run a recovery to completion and return the correlated blocks, with
    /// time-adjacent clock blocks coalesced across decomposition seams.
    pub async fn query_correlated(
        &self,
        request: &DataRequest,
    ) -> Result<Vec<CorrelatedBlock>, DpError> {
        let recovery = self.query(request)?;
        let buffer = recovery.buffer();
        let mut correlator = RawDataCorrelator::new(self.config.correlator_config())?;
        let while_streaming = self.config.query.correlate.while_streaming;
        let mut deferred: Vec<DataFrame> = Vec::new();

        let consumed: Result<(), DpError> = async {
            loop {
                match buffer.take().await {
                    Err(e) => return Err(e.into()),
                    Ok(None) => return Ok(()),
                    Ok(Some(frame)) => {
                        if while_streaming {
                            correlator.push_frame(&frame)?;
                        } else {
                            deferred.push(frame);
                        }
                    }
                }
            }
        }
        .await;

        if consumed.is_err() {
            recovery.cancel();
        }
        let recovered = recovery.join().await;
        consumed?;
        recovered?;

        if !while_streaming {
            for frame in &deferred {
                correlator.push_frame(frame)?;
            }
        }
        coalesce_blocks(correlator.finish()?)
    }

    /// Enforce the configured request caps before anything is opened.
    fn validate_request(&self, request: &DataRequest) -> Result<(), DpError> {
        let caps = &self.config.query.decompose;
        if caps.max_sources > 0 && request.sources().len() > caps.max_sources {
            return Err(DpError::InvalidRequest(format!(
                "request selects {} sources, cap is {}",
                request.sources().len(),
                caps.max_sources
            )));
        }
        if !caps.max_duration.is_zero() {
            let width = request.range().width_nanos().map_err(DpError::Time)?;
            let cap = i64::try_from(caps.max_duration.as_nanos()).unwrap_or(i64::MAX);
            if width > cap {
                return Err(DpError::InvalidRequest(format!(
                    "request spans {width}ns, cap is {cap}ns"
                )));
            }
        }
        Ok(())
    }
}

/// A running recovery: the buffer to drain plus the supervisor to join.
pub struct ActiveRecovery<T: QueryTransport> {
    channel: Arc<QueryChannel<T>>,
    handle: JoinHandle<Result<RecoveryStats, DpError>>,
}

impl<T: QueryTransport> ActiveRecovery<T> {
    pub fn buffer(&self) -> Arc<MessageBuffer<DataFrame>> {
        self.channel.buffer()
    }

    pub fn channel(&self) -> Arc<QueryChannel<T>> {
        Arc::clone(&self.channel)
    }

    pub fn cancel(&self) {
        self.channel.cancel();
    }

    /// Wait for the supervisor; a panicked recovery task surfaces as
    /// `InvalidState` rather than a panic in the caller.
    pub async fn join(self) -> Result<RecoveryStats, DpError> {
        self.handle.await.unwrap_or_else(|e| {
            Err(DpError::InvalidState(format!("recovery task panicked: {e}")))
        })
    }
}

// ---------------------------------------------------------------------------
// Ingestion service
// ---------------------------------------------------------------------------

/// Write-path entry point.
pub struct IngestionService<T: IngestTransport> {
    transport: Arc<T>,
    config: ClientConfig,
}

impl IngestionService<Connection> {
    /// Connect to the configured ingestion endpoint.
    pub async fn connect(config: ClientConfig) -> Result<Self, DpError> {
        let connection = Connection::connect(&config.connections.ingestion).await?;
        Ok(IngestionService::with_transport(Arc::new(connection), config))
    }
}

impl<T: IngestTransport> IngestionService<T> {
    pub fn with_transport(transport: Arc<T>, config: ClientConfig) -> Self {
        IngestionService { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A supplier buffer sized per the ingest configuration, ready for the
    /// caller to activate and stage messages into.
    pub fn new_supplier(&self) -> Arc<MessageBuffer<IngestMessage>> {
        Arc::new(MessageBuffer::new(self.config.supplier_buffer_config()))
    }

    /// Open the ingestion channel over the given supplier and start its
    /// worker streams.  The caller keeps staging messages, then calls
    /// `shutdown()` on the channel for the aggregate result.
    pub fn ingest(
        &self,
        supplier: Arc<MessageBuffer<IngestMessage>>,
    ) -> Result<Arc<IngestionChannel<T>>, DpError> {
        let channel = Arc::new(IngestionChannel::new(
            Arc::clone(&self.transport),
            self.config.ingestion_channel_config(),
            supplier,
        )?);
        channel.activate()?;
        Ok(channel)
    }
}
