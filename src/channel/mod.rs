//! Streaming channels: the multi-stream recovery engine (read path) and
//! the ingestion pump (write path).

pub mod ingest;
pub mod query;

pub use ingest::{
    IngestFailure, IngestMessage, IngestionChannel, IngestionChannelConfig, IngestionResult,
};
pub use query::{
    DecompositionPolicy, QueryChannel, QueryChannelConfig, RecoveryStats, StreamType,
};

use tokio::sync::watch;

/// Resolves once cancellation is signalled.  A dropped sender counts as
/// cancellation: an orphaned worker has nothing left to deliver to.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
