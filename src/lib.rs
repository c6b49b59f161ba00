//! Client library for the Data Platform time-series services.
//!
//! The platform exposes two gRPC services: an Ingestion Service (write
//! path) and a Query Service (read path).  This crate provides the
//! performance-critical client machinery for both:
//!
//! - request building and decomposition along the source axis, the time
//!   axis, or a grid of both ([`request`], [`decompose`]);
//! - the bounded, back-pressured message buffer shared by both directions
//!   ([`buffer`]);
//! - the multi-stream recovery engine and the ingestion pump
//!   ([`channel`]);
//! - raw data correlation into blocks sharing one sampling domain
//!   ([`correlate`]);
//! - thin service facades wiring configuration into the above
//!   ([`service`]).
//!
//! A typical read:
//!
//! ```no_run
//! # async fn example() -> Result<(), dp_client::DpError> {
//! use dp_client::{DataRequestBuilder, QueryService, load_config};
//! use std::time::Duration;
//!
//! let config = load_config()?;
//! let service = QueryService::connect(config).await?;
//! let request = DataRequestBuilder::new()
//!     .select_sources(["bpm_01:x", "bpm_01:y"])
//!     .range_offset(Duration::from_secs(60))?
//!     .build()?;
//! let blocks = service.query_correlated(&request).await?;
//! # Ok(()) }
//! ```

pub mod buffer;
pub mod channel;
pub mod config;
pub mod connect;
pub mod correlate;
pub mod decompose;
pub mod error;
pub mod models;
pub mod request;
pub mod service;

pub use buffer::{BufferConfig, BufferError, BufferState, ByteSized, MessageBuffer};
pub use channel::{
    DecompositionPolicy, IngestFailure, IngestMessage, IngestionChannel,
    IngestionChannelConfig, IngestionResult, QueryChannel, QueryChannelConfig, RecoveryStats,
    StreamType,
};
pub use config::{ClientConfig, ConfigError, load_config, load_config_from_path, load_config_from_str};
pub use connect::{Connection, ConnectionConfig, TlsMode};
pub use correlate::{CorrelatorConfig, RawDataCorrelator, coalesce_blocks};
pub use decompose::{Decomposition, SplitStrategy, decompose};
pub use error::DpError;
pub use models::{
    Bucket, CorrelatedBlock, DataFrame, FrameStatus, SamplingClock, TimeError, TimeInterval,
    Timestamp, TimestampList, TimestampSpec,
};
pub use request::{DataRequest, DataRequestBuilder};
pub use service::{ActiveRecovery, IngestionService, QueryService};
