// dp-test-utils: Shared test utilities for the Data Platform client suite.
//
// Provides scripted mock transports for the query and ingestion seams,
// plus builders for wire-level timestamps, clocks, buckets, and frames.

pub mod builders;
pub mod mock_ingest;
pub mod mock_query;

pub use mock_ingest::{AckDecision, MockIngestTransport};
pub use mock_query::{MockQueryTransport, ScriptItem, uniform_clock_responder};
