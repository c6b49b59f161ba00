// dp-wire: Wire message types and client stubs for the Data Platform.
//
// The message schema is frozen (v1); the structs below are hand-maintained
// against the platform IDL rather than generated at build time, so the
// crate builds without a protoc toolchain.  Field numbers and service
// method paths must never change without a platform schema revision.

pub mod client;
pub mod messages;
pub mod transport;

pub use client::{DpIngestionServiceClient, DpQueryServiceClient, StubOptions};
pub use messages::*;
pub use transport::{
    AckStream, IngestRequestStream, IngestTransport, QueryTransport, RequestStream,
    ResponseStream,
};
