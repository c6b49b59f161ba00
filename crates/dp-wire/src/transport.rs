//! Transport seams for the two services.
//!
//! The recovery and ingestion channels drive these traits rather than the
//! concrete stubs, so tests can script stream behaviour without a live
//! endpoint.  The production implementation lives on the client library's
//! `Connection`.

use crate::messages::{
    IngestDataRequest, IngestDataResponse, QueryDataRequest, QueryDataResponse,
};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use tonic::Status;

/// Response frames of one query stream, in wire order.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<QueryDataResponse, Status>> + Send>>;

/// The request leg of a bidirectional query stream.
pub type RequestStream = Pin<Box<dyn Stream<Item = QueryDataRequest> + Send>>;

/// The request leg of an ingestion stream.
pub type IngestRequestStream = Pin<Box<dyn Stream<Item = IngestDataRequest> + Send>>;

/// Acks of one ingestion stream, in wire order.
pub type AckStream = Pin<Box<dyn Stream<Item = Result<IngestDataResponse, Status>> + Send>>;

/// Read-path stream flavours.
#[async_trait]
pub trait QueryTransport: Send + Sync + 'static {
    /// One request, one response.
    async fn unary(&self, request: QueryDataRequest) -> Result<QueryDataResponse, Status>;

    /// One request, a stream of response frames terminated by the remote.
    async fn server_stream(&self, request: QueryDataRequest) -> Result<ResponseStream, Status>;

    /// Spec-then-cursor-acks upstream, response frames downstream.
    async fn bidi_stream(&self, requests: RequestStream) -> Result<ResponseStream, Status>;
}

/// Write-path stream flavours.
#[async_trait]
pub trait IngestTransport: Send + Sync + 'static {
    /// One request, one ack.
    async fn ingest(&self, request: IngestDataRequest) -> Result<IngestDataResponse, Status>;

    /// Requests upstream, one ack per request downstream.  Half-closing the
    /// request leg ends the stream after trailing acks.
    async fn ingest_stream(&self, requests: IngestRequestStream) -> Result<AckStream, Status>;
}
