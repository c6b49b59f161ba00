//! Hand-maintained tonic client stubs for the two platform services.
//!
//! The stubs follow the shape tonic's codegen would produce, specialised
//! to `tonic::transport::Channel`.  Method paths are part of the frozen v1
//! schema:
//!
//! - `dp.service.query.DpQueryService/{queryData, queryDataStream,
//!   queryDataBidiStream}`
//! - `dp.service.ingestion.DpIngestionService/{ingestData, ingestDataStream}`

use crate::messages::{
    IngestDataRequest, IngestDataResponse, QueryDataRequest, QueryDataResponse,
};
use futures_util::Stream;
use tonic::codec::{CompressionEncoding, ProstCodec};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

/// Per-stub options applied at construction.
#[derive(Debug, Clone, Copy)]
pub struct StubOptions {
    /// Upper bound for encoded messages in either direction.
    pub max_message_bytes: usize,
    /// Send gzip-compressed requests and accept gzip-compressed responses.
    pub gzip: bool,
}

impl Default for StubOptions {
    fn default() -> Self {
        StubOptions {
            max_message_bytes: 4 * 1024 * 1024,
            gzip: false,
        }
    }
}

fn configure(
    channel: Channel,
    options: StubOptions,
) -> tonic::client::Grpc<Channel> {
    let mut grpc = tonic::client::Grpc::new(channel)
        .max_decoding_message_size(options.max_message_bytes)
        .max_encoding_message_size(options.max_message_bytes);
    if options.gzip {
        grpc = grpc
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
    }
    grpc
}

// ---------------------------------------------------------------------------
// Query service
// ---------------------------------------------------------------------------

/// Client stub for the Query Service (read path).
#[derive(Debug, Clone)]
pub struct DpQueryServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl DpQueryServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self::with_options(channel, StubOptions::default())
    }

    pub fn with_options(channel: Channel, options: StubOptions) -> Self {
        DpQueryServiceClient {
            inner: configure(channel, options),
        }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))
    }

    /// Unary query: the whole result in a single response message.  Await
    /// the returned future for blocking-style use, or hold it for
    /// future-style use.
    pub async fn query_data(
        &mut self,
        request: QueryDataRequest,
    ) -> Result<Response<QueryDataResponse>, Status> {
        self.ready().await?;
        let codec: ProstCodec<QueryDataRequest, QueryDataResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static("/dp.service.query.DpQueryService/queryData");
        self.inner.unary(Request::new(request), path, codec).await
    }

    /// Server-streaming query: one request, many response frames.
    pub async fn query_data_stream(
        &mut self,
        request: QueryDataRequest,
    ) -> Result<Response<Streaming<QueryDataResponse>>, Status> {
        self.ready().await?;
        let codec: ProstCodec<QueryDataRequest, QueryDataResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static("/dp.service.query.DpQueryService/queryDataStream");
        self.inner
            .server_streaming(Request::new(request), path, codec)
            .await
    }

    /// Bidirectional query: the request leg carries the spec followed by
    /// cursor acknowledgements.
    pub async fn query_data_bidi<S>(
        &mut self,
        requests: S,
    ) -> Result<Response<Streaming<QueryDataResponse>>, Status>
    where
        S: Stream<Item = QueryDataRequest> + Send + 'static,
    {
        self.ready().await?;
        let codec: ProstCodec<QueryDataRequest, QueryDataResponse> = ProstCodec::default();
        let path =
            PathAndQuery::from_static("/dp.service.query.DpQueryService/queryDataBidiStream");
        self.inner
            .streaming(Request::new(requests), path, codec)
            .await
    }
}

// ---------------------------------------------------------------------------
// Ingestion service
// ---------------------------------------------------------------------------

/// Client stub for the Ingestion Service (write path).
#[derive(Debug, Clone)]
pub struct DpIngestionServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl DpIngestionServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self::with_options(channel, StubOptions::default())
    }

    pub fn with_options(channel: Channel, options: StubOptions) -> Self {
        DpIngestionServiceClient {
            inner: configure(channel, options),
        }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))
    }

    /// Unary ingestion of a single request.
    pub async fn ingest_data(
        &mut self,
        request: IngestDataRequest,
    ) -> Result<Response<IngestDataResponse>, Status> {
        self.ready().await?;
        let codec: ProstCodec<IngestDataRequest, IngestDataResponse> = ProstCodec::default();
        let path =
            PathAndQuery::from_static("/dp.service.ingestion.DpIngestionService/ingestData");
        self.inner.unary(Request::new(request), path, codec).await
    }

    /// Bidirectional ingestion: requests upstream, one ack per request
    /// downstream.
    pub async fn ingest_data_stream<S>(
        &mut self,
        requests: S,
    ) -> Result<Response<Streaming<IngestDataResponse>>, Status>
    where
        S: Stream<Item = IngestDataRequest> + Send + 'static,
    {
        self.ready().await?;
        let codec: ProstCodec<IngestDataRequest, IngestDataResponse> = ProstCodec::default();
        let path =
            PathAndQuery::from_static("/dp.service.ingestion.DpIngestionService/ingestDataStream");
        self.inner
            .streaming(Request::new(requests), path, codec)
            .await
    }
}
