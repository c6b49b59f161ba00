//! A scripted mock for the ingestion transport seam.

use async_trait::async_trait;
use dp_wire::{
    AckStream, IngestDataRequest, IngestDataResponse, IngestRequestStream, IngestTransport,
};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use tonic::Status;

/// What the mock server does with one request.
#[derive(Debug, Clone)]
pub enum AckDecision {
    Accept,
    Reject(String),
    /// Fail the stream before acking this request.
    FailBeforeAck(String),
}

type AckPolicy = dyn Fn(&IngestDataRequest) -> AckDecision + Send + Sync;

pub struct MockIngestTransport {
    policy: Arc<AckPolicy>,
    seen: Arc<Mutex<Vec<IngestDataRequest>>>,
}

impl MockIngestTransport {
    pub fn with_policy(
        policy: impl Fn(&IngestDataRequest) -> AckDecision + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(MockIngestTransport {
            policy: Arc::new(policy),
            seen: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn accept_all() -> Arc<Self> {
        Self::with_policy(|_| AckDecision::Accept)
    }

    /// Every request the mock received, across all streams, in arrival
    /// order per stream.
    pub fn seen(&self) -> Vec<IngestDataRequest> {
        self.seen.lock().expect("seen mutex").clone()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("seen mutex").len()
    }
}

fn ack_of(request: &IngestDataRequest, decision: &AckDecision) -> Result<IngestDataResponse, Status> {
    match decision {
        AckDecision::Accept => Ok(IngestDataResponse {
            client_request_id: request.client_request_id.clone(),
            ack: dp_wire::AckStatus::Accepted as i32,
            message: String::new(),
        }),
        AckDecision::Reject(reason) => Ok(IngestDataResponse {
            client_request_id: request.client_request_id.clone(),
            ack: dp_wire::AckStatus::Rejected as i32,
            message: reason.clone(),
        }),
        AckDecision::FailBeforeAck(message) => Err(Status::unavailable(message.clone())),
    }
}

#[async_trait]
impl IngestTransport for MockIngestTransport {
    async fn ingest(&self, request: IngestDataRequest) -> Result<IngestDataResponse, Status> {
        let decision = (self.policy)(&request);
        self.seen.lock().expect("seen mutex").push(request.clone());
        ack_of(&request, &decision)
    }

    async fn ingest_stream(&self, requests: IngestRequestStream) -> Result<AckStream, Status> {
        let policy = Arc::clone(&self.policy);
        let seen = Arc::clone(&self.seen);
        Ok(Box::pin(async_stream::stream! {
            let mut requests = requests;
            while let Some(request) = requests.next().await {
                let decision = policy(&request);
                seen.lock().expect("seen mutex").push(request.clone());
                match ack_of(&request, &decision) {
                    Ok(ack) => yield Ok(ack),
                    Err(status) => {
                        yield Err(status);
                        return;
                    }
                }
            }
        }))
    }
}
