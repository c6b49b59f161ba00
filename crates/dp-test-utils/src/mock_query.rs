//! A scripted mock for the query transport seam.
//!
//! Streams are selected per request id when a script was registered, and
//! fall back to a responder function deriving frames from the query spec.
//! The default responder fails, so an unscripted request is a loud test
//! failure rather than a silent empty stream.

use async_trait::async_trait;
use dp_wire::{
    QueryDataRequest, QueryDataResponse, QuerySpec, QueryTransport, RequestStream,
    ResponseStream, query_data_request,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonic::Status;

/// One step of a stream script.
pub enum ScriptItem {
    /// Deliver a frame.
    Frame(QueryDataResponse),
    /// Fail the stream with a transport error.
    Fail(String),
    /// Hold the stream open without delivering.
    Delay(Duration),
}

type Responder = dyn Fn(&QuerySpec) -> Vec<ScriptItem> + Send + Sync;

pub struct MockQueryTransport {
    responder: Arc<Responder>,
    scripted: Arc<Mutex<HashMap<String, Vec<ScriptItem>>>>,
    opened: AtomicUsize,
}

impl MockQueryTransport {
    /// Every stream is answered by `responder` unless a script overrides
    /// its request id.
    pub fn with_responder(
        responder: impl Fn(&QuerySpec) -> Vec<ScriptItem> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(MockQueryTransport {
            responder: Arc::new(responder),
            scripted: Arc::new(Mutex::new(HashMap::new())),
            opened: AtomicUsize::new(0),
        })
    }

    /// Only per-request scripts; an unscripted request fails its stream.
    pub fn scripted() -> Arc<Self> {
        Self::with_responder(|spec| {
            vec![ScriptItem::Fail(format!(
                "no script registered for request '{}'",
                spec.request_id
            ))]
        })
    }

    /// Synthesise one OK frame per source, carrying a uniform clock at
    /// `rate_hz` spanning the requested closed range (inclusive count).
    pub fn uniform_clock(rate_hz: i64) -> Arc<Self> {
        Self::with_responder(uniform_clock_responder(rate_hz))
    }

    /// Register the script for one request id (sub-request ids are
    /// deterministic, e.g. `req/v0`).
    pub fn script_for(&self, request_id: &str, items: Vec<ScriptItem>) {
        self.scripted
            .lock()
            .expect("script mutex")
            .insert(request_id.to_owned(), items);
    }

    pub fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn items_for(&self, spec: &QuerySpec) -> Vec<ScriptItem> {
        let scripted = self
            .scripted
            .lock()
            .expect("script mutex")
            .remove(&spec.request_id);
        scripted.unwrap_or_else(|| (self.responder)(spec))
    }
}

/// A responder producing per-source clock buckets over the requested
/// range, `floor(width / period) + 1` samples each.
pub fn uniform_clock_responder(
    rate_hz: i64,
) -> impl Fn(&QuerySpec) -> Vec<ScriptItem> + Send + Sync + 'static {
    move |spec| {
        let period_nanos = 1_000_000_000 / rate_hz;
        let (Some(begin), Some(end)) = (spec.begin, spec.end) else {
            return vec![ScriptItem::Fail("query spec without a range".to_owned())];
        };
        let width = (end.epoch_seconds - begin.epoch_seconds) * 1_000_000_000
            + (end.nanos - begin.nanos);
        let count = width / period_nanos + 1;
        spec.source_names
            .iter()
            .map(|source| {
                ScriptItem::Frame(QueryDataResponse {
                    request_id: spec.request_id.clone(),
                    status: dp_wire::FrameStatus::Ok as i32,
                    message: String::new(),
                    buckets: vec![dp_wire::DataBucket {
                        source_name: source.clone(),
                        values: (0..count).map(|i| i as f64).collect(),
                        timespec: Some(dp_wire::data_bucket::Timespec::Clock(
                            dp_wire::SamplingClock {
                                start: Some(begin),
                                period_nanos,
                                count,
                            },
                        )),
                    }],
                })
            })
            .collect()
    }
}

fn play(items: Vec<ScriptItem>) -> ResponseStream {
    Box::pin(async_stream::stream! {
        for item in items {
            match item {
                ScriptItem::Frame(frame) => yield Ok(frame),
                ScriptItem::Fail(message) => {
                    yield Err(Status::unavailable(message));
                    return;
                }
                ScriptItem::Delay(duration) => tokio::time::sleep(duration).await,
            }
        }
    })
}

fn spec_of(request: QueryDataRequest) -> Result<QuerySpec, Status> {
    match request.payload {
        Some(query_data_request::Payload::Spec(spec)) => Ok(spec),
        _ => Err(Status::invalid_argument(
            "first query message must carry a spec",
        )),
    }
}

#[async_trait]
impl QueryTransport for MockQueryTransport {
    async fn unary(&self, request: QueryDataRequest) -> Result<QueryDataResponse, Status> {
        let spec = spec_of(request)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut merged: Option<QueryDataResponse> = None;
        for item in self.items_for(&spec) {
            match item {
                ScriptItem::Frame(frame) => match &mut merged {
                    None => merged = Some(frame),
                    Some(first) => first.buckets.extend(frame.buckets),
                },
                ScriptItem::Fail(message) => return Err(Status::unavailable(message)),
                ScriptItem::Delay(duration) => tokio::time::sleep(duration).await,
            }
        }
        merged.ok_or_else(|| Status::not_found("script produced no frames"))
    }

    async fn server_stream(
        &self,
        request: QueryDataRequest,
    ) -> Result<ResponseStream, Status> {
        let spec = spec_of(request)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(play(self.items_for(&spec)))
    }

    /// Plays the script one frame per cursor acknowledgement, as the
    /// server side of a paged recovery would.
    async fn bidi_stream(&self, requests: RequestStream) -> Result<ResponseStream, Status> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let responder = Arc::clone(&self.responder);
        let scripted = Arc::clone(&self.scripted);
        Ok(Box::pin(async_stream::stream! {
            let mut requests = requests;
            let Some(first) = requests.next().await else { return };
            let spec = match spec_of(first) {
                Ok(spec) => spec,
                Err(status) => {
                    yield Err(status);
                    return;
                }
            };
            let items = scripted
                .lock()
                .expect("script mutex")
                .remove(&spec.request_id)
                .unwrap_or_else(|| responder(&spec));
            let mut first_frame = true;
            for item in items {
                match item {
                    ScriptItem::Frame(frame) => {
                        if !first_frame {
                            // Wait for the cursor ack of the previous frame.
                            if requests.next().await.is_none() {
                                return;
                            }
                        }
                        first_frame = false;
                        yield Ok(frame);
                    }
                    ScriptItem::Fail(message) => {
                        yield Err(Status::unavailable(message));
                        return;
                    }
                    ScriptItem::Delay(duration) => tokio::time::sleep(duration).await,
                }
            }
        }))
    }
}
