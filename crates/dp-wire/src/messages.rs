//! Prost message types for the Ingestion and Query services (schema v1).
//!
//! Timestamps on the wire may arrive non-normal (`nanos` outside
//! `[0, 10^9)`); normalisation is the caller's concern.  Message fields of
//! message type are `Option` per proto3 semantics; a missing timestamp is
//! a protocol violation surfaced during model conversion, not here.

/// An instant as seconds since the UNIX epoch plus a nanosecond offset.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub epoch_seconds: i64,
    #[prost(int64, tag = "2")]
    pub nanos: i64,
}

/// A uniform timebase: `count` samples starting at `start`, one every
/// `period_nanos` nanoseconds.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SamplingClock {
    #[prost(message, optional, tag = "1")]
    pub start: Option<Timestamp>,
    #[prost(int64, tag = "2")]
    pub period_nanos: i64,
    #[prost(int64, tag = "3")]
    pub count: i64,
}

/// An explicit, strictly increasing list of sample instants.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimestampList {
    #[prost(message, repeated, tag = "1")]
    pub timestamps: Vec<Timestamp>,
}

/// A per-source payload of values with its timestamp specification.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataBucket {
    #[prost(string, tag = "1")]
    pub source_name: String,
    #[prost(double, repeated, tag = "2")]
    pub values: Vec<f64>,
    #[prost(oneof = "data_bucket::Timespec", tags = "3, 4")]
    pub timespec: Option<data_bucket::Timespec>,
}

pub mod data_bucket {
    /// Either a sampling clock or an explicit timestamp list.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Timespec {
        #[prost(message, tag = "3")]
        Clock(super::SamplingClock),
        #[prost(message, tag = "4")]
        List(super::TimestampList),
    }
}

/// The time-series selection of a query: which sources, over which closed
/// time range.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QuerySpec {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, repeated, tag = "2")]
    pub source_names: Vec<String>,
    #[prost(message, optional, tag = "3")]
    pub begin: Option<Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub end: Option<Timestamp>,
}

/// Page acknowledgement sent on the request leg of a bidirectional query
/// stream.  The server withholds the next response frame until the previous
/// one is acknowledged.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CursorOp {
    #[prost(string, tag = "1")]
    pub request_id: String,
}

/// A message on the request leg of a query RPC.  The first message must
/// carry the spec; subsequent messages (bidirectional only) carry cursor
/// operations.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryDataRequest {
    #[prost(oneof = "query_data_request::Payload", tags = "1, 2")]
    pub payload: Option<query_data_request::Payload>,
}

pub mod query_data_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Spec(super::QuerySpec),
        #[prost(message, tag = "2")]
        Cursor(super::CursorOp),
    }
}

impl QueryDataRequest {
    pub fn spec(spec: QuerySpec) -> Self {
        QueryDataRequest {
            payload: Some(query_data_request::Payload::Spec(spec)),
        }
    }

    pub fn cursor(request_id: String) -> Self {
        QueryDataRequest {
            payload: Some(query_data_request::Payload::Cursor(CursorOp { request_id })),
        }
    }
}

/// Per-frame status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameStatus {
    Ok = 0,
    Rejected = 1,
    Error = 2,
}

/// One response frame on a query stream: zero or more buckets plus a
/// status.  A `REJECTED` status applies to this frame only and is carried
/// as data; it does not terminate the stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryDataResponse {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(enumeration = "FrameStatus", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(message, repeated, tag = "4")]
    pub buckets: Vec<DataBucket>,
}

/// One ingestion message: a batch of buckets identified by a client-chosen
/// request id, acknowledged individually by the server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestDataRequest {
    #[prost(string, tag = "1")]
    pub client_request_id: String,
    #[prost(string, tag = "2")]
    pub provider_id: String,
    #[prost(message, repeated, tag = "3")]
    pub buckets: Vec<DataBucket>,
}

/// Per-request acknowledgement status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AckStatus {
    Accepted = 0,
    Rejected = 1,
}

/// The server's acknowledgement of a single `IngestDataRequest`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestDataResponse {
    #[prost(string, tag = "1")]
    pub client_request_id: String,
    #[prost(enumeration = "AckStatus", tag = "2")]
    pub ack: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn query_request_round_trips_spec_payload() {
        let req = QueryDataRequest::spec(QuerySpec {
            request_id: "r-1".to_owned(),
            source_names: vec!["src_1".to_owned(), "src_2".to_owned()],
            begin: Some(Timestamp {
                epoch_seconds: 0,
                nanos: 0,
            }),
            end: Some(Timestamp {
                epoch_seconds: 1,
                nanos: 0,
            }),
        });
        let bytes = req.encode_to_vec();
        let back = QueryDataRequest::decode(bytes.as_slice()).expect("decode");
        assert_eq!(back, req);
    }

    #[test]
    fn bucket_round_trips_clock_timespec() {
        let bucket = DataBucket {
            source_name: "src_1".to_owned(),
            values: vec![1.0, 2.0, 3.0],
            timespec: Some(data_bucket::Timespec::Clock(SamplingClock {
                start: Some(Timestamp {
                    epoch_seconds: 0,
                    nanos: 500,
                }),
                period_nanos: 1_000_000,
                count: 3,
            })),
        };
        let bytes = bucket.encode_to_vec();
        let back = DataBucket::decode(bytes.as_slice()).expect("decode");
        assert_eq!(back, bucket);
    }

    #[test]
    fn frame_status_decodes_from_raw_i32() {
        assert_eq!(FrameStatus::try_from(0).unwrap(), FrameStatus::Ok);
        assert_eq!(FrameStatus::try_from(1).unwrap(), FrameStatus::Rejected);
        assert_eq!(FrameStatus::try_from(2).unwrap(), FrameStatus::Error);
        assert!(FrameStatus::try_from(7).is_err());
    }
}
