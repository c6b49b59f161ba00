//! Builders for wire-level fixtures.

use dp_wire::{
    DataBucket, IngestDataRequest, QueryDataResponse, QuerySpec, SamplingClock, Timestamp,
    data_bucket,
};

/// A wire timestamp from a total nanosecond offset (normal form).
pub fn timestamp(total_nanos: i64) -> Timestamp {
    Timestamp {
        epoch_seconds: total_nanos.div_euclid(1_000_000_000),
        nanos: total_nanos.rem_euclid(1_000_000_000),
    }
}

pub fn clock(start_nanos: i64, period_nanos: i64, count: i64) -> SamplingClock {
    SamplingClock {
        start: Some(timestamp(start_nanos)),
        period_nanos,
        count,
    }
}

/// A clock bucket whose values ramp `0.0, 1.0, ...` to the clock count.
pub fn clock_bucket(source: &str, clock: SamplingClock) -> DataBucket {
    let count = usize::try_from(clock.count).unwrap_or(0);
    clock_bucket_with_values(source, clock, ramp(count))
}

pub fn clock_bucket_with_values(
    source: &str,
    clock: SamplingClock,
    values: Vec<f64>,
) -> DataBucket {
    DataBucket {
        source_name: source.to_owned(),
        values,
        timespec: Some(data_bucket::Timespec::Clock(clock)),
    }
}

pub fn list_bucket(source: &str, instants: &[i64]) -> DataBucket {
    DataBucket {
        source_name: source.to_owned(),
        values: ramp(instants.len()),
        timespec: Some(data_bucket::Timespec::List(dp_wire::TimestampList {
            timestamps: instants.iter().copied().map(timestamp).collect(),
        })),
    }
}

pub fn ramp(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

pub fn query_spec(
    request_id: &str,
    sources: &[&str],
    begin_nanos: i64,
    end_nanos: i64,
) -> QuerySpec {
    QuerySpec {
        request_id: request_id.to_owned(),
        source_names: sources.iter().map(|s| (*s).to_owned()).collect(),
        begin: Some(timestamp(begin_nanos)),
        end: Some(timestamp(end_nanos)),
    }
}

pub fn ok_frame(request_id: &str, buckets: Vec<DataBucket>) -> QueryDataResponse {
    QueryDataResponse {
        request_id: request_id.to_owned(),
        status: dp_wire::FrameStatus::Ok as i32,
        message: String::new(),
        buckets,
    }
}

pub fn rejected_frame(request_id: &str, message: &str) -> QueryDataResponse {
    QueryDataResponse {
        request_id: request_id.to_owned(),
        status: dp_wire::FrameStatus::Rejected as i32,
        message: message.to_owned(),
        buckets: vec![],
    }
}

pub fn ingest_request(client_request_id: &str, buckets: Vec<DataBucket>) -> IngestDataRequest {
    IngestDataRequest {
        client_request_id: client_request_id.to_owned(),
        provider_id: "test-provider".to_owned(),
        buckets,
    }
}
