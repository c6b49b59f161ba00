//! Buckets and response frames in model form.
//!
//! Conversion from the wire types normalises every timestamp; a frame
//! carrying an unparsable timestamp fails conversion outright, which the
//! recovery channel treats as fatal.

use crate::buffer::ByteSized;
use crate::models::time::{
    SamplingClock, SharedTimestampList, TimeError, TimeInterval, TimestampList,
};
use std::sync::Arc;

/// Fixed per-sample cost used for byte accounting: an f64 value.
const VALUE_BYTES: u64 = 8;
/// Accounting cost of a sampling clock (start + period + count).
const CLOCK_BYTES: u64 = 24;
/// Accounting cost of one explicit timestamp (secs + nanos).
const LIST_ENTRY_BYTES: u64 = 16;
/// Accounting overhead per frame (status, id, framing).
const FRAME_OVERHEAD_BYTES: u64 = 16;

// ---------------------------------------------------------------------------
// TimestampSpec
// ---------------------------------------------------------------------------

/// The timestamp specification of a bucket: a uniform clock or an explicit
/// list.  Lists are shared (`Arc`) so that correlated blocks referencing
/// the same list do not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampSpec {
    Clock(SamplingClock),
    List(SharedTimestampList),
}

impl TimestampSpec {
    /// Number of samples the spec describes.
    pub fn sample_count(&self) -> usize {
        match self {
            TimestampSpec::Clock(clock) => usize::try_from(clock.count()).unwrap_or(0),
            TimestampSpec::List(list) => list.len(),
        }
    }

    /// The closed interval spanned, or `None` when empty.
    pub fn domain(&self) -> Result<Option<TimeInterval>, TimeError> {
        match self {
            TimestampSpec::Clock(clock) => clock.domain(),
            TimestampSpec::List(list) => Ok(list.domain()),
        }
    }

    /// Accounting size of the spec itself.
    pub fn byte_size(&self) -> u64 {
        match self {
            TimestampSpec::Clock(_) => CLOCK_BYTES,
            TimestampSpec::List(list) => LIST_ENTRY_BYTES * list.len() as u64,
        }
    }
}

impl TryFrom<dp_wire::data_bucket::Timespec> for TimestampSpec {
    type Error = TimeError;

    fn try_from(wire: dp_wire::data_bucket::Timespec) -> Result<Self, TimeError> {
        match wire {
            dp_wire::data_bucket::Timespec::Clock(clock) => {
                Ok(TimestampSpec::Clock(SamplingClock::try_from(clock)?))
            }
            dp_wire::data_bucket::Timespec::List(list) => {
                Ok(TimestampSpec::List(Arc::new(TimestampList::try_from(list)?)))
            }
        }
    }
}

impl From<&TimestampSpec> for dp_wire::data_bucket::Timespec {
    fn from(spec: &TimestampSpec) -> Self {
        match spec {
            TimestampSpec::Clock(clock) => {
                dp_wire::data_bucket::Timespec::Clock((*clock).into())
            }
            TimestampSpec::List(list) => {
                dp_wire::data_bucket::Timespec::List(list.as_ref().into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// A per-source payload of values with its timestamp specification.
///
/// A bucket does not validate that `values.len()` matches the sample count;
/// that check belongs to the correlator, where it is gated by the
/// `error_checking` option.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub source_name: String,
    pub timestamps: TimestampSpec,
    pub values: Vec<f64>,
}

impl Bucket {
    pub fn new(source_name: impl Into<String>, timestamps: TimestampSpec, values: Vec<f64>) -> Self {
        Bucket {
            source_name: source_name.into(),
            timestamps,
            values,
        }
    }

    pub fn domain(&self) -> Result<Option<TimeInterval>, TimeError> {
        self.timestamps.domain()
    }

    pub fn byte_size(&self) -> u64 {
        self.source_name.len() as u64
            + VALUE_BYTES * self.values.len() as u64
            + self.timestamps.byte_size()
    }
}

impl TryFrom<dp_wire::DataBucket> for Bucket {
    type Error = TimeError;

    fn try_from(wire: dp_wire::DataBucket) -> Result<Self, TimeError> {
        let timespec = wire.timespec.ok_or(TimeError::MissingTimestamp)?;
        Ok(Bucket {
            source_name: wire.source_name,
            timestamps: TimestampSpec::try_from(timespec)?,
            values: wire.values,
        })
    }
}

impl From<&Bucket> for dp_wire::DataBucket {
    fn from(bucket: &Bucket) -> Self {
        dp_wire::DataBucket {
            source_name: bucket.source_name.clone(),
            values: bucket.values.clone(),
            timespec: Some((&bucket.timestamps).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// DataFrame
// ---------------------------------------------------------------------------

/// Per-frame status.  `Rejected` is data, not an error: the frame still
/// flows through the buffer with its status attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    Rejected,
    Error,
}

impl From<dp_wire::FrameStatus> for FrameStatus {
    fn from(wire: dp_wire::FrameStatus) -> Self {
        match wire {
            dp_wire::FrameStatus::Ok => FrameStatus::Ok,
            dp_wire::FrameStatus::Rejected => FrameStatus::Rejected,
            dp_wire::FrameStatus::Error => FrameStatus::Error,
        }
    }
}

/// One response message from a recovery stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Index of the recovery stream that delivered the frame.  Frames keep
    /// wire order per stream; no order holds across streams.
    pub stream_index: usize,
    pub status: FrameStatus,
    pub message: Option<String>,
    pub buckets: Vec<Bucket>,
}

impl DataFrame {
    /// Convert a wire response.  Any unparsable timestamp fails the whole
    /// frame.  An unknown status code maps to `Error`.
    pub fn from_wire(
        stream_index: usize,
        wire: dp_wire::QueryDataResponse,
    ) -> Result<Self, TimeError> {
        let status = dp_wire::FrameStatus::try_from(wire.status)
            .map(FrameStatus::from)
            .unwrap_or(FrameStatus::Error);
        let buckets = wire
            .buckets
            .into_iter()
            .map(Bucket::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DataFrame {
            stream_index,
            status,
            message: if wire.message.is_empty() {
                None
            } else {
                Some(wire.message)
            },
            buckets,
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl ByteSized for DataFrame {
    fn byte_size(&self) -> u64 {
        FRAME_OVERHEAD_BYTES
            + self.message.as_ref().map_or(0, |m| m.len() as u64)
            + self.buckets.iter().map(Bucket::byte_size).sum::<u64>()
    }
}
