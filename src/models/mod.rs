//! Model types: time primitives, buckets, frames, and correlated blocks.

pub mod block;
pub mod bucket;
pub mod time;

pub use block::CorrelatedBlock;
pub use bucket::{Bucket, DataFrame, FrameStatus, TimestampSpec};
pub use time::{
    NANOS_PER_SEC, SamplingClock, SharedTimestampList, TimeError, TimeInterval, Timestamp,
    TimestampList,
};
