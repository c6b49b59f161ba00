//! Time and domain primitives.
//!
//! Every `Timestamp` held by this crate is in normal form (`0 <= nanos <
//! 10^9`); the constructors normalise, so equality and ordering on the type
//! are equality and ordering of instants.  All arithmetic is checked
//! `i64`: an overflow is an error, never a saturation.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("timestamp arithmetic overflowed i64")]
    Overflow,
    #[error("interval start is after end")]
    InvertedInterval,
    #[error("sampling period must be positive, got {0}")]
    NonPositivePeriod(i64),
    #[error("sample count must be non-negative, got {0}")]
    NegativeCount(i64),
    #[error("timestamp list must be strictly increasing")]
    UnorderedList,
    #[error("wire timestamp is missing")]
    MissingTimestamp,
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// An instant: seconds since the UNIX epoch plus a nanosecond offset.
///
/// Field order matters: the derived ordering is chronological because the
/// nanos component of a normal-form value is always in `[0, 10^9)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    secs: i64,
    nanos: i64,
}

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Build a timestamp from a possibly non-normal pair, normalising.
    /// Fails only when the seconds carry overflows `i64`.
    pub fn new(epoch_seconds: i64, nanos: i64) -> Result<Self, TimeError> {
        let carry = nanos.div_euclid(NANOS_PER_SEC);
        let secs = epoch_seconds.checked_add(carry).ok_or(TimeError::Overflow)?;
        Ok(Timestamp {
            secs,
            nanos: nanos.rem_euclid(NANOS_PER_SEC),
        })
    }

    /// Build from a total nanosecond offset from the epoch.  Infallible:
    /// every `i64` nanosecond count has a normal form.
    pub fn from_nanos(total_nanos: i64) -> Self {
        Timestamp {
            secs: total_nanos.div_euclid(NANOS_PER_SEC),
            nanos: total_nanos.rem_euclid(NANOS_PER_SEC),
        }
    }

    /// The current wall-clock instant.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => Timestamp {
                secs: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
                nanos: i64::from(d.subsec_nanos()),
            },
            // Clock before the epoch: represent as a negative offset.
            Err(e) => {
                let d = e.duration();
                Timestamp::from_nanos(-(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)))
            }
        }
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> i64 {
        self.nanos
    }

    /// Shift by a signed nanosecond amount.
    pub fn add_nanos(self, n: i64) -> Result<Self, TimeError> {
        let secs = self
            .secs
            .checked_add(n.div_euclid(NANOS_PER_SEC))
            .ok_or(TimeError::Overflow)?;
        // Both components are below 10^9, so the sum cannot overflow.
        Timestamp::new(secs, self.nanos + n.rem_euclid(NANOS_PER_SEC))
    }

    /// Total nanoseconds from the epoch.  Overflows for instants further
    /// than ~292 years from the epoch.
    pub fn total_nanos(&self) -> Result<i64, TimeError> {
        self.secs
            .checked_mul(NANOS_PER_SEC)
            .and_then(|n| n.checked_add(self.nanos))
            .ok_or(TimeError::Overflow)
    }

    /// Signed nanoseconds from `self` to `later` (negative when `later`
    /// precedes `self`).
    pub fn nanos_until(&self, later: &Timestamp) -> Result<i64, TimeError> {
        later
            .secs
            .checked_sub(self.secs)
            .and_then(|ds| ds.checked_mul(NANOS_PER_SEC))
            .and_then(|dn| dn.checked_add(later.nanos - self.nanos))
            .ok_or(TimeError::Overflow)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

impl TryFrom<dp_wire::Timestamp> for Timestamp {
    type Error = TimeError;

    fn try_from(wire: dp_wire::Timestamp) -> Result<Self, TimeError> {
        Timestamp::new(wire.epoch_seconds, wire.nanos)
    }
}

impl From<Timestamp> for dp_wire::Timestamp {
    fn from(ts: Timestamp) -> Self {
        dp_wire::Timestamp {
            epoch_seconds: ts.secs,
            nanos: ts.nanos,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeInterval
// ---------------------------------------------------------------------------

/// A closed interval `[start, end]` with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeInterval {
    start: Timestamp,
    end: Timestamp,
}

impl TimeInterval {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, TimeError> {
        if start > end {
            return Err(TimeError::InvertedInterval);
        }
        Ok(TimeInterval { start, end })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Closed-interval intersection test: true when the intervals share at
    /// least one instant.  Symmetric by construction.
    pub fn intersects_closed(&self, other: &TimeInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Width in nanoseconds (`end - start`; zero for a point interval).
    pub fn width_nanos(&self) -> Result<i64, TimeError> {
        self.start.nanos_until(&self.end)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// SamplingClock
// ---------------------------------------------------------------------------

/// A uniform timebase: `count` samples from `start`, one every
/// `period_nanos` nanoseconds.
///
/// Two clocks are equivalent iff their periods, counts, and normalised
/// starts agree.  That is exactly derived equality, since `Timestamp`
/// maintains normal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplingClock {
    start: Timestamp,
    period_nanos: i64,
    count: i64,
}

impl SamplingClock {
    pub fn new(start: Timestamp, period_nanos: i64, count: i64) -> Result<Self, TimeError> {
        if period_nanos <= 0 {
            return Err(TimeError::NonPositivePeriod(period_nanos));
        }
        if count < 0 {
            return Err(TimeError::NegativeCount(count));
        }
        Ok(SamplingClock {
            start,
            period_nanos,
            count,
        })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn period_nanos(&self) -> i64 {
        self.period_nanos
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    /// The closed interval spanned by the clock's samples, or `None` for an
    /// empty clock.
    pub fn domain(&self) -> Result<Option<TimeInterval>, TimeError> {
        if self.count == 0 {
            return Ok(None);
        }
        let span = self
            .period_nanos
            .checked_mul(self.count - 1)
            .ok_or(TimeError::Overflow)?;
        let end = self.start.add_nanos(span)?;
        Ok(Some(TimeInterval::new(self.start, end)?))
    }

    /// The instant of sample `index` (unchecked against `count`).
    pub fn sample_at(&self, index: i64) -> Result<Timestamp, TimeError> {
        let offset = self
            .period_nanos
            .checked_mul(index)
            .ok_or(TimeError::Overflow)?;
        self.start.add_nanos(offset)
    }
}

impl TryFrom<dp_wire::SamplingClock> for SamplingClock {
    type Error = TimeError;

    fn try_from(wire: dp_wire::SamplingClock) -> Result<Self, TimeError> {
        let start = wire.start.ok_or(TimeError::MissingTimestamp)?;
        SamplingClock::new(Timestamp::try_from(start)?, wire.period_nanos, wire.count)
    }
}

impl From<SamplingClock> for dp_wire::SamplingClock {
    fn from(clock: SamplingClock) -> Self {
        dp_wire::SamplingClock {
            start: Some(clock.start.into()),
            period_nanos: clock.period_nanos,
            count: clock.count,
        }
    }
}

// ---------------------------------------------------------------------------
// TimestampList
// ---------------------------------------------------------------------------

/// A strictly increasing sequence of instants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimestampList(Vec<Timestamp>);

impl TimestampList {
    pub fn new(timestamps: Vec<Timestamp>) -> Result<Self, TimeError> {
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TimeError::UnorderedList);
        }
        Ok(TimestampList(timestamps))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Timestamp] {
        &self.0
    }

    pub fn first(&self) -> Option<Timestamp> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.0.last().copied()
    }

    /// The closed interval spanned by the list, or `None` when empty.
    pub fn domain(&self) -> Option<TimeInterval> {
        match (self.first(), self.last()) {
            // Strict ordering guarantees first <= last.
            (Some(first), Some(last)) => Some(TimeInterval { start: first, end: last }),
            _ => None,
        }
    }
}

impl TryFrom<dp_wire::TimestampList> for TimestampList {
    type Error = TimeError;

    fn try_from(wire: dp_wire::TimestampList) -> Result<Self, TimeError> {
        let timestamps = wire
            .timestamps
            .into_iter()
            .map(Timestamp::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        TimestampList::new(timestamps)
    }
}

impl From<&TimestampList> for dp_wire::TimestampList {
    fn from(list: &TimestampList) -> Self {
        dp_wire::TimestampList {
            timestamps: list.0.iter().copied().map(Into::into).collect(),
        }
    }
}

/// Timestamp lists are shared, not copied, between buckets and blocks.
pub type SharedTimestampList = Arc<TimestampList>;
