//! Data request construction.
//!
//! A [`DataRequest`] names a non-empty source set and a closed time range
//! with `start < end`.  The builder collects sources and range edits in any
//! order and validates once at `build()`.

use crate::error::DpError;
use crate::models::time::{NANOS_PER_SEC, TimeError, TimeInterval, Timestamp};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// A validated query request.  Sources are held sorted and deduplicated,
/// which makes the fingerprint canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    sources: Vec<String>,
    range: TimeInterval,
    request_id: String,
}

impl DataRequest {
    pub(crate) fn from_parts(
        sources: Vec<String>,
        range: TimeInterval,
        request_id: String,
    ) -> Self {
        DataRequest {
            sources,
            range,
            request_id,
        }
    }

    pub fn builder() -> DataRequestBuilder {
        DataRequestBuilder::new()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn range(&self) -> TimeInterval {
        self.range
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Deterministic fingerprint of `(sorted sources, range)`: a SHA-256
    /// over the canonical byte encoding, as lowercase hex.  The request id
    /// deliberately does not participate.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for source in &self.sources {
            hasher.update(source.as_bytes());
            hasher.update([0u8]);
        }
        for part in [
            self.range.start().epoch_seconds(),
            self.range.start().nanos(),
            self.range.end().epoch_seconds(),
            self.range.end().nanos(),
        ] {
            hasher.update(part.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }

    /// Estimated recovery size in source-seconds: the multi-stream pivot
    /// unit.  A sub-second range still counts as one.
    pub fn estimated_source_seconds(&self) -> Result<u64, TimeError> {
        let width = self.range.width_nanos()?;
        let seconds = (width / NANOS_PER_SEC).max(1) as u64;
        Ok(self.sources.len() as u64 * seconds)
    }

    /// The wire form of this request.
    pub fn to_wire_spec(&self) -> dp_wire::QuerySpec {
        dp_wire::QuerySpec {
            request_id: self.request_id.clone(),
            source_names: self.sources.clone(),
            begin: Some(self.range.start().into()),
            end: Some(self.range.end().into()),
        }
    }
}

/// Builder for [`DataRequest`].
#[derive(Debug, Clone, Default)]
pub struct DataRequestBuilder {
    sources: Vec<String>,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    request_id: Option<String>,
}

impl DataRequestBuilder {
    pub fn new() -> Self {
        DataRequestBuilder::default()
    }

    /// Add one source to the selection.
    pub fn select_source(mut self, name: impl Into<String>) -> Self {
        self.sources.push(name.into());
        self
    }

    /// Add many sources to the selection.
    pub fn select_sources<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.extend(names.into_iter().map(Into::into));
        self
    }

    /// Fix the end instant of the range.
    pub fn range_before(mut self, ts: Timestamp) -> Self {
        self.end = Some(ts);
        self
    }

    /// Fix the start instant of the range.
    pub fn range_after(mut self, ts: Timestamp) -> Self {
        self.start = Some(ts);
        self
    }

    /// Fix both endpoints.
    pub fn range_between(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// `[start, start + duration]`.
    pub fn range_duration(self, start: Timestamp, duration: Duration) -> Result<Self, DpError> {
        let nanos = i64::try_from(duration.as_nanos()).map_err(|_| TimeError::Overflow)?;
        let end = start.add_nanos(nanos)?;
        Ok(self.range_between(start, end))
    }

    /// `[now - offset, now]`.
    pub fn range_offset(self, offset: Duration) -> Result<Self, DpError> {
        let now = Timestamp::now();
        let nanos = i64::try_from(offset.as_nanos()).map_err(|_| TimeError::Overflow)?;
        let start = now.add_nanos(-nanos)?;
        Ok(self.range_between(start, now))
    }

    /// Use a caller-chosen request id instead of a generated UUID.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Clear all accumulated state.
    pub fn reset(&mut self) {
        *self = DataRequestBuilder::default();
    }

    /// Validate and produce the request.
    pub fn build(self) -> Result<DataRequest, DpError> {
        if self.sources.is_empty() {
            return Err(DpError::InvalidRequest("empty source set".to_owned()));
        }
        let (start, end) = match (self.start, self.end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(DpError::InvalidRequest(
                    "time range is not fully specified".to_owned(),
                ));
            }
        };
        if start >= end {
            return Err(DpError::InvalidRequest(format!(
                "range start {start} is not before end {end}"
            )));
        }
        let mut sources = self.sources;
        sources.sort();
        sources.dedup();
        Ok(DataRequest {
            sources,
            range: TimeInterval::new(start, end).expect("start < end checked above"),
            request_id: self
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        })
    }

    /// Validate and produce the wire form directly.
    pub fn build_wire(self) -> Result<dp_wire::QuerySpec, DpError> {
        Ok(self.build()?.to_wire_spec())
    }
}
