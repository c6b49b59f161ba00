//! Correlated blocks: the output of raw-data correlation.

use crate::models::bucket::TimestampSpec;
use crate::models::time::{TimeError, TimeInterval};
use std::collections::BTreeMap;

/// A maximal set of buckets sharing one timestamp specification, as a
/// column set `source -> values`.
///
/// Blocks are the pre-stage of a result table: every column has exactly
/// `sample_count()` values, aligned to the shared timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedBlock {
    timestamps: TimestampSpec,
    columns: BTreeMap<String, Vec<f64>>,
    bytes: u64,
}

impl CorrelatedBlock {
    pub(crate) fn new(
        timestamps: TimestampSpec,
        columns: BTreeMap<String, Vec<f64>>,
        bytes: u64,
    ) -> Self {
        CorrelatedBlock {
            timestamps,
            columns,
            bytes,
        }
    }

    pub fn timestamps(&self) -> &TimestampSpec {
        &self.timestamps
    }

    pub fn sample_count(&self) -> usize {
        self.timestamps.sample_count()
    }

    pub fn source_count(&self) -> usize {
        self.columns.len()
    }

    /// Source names in lexicographic order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn values(&self, source: &str) -> Option<&[f64]> {
        self.columns.get(source).map(Vec::as_slice)
    }

    pub fn columns(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.columns
    }

    pub(crate) fn into_columns(self) -> (TimestampSpec, BTreeMap<String, Vec<f64>>, u64) {
        (self.timestamps, self.columns, self.bytes)
    }

    /// Byte-allocation counter: accounting size of the block's columns and
    /// timestamps.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn domain(&self) -> Result<Option<TimeInterval>, TimeError> {
        self.timestamps.domain()
    }
}
