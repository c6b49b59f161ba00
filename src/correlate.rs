//! Raw data correlation: streaming group-by over response frames.
//!
//! Buckets are grouped by a content-derived domain key: the canonical
//! `(start, period, count)` triple of a sampling clock, or the shared
//! timestamp list itself.  Equivalent domains meet in O(1) through the
//! keyed store; heterogeneous domains partition naturally with no pairwise
//! comparison.  The store is sharded by `hash(key) mod shards`, so the
//! optional intra-frame parallelism gives each worker thread a disjoint
//! slice of the key space and the hot path takes no locks; `finish()` reads
//! across shards only after all workers have joined.

use crate::buffer::ByteSized;
use crate::config::ConfigError;
use crate::error::DpError;
use crate::models::block::CorrelatedBlock;
use crate::models::bucket::{Bucket, DataFrame, FrameStatus, TimestampSpec};
use crate::models::time::{SamplingClock, SharedTimestampList, Timestamp};
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Allow the per-frame bucket loop to fan out over threads.
    pub concurrency_enabled: bool,
    /// Fan out only when a frame carries more than this many usable buckets.
    pub concurrency_pivot: usize,
    /// Worker thread ceiling; also the shard count.  Capped by the number
    /// of logical processors.
    pub max_threads: usize,
    /// Accept a second bucket for a source already present in a block,
    /// keeping the later values.
    pub allow_domain_collision: bool,
    /// Raise on invalid buckets and disallowed collisions instead of
    /// logging and moving on.
    pub error_checking: bool,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig {
            concurrency_enabled: true,
            concurrency_pivot: 64,
            max_threads: logical_processors(),
            allow_domain_collision: false,
            error_checking: true,
        }
    }
}

fn logical_processors() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

// ---------------------------------------------------------------------------
// Domain keys
// ---------------------------------------------------------------------------

/// The grouping key of a bucket.  Clock keys compare on the normalised
/// start instant, so wire-level non-normal timestamps cannot split a block.
/// List keys hash and compare by content through the shared list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DomainKey {
    Clock {
        start: Timestamp,
        period_nanos: i64,
        count: i64,
    },
    List(SharedTimestampList),
}

impl DomainKey {
    fn from_spec(spec: &TimestampSpec) -> DomainKey {
        match spec {
            TimestampSpec::Clock(clock) => DomainKey::Clock {
                start: clock.start(),
                period_nanos: clock.period_nanos(),
                count: clock.count(),
            },
            TimestampSpec::List(list) => DomainKey::List(list.clone()),
        }
    }

    fn start(&self) -> Timestamp {
        match self {
            DomainKey::Clock { start, .. } => *start,
            DomainKey::List(list) => list.first().unwrap_or(Timestamp::EPOCH),
        }
    }

    fn period(&self) -> i64 {
        match self {
            DomainKey::Clock { period_nanos, .. } => *period_nanos,
            DomainKey::List(_) => 0,
        }
    }

    fn count(&self) -> i64 {
        match self {
            DomainKey::Clock { count, .. } => *count,
            DomainKey::List(list) => list.len() as i64,
        }
    }
}

impl Ord for DomainKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start()
            .cmp(&other.start())
            .then_with(|| self.period().cmp(&other.period()))
            .then_with(|| self.count().cmp(&other.count()))
            .then_with(|| match (self, other) {
                (DomainKey::List(a), DomainKey::List(b)) => a.as_slice().cmp(b.as_slice()),
                (DomainKey::Clock { .. }, DomainKey::Clock { .. }) => std::cmp::Ordering::Equal,
                (DomainKey::Clock { .. }, DomainKey::List(_)) => std::cmp::Ordering::Less,
                (DomainKey::List(_), DomainKey::Clock { .. }) => std::cmp::Ordering::Greater,
            })
    }
}

impl PartialOrd for DomainKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn key_hash(key: &DomainKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn column_bytes(name: &str, values: &[f64]) -> u64 {
    name.len() as u64 + 8 * values.len() as u64
}

// ---------------------------------------------------------------------------
// Partial blocks
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PartialBlock {
    timestamps: TimestampSpec,
    columns: BTreeMap<String, Vec<f64>>,
    bytes: u64,
}

impl PartialBlock {
    fn seeded(bucket: &Bucket) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(bucket.source_name.clone(), bucket.values.clone());
        PartialBlock {
            bytes: bucket.timestamps.byte_size()
                + column_bytes(&bucket.source_name, &bucket.values),
            timestamps: bucket.timestamps.clone(),
            columns,
        }
    }
}

fn insert_bucket(
    shard: &mut HashMap<DomainKey, PartialBlock>,
    key: DomainKey,
    bucket: &Bucket,
    config: &CorrelatorConfig,
) -> Result<(), DpError> {
    match shard.entry(key) {
        Entry::Vacant(vacant) => {
            vacant.insert(PartialBlock::seeded(bucket));
        }
        Entry::Occupied(mut occupied) => {
            let block = occupied.get_mut();
            if let Some(existing) = block.columns.get_mut(&bucket.source_name) {
                if config.allow_domain_collision {
                    debug!(source = %bucket.source_name, "domain collision, last write wins");
                } else {
                    if config.error_checking {
                        return Err(DpError::DuplicateSourceInBlock {
                            src: bucket.source_name.clone(),
                        });
                    }
                    warn!(source = %bucket.source_name, "duplicate source in block, keeping the later bucket");
                }
                block.bytes = block.bytes - 8 * existing.len() as u64
                    + 8 * bucket.values.len() as u64;
                existing.clone_from(&bucket.values);
            } else {
                block.bytes += column_bytes(&bucket.source_name, &bucket.values);
                block
                    .columns
                    .insert(bucket.source_name.clone(), bucket.values.clone());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Correlator
// ---------------------------------------------------------------------------

/// Streaming correlator.  Feed frames with [`push_frame`], retrieve blocks
/// with [`finish`]; after an aborting error only [`reset`] is valid.
///
/// [`push_frame`]: RawDataCorrelator::push_frame
/// [`finish`]: RawDataCorrelator::finish
/// [`reset`]: RawDataCorrelator::reset
#[derive(Debug)]
pub struct RawDataCorrelator {
    config: CorrelatorConfig,
    shards: Vec<HashMap<DomainKey, PartialBlock>>,
    bytes_processed: u64,
    finished: Option<Vec<CorrelatedBlock>>,
    poisoned: bool,
}

impl RawDataCorrelator {
    pub fn new(config: CorrelatorConfig) -> Result<Self, DpError> {
        if config.max_threads == 0 {
            return Err(DpError::Config(ConfigError::InvalidValue(
                "correlate.concurrency.thread_count must be at least 1".to_owned(),
            )));
        }
        let shard_count = config.max_threads.min(logical_processors());
        Ok(RawDataCorrelator {
            config,
            shards: (0..shard_count).map(|_| HashMap::new()).collect(),
            bytes_processed: 0,
            finished: None,
            poisoned: false,
        })
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Ingest one frame.  An empty frame is a no-op apart from byte
    /// accounting; a non-OK frame is counted but never correlated.
    pub fn push_frame(&mut self, frame: &DataFrame) -> Result<(), DpError> {
        if self.poisoned {
            return Err(DpError::InvalidState(
                "correlator aborted; call reset() before reuse".to_owned(),
            ));
        }
        if self.finished.is_some() {
            return Err(DpError::InvalidState(
                "correlator already finished; call reset() to restart".to_owned(),
            ));
        }
        self.bytes_processed += frame.byte_size();
        if frame.status != FrameStatus::Ok {
            debug!(status = ?frame.status, message = ?frame.message, "non-OK frame not correlated");
            return Ok(());
        }

        let shard_count = self.shards.len();
        let mut work: Vec<Vec<(DomainKey, &Bucket)>> = vec![Vec::new(); shard_count];
        let mut pending = 0usize;
        for bucket in &frame.buckets {
            let expected = bucket.timestamps.sample_count();
            if bucket.values.len() != expected {
                if self.config.error_checking {
                    self.poisoned = true;
                    return Err(DpError::InvalidBucket(format!(
                        "source {}: {} values against {} timestamps",
                        bucket.source_name,
                        bucket.values.len(),
                        expected
                    )));
                }
                warn!(
                    source = %bucket.source_name,
                    values = bucket.values.len(),
                    timestamps = expected,
                    "skipping bucket with mismatched value count"
                );
                continue;
            }
            if expected == 0 {
                continue;
            }
            let key = DomainKey::from_spec(&bucket.timestamps);
            let shard = usize::try_from(key_hash(&key) % shard_count as u64)
                .expect("shard index fits usize");
            work[shard].push((key, bucket));
            pending += 1;
        }

        let fan_out = self.config.concurrency_enabled
            && shard_count > 1
            && pending > self.config.concurrency_pivot;
        let result = if fan_out {
            let config = &self.config;
            std::thread::scope(|scope| {
                let mut handles = Vec::with_capacity(shard_count);
                for (shard, batch) in self.shards.iter_mut().zip(work) {
                    if batch.is_empty() {
                        continue;
                    }
                    handles.push(scope.spawn(move || {
                        for (key, bucket) in batch {
                            insert_bucket(shard, key, bucket, config)?;
                        }
                        Ok(())
                    }));
                }
                let mut first: Result<(), DpError> = Ok(());
                for handle in handles {
                    let joined = handle.join().expect("correlator shard worker panicked");
                    if first.is_ok() {
                        first = joined;
                    }
                }
                first
            })
        } else {
            let mut sequential: Result<(), DpError> = Ok(());
            'frames: for (shard, batch) in self.shards.iter_mut().zip(work) {
                for (key, bucket) in batch {
                    if let Err(e) = insert_bucket(shard, key, bucket, &self.config) {
                        sequential = Err(e);
                        break 'frames;
                    }
                }
            }
            sequential
        };

        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Freeze the partial blocks into correlated blocks, sorted by domain
    /// (start, then period, then count).  Idempotent: a second call
    /// returns the same blocks; use [`reset`](RawDataCorrelator::reset) to
    /// restart.
    pub fn finish(&mut self) -> Result<Vec<CorrelatedBlock>, DpError> {
        if self.poisoned {
            return Err(DpError::InvalidState(
                "correlator aborted; call reset() before reuse".to_owned(),
            ));
        }
        if let Some(blocks) = &self.finished {
            return Ok(blocks.clone());
        }
        let mut entries: Vec<(DomainKey, PartialBlock)> = self
            .shards
            .iter_mut()
            .flat_map(HashMap::drain)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let blocks: Vec<CorrelatedBlock> = entries
            .into_iter()
            .map(|(_, partial)| {
                CorrelatedBlock::new(partial.timestamps, partial.columns, partial.bytes)
            })
            .collect();
        self.finished = Some(blocks.clone());
        Ok(blocks)
    }

    /// Discard all state and make the correlator reusable.
    pub fn reset(&mut self) {
        for shard in &mut self.shards {
            shard.clear();
        }
        self.bytes_processed = 0;
        self.finished = None;
        self.poisoned = false;
    }

    /// Accounting bytes of every frame pushed so far.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Distinct domains seen so far (frozen count once finished).
    pub fn block_count(&self) -> usize {
        match &self.finished {
            Some(blocks) => blocks.len(),
            None => self.shards.iter().map(HashMap::len).sum(),
        }
    }
}

// ---------------------------------------------------------------------------
// Block coalescing (table construction pre-pass)
// ---------------------------------------------------------------------------

/// Merge time-adjacent clock blocks over identical source sets.
///
/// Input must be in [`RawDataCorrelator::finish`] order.  Two neighbours
/// merge when both carry sampling clocks with the same period, the same
/// sources, and the second starts exactly one period after the first ends,
/// which is the seam vertical decomposition produces.  List blocks never
/// merge.
pub fn coalesce_blocks(blocks: Vec<CorrelatedBlock>) -> Result<Vec<CorrelatedBlock>, DpError> {
    let mut out: Vec<CorrelatedBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        let mergeable = match out.last() {
            Some(prev) => contiguous(prev, &block)?,
            None => false,
        };
        if mergeable {
            let prev = out.pop().expect("checked non-empty above");
            out.push(merge(prev, block)?);
        } else {
            out.push(block);
        }
    }
    Ok(out)
}

fn contiguous(prev: &CorrelatedBlock, next: &CorrelatedBlock) -> Result<bool, DpError> {
    let (TimestampSpec::Clock(a), TimestampSpec::Clock(b)) =
        (prev.timestamps(), next.timestamps())
    else {
        return Ok(false);
    };
    if a.period_nanos() != b.period_nanos() {
        return Ok(false);
    }
    if !prev.columns().keys().eq(next.columns().keys()) {
        return Ok(false);
    }
    // First instant after a's last sample.
    Ok(a.sample_at(a.count())? == b.start())
}

fn merge(prev: CorrelatedBlock, next: CorrelatedBlock) -> Result<CorrelatedBlock, DpError> {
    let (prev_spec, mut columns, prev_bytes) = prev.into_columns();
    let (next_spec, next_columns, next_bytes) = next.into_columns();
    let (TimestampSpec::Clock(a), TimestampSpec::Clock(b)) = (&prev_spec, &next_spec) else {
        return Err(DpError::InvalidState(
            "coalesce candidates must both be clock blocks".to_owned(),
        ));
    };
    let clock = SamplingClock::new(a.start(), a.period_nanos(), a.count() + b.count())
        .map_err(DpError::Time)?;
    for (name, values) in next_columns {
        columns
            .get_mut(&name)
            .expect("source sets verified equal")
            .extend(values);
    }
    // One of the two clock accountings drops out of the merged block.
    let bytes = prev_bytes + next_bytes - next_spec.byte_size();
    Ok(CorrelatedBlock::new(
        TimestampSpec::Clock(clock),
        columns,
        bytes,
    ))
}
