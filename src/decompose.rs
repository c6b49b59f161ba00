//! Request decomposition: split one request into sub-requests along the
//! source axis, the time axis, or a grid of both.
//!
//! The time axis is handled as a family of half-open slices rendered in the
//! closed-interval model: every interior slice ends one nanosecond before
//! the next slice starts, and the last slice is closed at the original end.
//! Their union is exactly the original range and no sample instant is
//! duplicated at a boundary.

use crate::error::DpError;
use crate::request::DataRequest;
use crate::models::time::{TimeError, TimeInterval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Partition the source set; every sub-request keeps the full range.
    Horizontal,
    /// Partition the time range; every sub-request keeps all sources.
    Vertical,
    /// Partition both axes.
    Grid,
}

/// The outcome of a decomposition.  `effective()` can be smaller than
/// `requested` when an axis saturates (more slices than sources, or than
/// nanoseconds of range).
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub strategy: SplitStrategy,
    pub requested: usize,
    pub sub_requests: Vec<DataRequest>,
}

impl Decomposition {
    pub fn effective(&self) -> usize {
        self.sub_requests.len()
    }
}

/// Split `request` into up to `k` sub-requests.
///
/// `k == 1` returns the request unchanged as a singleton.
pub fn decompose(
    request: &DataRequest,
    strategy: SplitStrategy,
    k: usize,
) -> Result<Decomposition, DpError> {
    if k == 0 {
        return Err(DpError::InvalidRequest(
            "split count must be at least 1".to_owned(),
        ));
    }
    let sub_requests = if k == 1 {
        vec![request.clone()]
    } else {
        match strategy {
            SplitStrategy::Horizontal => split_horizontal(request, k),
            SplitStrategy::Vertical => split_vertical(request, k)?,
            SplitStrategy::Grid => split_grid(request, k)?,
        }
    };
    Ok(Decomposition {
        strategy,
        requested: k,
        sub_requests,
    })
}

// ---------------------------------------------------------------------------
// Horizontal
// ---------------------------------------------------------------------------

fn split_horizontal(request: &DataRequest, k: usize) -> Vec<DataRequest> {
    let sources = request.sources();
    let k = k.min(sources.len());
    let chunk = sources.len().div_ceil(k);
    sources
        .chunks(chunk)
        .enumerate()
        .map(|(i, slice)| {
            DataRequest::from_parts(
                slice.to_vec(),
                request.range(),
                format!("{}/h{i}", request.request_id()),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Vertical
// ---------------------------------------------------------------------------

/// Slice `range` into up to `t` adjacent intervals of equal nanosecond
/// width, the last absorbing the remainder.
fn slice_range(range: TimeInterval, t: usize) -> Result<Vec<TimeInterval>, TimeError> {
    let width = range.width_nanos()?;
    debug_assert!(width > 0, "request ranges are non-degenerate");
    let t = t.min(usize::try_from(width).unwrap_or(usize::MAX)).max(1);
    let slice = width / t as i64;
    let mut out = Vec::with_capacity(t);
    for i in 0..t {
        let start = range.start().add_nanos(slice * i as i64)?;
        let end = if i == t - 1 {
            range.end()
        } else {
            range.start().add_nanos(slice * (i as i64 + 1) - 1)?
        };
        out.push(TimeInterval::new(start, end)?);
    }
    Ok(out)
}

fn split_vertical(request: &DataRequest, k: usize) -> Result<Vec<DataRequest>, DpError> {
    let slices = slice_range(request.range(), k)?;
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            DataRequest::from_parts(
                request.sources().to_vec(),
                range,
                format!("{}/v{i}", request.request_id()),
            )
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// The source axis takes `floor(sqrt(k))` slices (capped by the source
/// count); the k sub-requests distribute over those slices so that any
/// surplus split lands on the time axis.  For prime k this yields uneven
/// per-slice time splitting rather than surplus source slices.
fn split_grid(request: &DataRequest, k: usize) -> Result<Vec<DataRequest>, DpError> {
    let sources = request.sources();
    let a = k.isqrt().max(1).min(sources.len());
    let chunk = sources.len().div_ceil(a);
    let slices: Vec<&[String]> = sources.chunks(chunk).collect();

    let columns = slices.len();
    let base = k / columns;
    let extra = k % columns;

    let mut out = Vec::with_capacity(k);
    for (i, slice) in slices.iter().enumerate() {
        let t = base + usize::from(i < extra);
        for (j, range) in slice_range(request.range(), t)?.into_iter().enumerate() {
            out.push(DataRequest::from_parts(
                slice.to_vec(),
                range,
                format!("{}/g{i}.{j}", request.request_id()),
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::time::{NANOS_PER_SEC, Timestamp};
    use crate::request::DataRequestBuilder;
    use std::collections::BTreeSet;

    fn request(sources: &[&str], start_nanos: i64, end_nanos: i64) -> DataRequest {
        DataRequestBuilder::new()
            .select_sources(sources.iter().copied())
            .range_between(
                Timestamp::from_nanos(start_nanos),
                Timestamp::from_nanos(end_nanos),
            )
            .request_id("req")
            .build()
            .unwrap()
    }

    #[test]
    fn zero_count_is_rejected() {
        let r = request(&["a"], 0, 10);
        assert!(decompose(&r, SplitStrategy::Horizontal, 0).is_err());
    }

    #[test]
    fn count_of_one_returns_the_request_unchanged() {
        let r = request(&["a", "b"], 0, 10);
        let d = decompose(&r, SplitStrategy::Grid, 1).unwrap();
        assert_eq!(d.effective(), 1);
        assert_eq!(d.sub_requests[0], r);
    }

    #[test]
    fn horizontal_partitions_sources_without_overlap_or_loss() {
        let r = request(&["s1", "s2", "s3", "s4", "s5"], 0, NANOS_PER_SEC);
        let d = decompose(&r, SplitStrategy::Horizontal, 3).unwrap();
        assert_eq!(d.effective(), 3);

        let sizes: Vec<usize> = d.sub_requests.iter().map(|s| s.sources().len()).collect();
        assert_eq!(sizes, [2, 2, 1]);

        let mut seen = BTreeSet::new();
        for sub in &d.sub_requests {
            assert_eq!(sub.range(), r.range(), "range is preserved");
            for source in sub.sources() {
                assert!(seen.insert(source.clone()), "no source in two slices");
            }
        }
        let all: BTreeSet<String> = r.sources().iter().cloned().collect();
        assert_eq!(seen, all, "union covers the original set");
    }

    #[test]
    fn horizontal_reduces_count_to_the_source_ceiling() {
        let r = request(&["a", "b"], 0, 10);
        let d = decompose(&r, SplitStrategy::Horizontal, 8).unwrap();
        assert_eq!(d.requested, 8);
        assert_eq!(d.effective(), 2);
    }

    #[test]
    fn vertical_split_of_four_seconds_into_four() {
        let r = request(&["src_1"], 0, 4 * NANOS_PER_SEC);
        let d = decompose(&r, SplitStrategy::Vertical, 4).unwrap();
        assert_eq!(d.effective(), 4);

        let bounds: Vec<(i64, i64)> = d
            .sub_requests
            .iter()
            .map(|s| {
                (
                    s.range().start().total_nanos().unwrap(),
                    s.range().end().total_nanos().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            bounds,
            [
                (0, NANOS_PER_SEC - 1),
                (NANOS_PER_SEC, 2 * NANOS_PER_SEC - 1),
                (2 * NANOS_PER_SEC, 3 * NANOS_PER_SEC - 1),
                (3 * NANOS_PER_SEC, 4 * NANOS_PER_SEC),
            ]
        );
        for sub in &d.sub_requests {
            assert_eq!(sub.sources(), r.sources(), "sources are preserved");
        }
    }

    #[test]
    fn vertical_last_slice_absorbs_the_remainder() {
        let r = request(&["a"], 0, 10);
        let d = decompose(&r, SplitStrategy::Vertical, 3).unwrap();
        let bounds: Vec<(i64, i64)> = d
            .sub_requests
            .iter()
            .map(|s| {
                (
                    s.range().start().total_nanos().unwrap(),
                    s.range().end().total_nanos().unwrap(),
                )
            })
            .collect();
        // width 10, slice 3: interior slices are 3ns, the last takes 4ns.
        assert_eq!(bounds, [(0, 2), (3, 5), (6, 10)]);
    }

    #[test]
    fn vertical_covers_the_range_exactly_without_interior_overlap() {
        let r = request(&["a"], 7, 7 + 1_000_003);
        let d = decompose(&r, SplitStrategy::Vertical, 7).unwrap();
        let subs = &d.sub_requests;
        assert_eq!(subs[0].range().start(), r.range().start());
        assert_eq!(subs.last().unwrap().range().end(), r.range().end());
        for pair in subs.windows(2) {
            let gap = pair[0]
                .range()
                .end()
                .nanos_until(&pair[1].range().start())
                .unwrap();
            assert_eq!(gap, 1, "adjacent slices meet with no gap and no overlap");
        }
    }

    #[test]
    fn vertical_reduces_count_to_the_nanosecond_ceiling() {
        let r = request(&["a"], 0, 3);
        let d = decompose(&r, SplitStrategy::Vertical, 10).unwrap();
        assert_eq!(d.effective(), 3);
    }

    #[test]
    fn grid_of_six_over_five_sources_is_two_by_three() {
        let r = request(&["s1", "s2", "s3", "s4", "s5"], 0, 3 * NANOS_PER_SEC);
        let d = decompose(&r, SplitStrategy::Grid, 6).unwrap();
        assert_eq!(d.effective(), 6, "exactly k sub-requests");

        // Two source slices of {3, 2} sources, three time slices each.
        let mut by_sources: std::collections::BTreeMap<Vec<String>, Vec<TimeInterval>> =
            std::collections::BTreeMap::new();
        for sub in &d.sub_requests {
            by_sources
                .entry(sub.sources().to_vec())
                .or_default()
                .push(sub.range());
        }
        assert_eq!(by_sources.len(), 2);
        let sizes: BTreeSet<usize> = by_sources.keys().map(Vec::len).collect();
        assert_eq!(sizes, BTreeSet::from([2, 3]));
        for ranges in by_sources.values() {
            assert_eq!(ranges.len(), 3, "surplus splits land on the time axis");
        }
    }

    #[test]
    fn grid_with_prime_count_puts_the_surplus_on_the_time_axis() {
        let r = request(&["s1", "s2", "s3", "s4", "s5"], 0, 5 * NANOS_PER_SEC);
        let d = decompose(&r, SplitStrategy::Grid, 5).unwrap();
        assert_eq!(d.effective(), 5, "exactly k even when k is prime");

        let mut per_slice: std::collections::BTreeMap<Vec<String>, usize> =
            std::collections::BTreeMap::new();
        for sub in &d.sub_requests {
            *per_slice.entry(sub.sources().to_vec()).or_default() += 1;
        }
        let counts: Vec<usize> = per_slice.values().copied().collect();
        assert_eq!(counts.iter().sum::<usize>(), 5);
        assert!(counts.contains(&3) && counts.contains(&2));
    }

    #[test]
    fn grid_bounding_box_union_equals_the_original() {
        let r = request(&["s1", "s2", "s3"], 100, 100 + NANOS_PER_SEC);
        let d = decompose(&r, SplitStrategy::Grid, 4).unwrap();

        let mut sources = BTreeSet::new();
        let mut min_start = i64::MAX;
        let mut max_end = i64::MIN;
        for sub in &d.sub_requests {
            sources.extend(sub.sources().iter().cloned());
            min_start = min_start.min(sub.range().start().total_nanos().unwrap());
            max_end = max_end.max(sub.range().end().total_nanos().unwrap());
        }
        assert_eq!(sources, r.sources().iter().cloned().collect());
        assert_eq!(min_start, 100);
        assert_eq!(max_end, 100 + NANOS_PER_SEC);
    }

    #[test]
    fn sub_request_ids_derive_from_the_parent() {
        let r = request(&["a", "b"], 0, 10);
        let d = decompose(&r, SplitStrategy::Horizontal, 2).unwrap();
        assert_eq!(d.sub_requests[0].request_id(), "req/h0");
        assert_eq!(d.sub_requests[1].request_id(), "req/h1");
    }
}
