//! Partitioning of a search range into chunks.
//!
//! [`IntervalManager`] owns the part of the range that has not been handed
//! out yet and issues chunks from its front. Over the lifetime of one manager
//! the issued chunks tile the original range exactly: no integer is skipped
//! and none is issued twice. Once exhausted, a manager stays exhausted.
//!
//! The manager is not internally synchronized. It is owned by the scheduler's
//! single orchestrator task and mutated through `&mut self`.

use crate::{Chunk, SearchRange, Span};

#[derive(Clone, Debug)]
pub struct IntervalManager {
    range: SearchRange,
    /// First integer not yet issued, or `None` once everything was issued.
    next: Option<i64>,
}

impl IntervalManager {
    pub const fn new(range: SearchRange) -> Self {
        Self {
            range,
            next: Some(range.min()),
        }
    }

    /// Issues up to `requested` integers from the front of the remaining
    /// range as a contiguous chunk.
    ///
    /// When fewer than `requested` integers remain, the chunk holds exactly
    /// what remains. A request of `0` is served as `1`.
    ///
    /// Returns `None` if the manager is already exhausted.
    pub fn pull_chunk(&mut self, requested: u64) -> Option<Chunk> {
        let start = self.next?;
        let max = self.range.max();

        let size = i128::from(requested.max(1));
        let end = (i128::from(start) + size - 1).min(i128::from(max));
        let end = i64::try_from(end).unwrap_or(max);

        self.next = if end == max { None } else { Some(end + 1) };

        tracing::trace!(start, end, requested, "issued chunk");

        Span::new(start, end).ok().map(Chunk::contiguous)
    }

    /// `true` once every integer of the range has been issued.
    pub const fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }

    /// Number of integers not issued yet.
    pub fn remaining(&self) -> u64 {
        self.next
            .map_or(0, |next| self.range.max().abs_diff(next).saturating_add(1))
    }

    pub const fn range(&self) -> SearchRange {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(min: i64, max: i64) -> IntervalManager {
        IntervalManager::new(SearchRange::new(min, max).unwrap())
    }

    #[test]
    fn pulls_from_the_front() {
        let mut intervals = manager(1, 20);
        let first = intervals.pull_chunk(8).unwrap();
        let second = intervals.pull_chunk(8).unwrap();

        assert_eq!(first.spans(), &[Span::new(1, 8).unwrap()]);
        assert_eq!(second.spans(), &[Span::new(9, 16).unwrap()]);
        assert_eq!(intervals.remaining(), 4);
        assert!(!intervals.is_exhausted());
    }

    #[test]
    fn last_pull_returns_exactly_what_remains() {
        let mut intervals = manager(1, 20);
        intervals.pull_chunk(15).unwrap();
        let tail = intervals.pull_chunk(1000).unwrap();

        assert_eq!(tail.spans(), &[Span::new(16, 20).unwrap()]);
        assert!(intervals.is_exhausted());
        assert_eq!(intervals.remaining(), 0);
    }

    #[test]
    fn exhaustion_is_monotonic() {
        let mut intervals = manager(0, 1);
        intervals.pull_chunk(10).unwrap();
        assert!(intervals.is_exhausted());
        assert!(intervals.pull_chunk(10).is_none());
        assert!(intervals.pull_chunk(1).is_none());
        assert!(intervals.is_exhausted());
    }

    #[test]
    fn zero_request_is_served_as_one() {
        let mut intervals = manager(5, 6);
        let chunk = intervals.pull_chunk(0).unwrap();
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn pulls_tile_the_range() {
        let sizes = [1_u64, 7, 3, 100, 2, 13, 1, 64];
        let mut intervals = manager(-50, 250);
        let mut covered = Vec::new();
        let mut i = 0;
        while let Some(chunk) = intervals.pull_chunk(sizes[i % sizes.len()]) {
            covered.extend(chunk.iter());
            i += 1;
        }
        let expected: Vec<i64> = (-50..=250).collect();
        assert_eq!(covered, expected);
    }

    #[test]
    fn range_ending_at_i64_max() {
        let mut intervals = manager(i64::MAX - 4, i64::MAX);
        let chunk = intervals.pull_chunk(u64::MAX).unwrap();
        assert_eq!(chunk.len(), 5);
        assert!(intervals.is_exhausted());
    }
}
