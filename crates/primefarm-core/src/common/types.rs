//! # Range, Span and Chunk Value Types
//!
//! These types describe *which integers* a worker must test. They are shared
//! by the scheduler, the interval manager and the gRPC layer so that client
//! and server agree on a single, validated representation.
//!
//! ## Overview
//!
//! - [`SearchRange`] - the user-supplied range `[min, max]`, with `min < max`.
//! - [`Span`] - one inclusive contiguous sub-range, `min <= max`.
//! - [`Chunk`] - the atomic unit of work handed to a single worker in a single
//!   remote call: one or more disjoint spans in ascending order.
//! - [`ComputeResult`] - what a worker returns for a chunk.
//!
//! All integers are `i64`. Counts (`len`) are `u64` and saturate for the
//! pathological full `i64` range.

use crate::{Error, Result};
use core::time::Duration;

/// Default number of integers requested per chunk before calibration.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// An inclusive, contiguous range of integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    min: i64,
    max: i64,
}

impl Span {
    /// Creates a span, rejecting `min > max`.
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// A span holding a single integer.
    pub const fn single(value: i64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub const fn min(&self) -> i64 {
        self.min
    }

    pub const fn max(&self) -> i64 {
        self.max
    }

    /// Number of integers in the span.
    pub const fn len(&self) -> u64 {
        self.max.abs_diff(self.min).saturating_add(1)
    }

    /// A span is never empty; provided for API symmetry with [`len`].
    ///
    /// [`len`]: Span::len
    pub const fn is_empty(&self) -> bool {
        false
    }

    pub const fn contains(&self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }

    /// Iterates every integer in the span in ascending order.
    pub fn iter(&self) -> core::ops::RangeInclusive<i64> {
        self.min..=self.max
    }

    const fn overlaps(&self, other: &Self) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// `true` when `other` starts right after `self` ends.
    const fn touches(&self, other: &Self) -> bool {
        self.max < i64::MAX && self.max + 1 == other.min
    }
}

/// The full range a client asks the cluster to search.
///
/// Unlike [`Span`], a search range must hold at least two integers: `min` is
/// strictly less than `max`. This is validated once at input time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SearchRange {
    span: Span,
}

impl SearchRange {
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min >= max {
            return Err(Error::InvalidRange { min, max });
        }
        Ok(Self {
            span: Span { min, max },
        })
    }

    pub const fn min(&self) -> i64 {
        self.span.min
    }

    pub const fn max(&self) -> i64 {
        self.span.max
    }

    pub const fn len(&self) -> u64 {
        self.span.len()
    }

    pub const fn is_empty(&self) -> bool {
        false
    }

    pub const fn as_span(&self) -> Span {
        self.span
    }
}

/// A unit of work assigned atomically to one worker in one remote call.
///
/// A chunk drawn fresh from the interval manager is a single span. A chunk
/// that carries reassigned work from a failed worker may be the union of
/// several disjoint spans. The spans are kept sorted and adjacent spans are
/// coalesced, so two chunks covering the same integers compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    spans: Vec<Span>,
}

impl Chunk {
    /// A chunk made of one contiguous span.
    pub fn contiguous(span: Span) -> Self {
        Self { spans: vec![span] }
    }

    /// Builds a chunk from arbitrary spans.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `spans` is empty.
    /// - [`Error::OverlappingSpans`] if any two spans share an integer.
    pub fn from_spans(spans: impl IntoIterator<Item = Span>) -> Result<Self> {
        let mut spans: Vec<Span> = spans.into_iter().collect();
        if spans.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "a chunk needs at least one span".to_owned(),
            });
        }
        spans.sort_unstable_by_key(|span| (span.min, span.max));

        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if last.overlaps(&span) => {
                    return Err(Error::OverlappingSpans {
                        first_min: last.min,
                        first_max: last.max,
                        second_min: span.min,
                        second_max: span.max,
                    });
                }
                Some(last) if last.touches(&span) => last.max = span.max,
                _ => merged.push(span),
            }
        }

        Ok(Self { spans: merged })
    }

    /// Combines two chunks into one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OverlappingSpans`] if the chunks share an integer.
    pub fn union(self, other: Self) -> Result<Self> {
        Self::from_spans(self.spans.into_iter().chain(other.spans))
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Total number of integers covered.
    pub fn len(&self) -> u64 {
        self.spans
            .iter()
            .fold(0_u64, |acc, span| acc.saturating_add(span.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn is_contiguous(&self) -> bool {
        self.spans.len() == 1
    }

    pub fn contains(&self, value: i64) -> bool {
        self.spans.iter().any(|span| span.contains(value))
    }

    /// Iterates every integer in the chunk in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.spans.iter().flat_map(Span::iter)
    }
}

impl From<Span> for Chunk {
    fn from(span: Span) -> Self {
        Self::contiguous(span)
    }
}

/// The outcome of one successful remote computation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComputeResult {
    /// Primes found in the chunk, in no particular order.
    pub primes: Vec<i64>,
    /// Time the worker spent computing, as measured by the worker.
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(min: i64, max: i64) -> Span {
        Span::new(min, max).unwrap()
    }

    #[test]
    fn span_rejects_inverted_bounds() {
        assert!(Span::new(3, 2).is_err());
        assert_eq!(span(4, 4).len(), 1);
        assert_eq!(Span::single(-7), span(-7, -7));
    }

    #[test]
    fn span_len_saturates_on_full_domain() {
        assert_eq!(span(i64::MIN, i64::MAX).len(), u64::MAX);
        assert_eq!(span(-5, 5).len(), 11);
    }

    #[test]
    fn search_range_requires_min_below_max() {
        assert!(SearchRange::new(10, 10).is_err());
        assert!(SearchRange::new(11, 10).is_err());

        let range = SearchRange::new(1, 20).unwrap();
        assert_eq!(range.len(), 20);
        assert_eq!(range.as_span(), span(1, 20));
    }

    #[test]
    fn from_spans_sorts_and_coalesces_adjacent() {
        let chunk = Chunk::from_spans([span(11, 20), span(1, 10), span(30, 35)]).unwrap();
        assert_eq!(chunk.spans(), &[span(1, 20), span(30, 35)]);
        assert_eq!(chunk.len(), 26);
        assert!(!chunk.is_contiguous());
    }

    #[test]
    fn from_spans_rejects_overlap_and_empty() {
        let err = Chunk::from_spans([span(1, 10), span(10, 12)]).unwrap_err();
        assert!(matches!(err, Error::OverlappingSpans { .. }));

        assert!(Chunk::from_spans(core::iter::empty()).is_err());
    }

    #[test]
    fn union_keeps_every_integer_once() {
        let failed = Chunk::contiguous(span(100, 149));
        let tail = Chunk::contiguous(span(990, 1000));
        let merged = tail.union(failed).unwrap();

        assert_eq!(merged.spans(), &[span(100, 149), span(990, 1000)]);
        let values: Vec<i64> = merged.iter().collect();
        assert_eq!(values.len() as u64, merged.len());
        assert!(merged.contains(120) && merged.contains(995));
        assert!(!merged.contains(500));
    }

    #[test]
    fn adjacent_span_at_i64_max_does_not_overflow() {
        let chunk = Chunk::from_spans([span(i64::MAX - 1, i64::MAX), span(0, 1)]).unwrap();
        assert_eq!(chunk.spans().len(), 2);
    }
}
