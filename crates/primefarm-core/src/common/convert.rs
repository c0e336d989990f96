use super::proto;
use crate::{Chunk, ComputeResult, Error, Result, Span};
use core::time::Duration;

impl From<Span> for proto::Span {
    fn from(span: Span) -> Self {
        Self {
            min: span.min(),
            max: span.max(),
        }
    }
}

impl TryFrom<proto::Span> for Span {
    type Error = Error;

    fn try_from(span: proto::Span) -> Result<Self> {
        Self::new(span.min, span.max)
    }
}

impl From<&Chunk> for proto::ComputeRequest {
    fn from(chunk: &Chunk) -> Self {
        Self {
            spans: chunk.spans().iter().copied().map(Into::into).collect(),
        }
    }
}

impl TryFrom<proto::ComputeRequest> for Chunk {
    type Error = Error;

    /// Validates an incoming request. Spans arriving over the wire are
    /// untrusted, so inverted or overlapping spans are rejected here rather
    /// than being silently repaired.
    fn try_from(request: proto::ComputeRequest) -> Result<Self> {
        let spans = request
            .spans
            .into_iter()
            .map(Span::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::from_spans(spans)
    }
}

impl From<ComputeResult> for proto::ComputeReply {
    fn from(result: ComputeResult) -> Self {
        Self {
            primes: result.primes,
            elapsed_nanos: u64::try_from(result.elapsed.as_nanos()).unwrap_or(u64::MAX),
        }
    }
}

impl From<proto::ComputeReply> for ComputeResult {
    fn from(reply: proto::ComputeReply) -> Self {
        Self {
            primes: reply.primes,
            elapsed: Duration::from_nanos(reply.elapsed_nanos),
        }
    }
}
