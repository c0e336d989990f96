//! Contracts between the scheduler and the outside world.
//!
//! The scheduler never talks to a transport directly. It depends on three
//! small traits:
//!
//! - [`Worker`] - a handle to one compute node, exposing `compute(chunk)`.
//! - [`WorkerDirectory`] - hands out up to N worker handles for a run.
//! - [`ServiceDirectory`] - the naming service: bind and resolve endpoints.
//!
//! The gRPC implementations live in the `primefarm` crate; tests use
//! in-process implementations.

use crate::{Chunk, ComputeResult, Result};

/// A handle to one remote compute node.
#[tonic::async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Name the worker is registered under, used in logs and reports.
    fn name(&self) -> &str;

    /// Computes the primes in `chunk`.
    ///
    /// Any error (connection refused, remote status, ...) is treated by the
    /// scheduler as a failure of this worker. Implementations should not
    /// retry.
    async fn compute(&self, chunk: &Chunk) -> Result<ComputeResult>;
}

/// Source of worker handles for a run.
#[tonic::async_trait]
pub trait WorkerDirectory: Send + Sync {
    type Worker: Worker;

    /// Returns at most `count` workers. Returning fewer, including none, is
    /// allowed; the caller adapts.
    async fn request_workers(&self, count: usize) -> Result<Vec<Self::Worker>>;
}

/// Name-to-endpoint lookup shared by every node of the cluster.
#[tonic::async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Binds `name` to `endpoint`, replacing an existing binding.
    async fn register(&self, name: &str, endpoint: &str) -> Result<()>;

    /// Returns the endpoint bound to `name`.
    async fn resolve(&self, name: &str) -> Result<String>;
}

/// Parses the ordinal out of a numbered name such as `Worker12`.
///
/// Returns `None` unless `name` is exactly `prefix` followed by one or more
/// ASCII digits.
pub fn numbered_ordinal(name: &str, prefix: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
