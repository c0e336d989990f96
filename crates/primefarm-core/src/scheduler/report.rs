use crate::SearchRange;
use core::time::Duration;

/// Per-worker summary of a finished run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    /// Position of the worker among the active sessions.
    pub index: usize,
    pub name: String,
    /// Cumulative compute time reported by the worker.
    pub busy: Duration,
    pub chunks: u64,
    pub integers: u64,
    /// Chunk size the worker would have received next.
    pub final_chunk_size: u64,
    /// `true` if the worker was lost during the run.
    pub failed: bool,
}

/// Result of a successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub range: SearchRange,
    /// Every prime in `range`, ascending.
    pub primes: Vec<i64>,
    /// Wall-clock time from the directory request to the last reconciliation.
    pub elapsed: Duration,
    /// One entry per active worker, in session order.
    pub workers: Vec<WorkerReport>,
    /// Calibration baseline, if every active worker reported a timing.
    pub baseline: Option<Duration>,
}

impl RunReport {
    pub fn failed_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.failed).count()
    }
}
