use crate::DEFAULT_CHUNK_SIZE;
use core::time::Duration;

/// Largest chunk a calibrated worker may be asked to process.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 1_000_000;

/// Tuning knobs for one [`Scheduler`](super::Scheduler).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Chunk size every session starts with, before calibration.
    pub initial_chunk_size: u64,
    /// Upper bound applied when calibration grows a fast worker's chunk.
    pub max_chunk_size: u64,
    /// Optional bound on each remote call. `None` waits indefinitely, so a
    /// worker that neither answers nor drops the connection stalls its
    /// session for the rest of the run.
    pub call_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            call_timeout: None,
        }
    }
}
