//! Per-worker adaptive session.
//!
//! A [`WorkerSession`] wraps one [`Worker`] handle for the duration of a run.
//! It remembers how large a chunk the worker should receive next, which chunk
//! it is currently processing, and the outcome of that chunk.
//!
//! ## Status machine
//!
//! ```text
//! Idle ──dispatch──▶ Dispatched ──▶ Completed ─┐
//!                         │                     ├─mark_attended─▶ Attended ──dispatch──▶ Dispatched
//!                         └───────▶ Failed ─────┘                     │
//!                                                                     └──terminate──▶ Terminated
//! ```
//!
//! `Dispatched → Completed | Failed` is driven by the background task that
//! performs the remote call; every other transition is driven by the
//! scheduler. The background task only ever writes into this session's own
//! slot and never touches shared scheduler state.
//!
//! `Attended` exists so that the scheduler's repeated polling consumes each
//! outcome exactly once: [`WorkerSession::mark_attended`] hands the outcome
//! out on the first call and returns `None` on every later call.

use crate::{Chunk, ComputeResult, Error, Result, Worker};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Lifecycle state of a [`WorkerSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Never dispatched.
    Idle,
    /// A remote call is in flight.
    Dispatched,
    /// The remote call returned a result that has not been consumed yet.
    Completed,
    /// The remote call failed and the failure has not been consumed yet.
    Failed,
    /// The last outcome was consumed; the session may be dispatched again.
    Attended,
    /// The session will never be dispatched again.
    Terminated,
}

/// A consumed outcome, handed out by [`WorkerSession::mark_attended`].
#[derive(Debug)]
pub enum Outcome {
    Completed { chunk: Chunk, result: ComputeResult },
    Failed { chunk: Chunk, error: Error },
}

#[derive(Debug)]
struct Slot {
    status: SessionStatus,
    result: Option<ComputeResult>,
    error: Option<Error>,
}

pub struct WorkerSession<W> {
    index: usize,
    worker: Arc<W>,
    requested_size: u64,
    current_chunk: Option<Chunk>,
    slot: Arc<Mutex<Slot>>,
    call_timeout: Option<Duration>,
    stats: SessionStats,
}

/// Timing and throughput accumulated by a session over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sum of the elapsed times reported by the worker.
    pub busy: Duration,
    /// Elapsed time of the most recent completed chunk.
    pub last_elapsed: Option<Duration>,
    /// Number of chunks completed.
    pub chunks: u64,
    /// Number of integers tested across all completed chunks.
    pub integers: u64,
}

impl<W: Worker> WorkerSession<W> {
    pub fn new(index: usize, worker: W, requested_size: u64) -> Self {
        Self {
            index,
            worker: Arc::new(worker),
            requested_size: requested_size.max(1),
            current_chunk: None,
            slot: Arc::new(Mutex::new(Slot {
                status: SessionStatus::Idle,
                result: None,
                error: None,
            })),
            call_timeout: None,
            stats: SessionStats::default(),
        }
    }

    /// Bounds every remote call of this session. A call that does not return
    /// in time fails the session with [`Error::Timeout`].
    #[must_use]
    pub fn with_call_timeout(mut self, limit: Option<Duration>) -> Self {
        self.call_timeout = limit;
        self
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub const fn requested_size(&self) -> u64 {
        self.requested_size
    }

    /// Sets the size of the next chunk, clamped to at least 1.
    pub fn set_requested_size(&mut self, size: u64) {
        self.requested_size = size.max(1);
    }

    pub const fn current_chunk(&self) -> Option<&Chunk> {
        self.current_chunk.as_ref()
    }

    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn status(&self) -> SessionStatus {
        self.slot.lock().status
    }

    pub fn is_completed(&self) -> bool {
        self.status() == SessionStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status() == SessionStatus::Failed
    }

    pub fn is_attended(&self) -> bool {
        self.status() == SessionStatus::Attended
    }

    /// `true` while a chunk is assigned and its outcome not yet consumed.
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self.status(),
            SessionStatus::Dispatched | SessionStatus::Completed | SessionStatus::Failed
        )
    }

    /// Starts computing `chunk` on the worker in a background task.
    ///
    /// Once the call finishes, the session moves to `Completed` or `Failed`
    /// and the session index is posted on `completions`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless the session is `Idle` or
    /// `Attended`.
    pub fn dispatch(
        &mut self,
        chunk: Chunk,
        completions: &mpsc::UnboundedSender<usize>,
    ) -> Result<()> {
        {
            let mut slot = self.slot.lock();
            match slot.status {
                SessionStatus::Idle | SessionStatus::Attended => {}
                from => {
                    return Err(Error::InvalidTransition {
                        session: self.index,
                        from,
                        action: "dispatch",
                    });
                }
            }
            slot.status = SessionStatus::Dispatched;
            slot.result = None;
            slot.error = None;
        }

        self.current_chunk = Some(chunk.clone());

        let index = self.index;
        let worker = Arc::clone(&self.worker);
        let slot = Arc::clone(&self.slot);
        let completions = completions.clone();
        let call_timeout = self.call_timeout;

        let span = tracing::debug_span!(
            "compute",
            session = index,
            worker = worker.name(),
            integers = chunk.len(),
        );

        tokio::spawn(
            async move {
                let outcome = match call_timeout {
                    Some(limit) => tokio::time::timeout(limit, worker.compute(&chunk))
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::Timeout {
                                worker: worker.name().to_owned(),
                                after: limit,
                            })
                        }),
                    None => worker.compute(&chunk).await,
                };

                {
                    let mut slot = slot.lock();
                    match outcome {
                        Ok(result) => {
                            tracing::trace!(primes = result.primes.len(), "chunk completed");
                            slot.result = Some(result);
                            slot.status = SessionStatus::Completed;
                        }
                        Err(e) => {
                            tracing::debug!("chunk failed: {e}");
                            slot.error = Some(e);
                            slot.status = SessionStatus::Failed;
                        }
                    }
                }

                // The scheduler may already be gone (e.g. after a total
                // failure); nothing is waiting for this outcome then.
                let _ = completions.send(index);
            }
            .instrument(span),
        );

        Ok(())
    }

    /// Consumes the outcome of the last dispatch and moves to `Attended`.
    ///
    /// Returns `None` without changing anything unless the session is
    /// `Completed` or `Failed`, so calling it again before the next dispatch
    /// never yields the same outcome twice.
    pub fn mark_attended(&mut self) -> Option<Outcome> {
        let mut slot = self.slot.lock();
        let outcome = match slot.status {
            SessionStatus::Completed => {
                let result = slot.result.take()?;
                let chunk = self.current_chunk.take()?;
                self.stats.busy += result.elapsed;
                self.stats.last_elapsed = Some(result.elapsed);
                self.stats.chunks += 1;
                self.stats.integers = self.stats.integers.saturating_add(chunk.len());
                Outcome::Completed { chunk, result }
            }
            SessionStatus::Failed => {
                let error = slot.error.take()?;
                let chunk = self.current_chunk.take()?;
                Outcome::Failed { chunk, error }
            }
            _ => return None,
        };
        slot.status = SessionStatus::Attended;
        Some(outcome)
    }

    /// Retires the session for the rest of the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless the session is `Attended`
    /// or `Idle`.
    pub fn terminate(&mut self) -> Result<()> {
        let mut slot = self.slot.lock();
        match slot.status {
            SessionStatus::Attended | SessionStatus::Idle => {
                slot.status = SessionStatus::Terminated;
                Ok(())
            }
            from => Err(Error::InvalidTransition {
                session: self.index,
                from,
                action: "terminate",
            }),
        }
    }
}
