//! # Adaptive Interval Scheduler
//!
//! The [`Scheduler`] spreads a [`SearchRange`] across the workers handed out
//! by a [`WorkerDirectory`], resizes each worker's chunks according to how
//! fast it turns them around, and recovers from workers that drop out
//! mid-run by reassigning their chunks to the survivors.
//!
//! ## Run outline
//!
//! 1. Request `n` workers from the directory. Zero is fatal; fewer than `n`
//!    is logged and tolerated.
//! 2. Initial dispatch: every session receives one chunk at the initial size
//!    until the range is exhausted. Sessions that got a chunk form the
//!    *active* set.
//! 3. Sweep the active sessions round-robin, one per step:
//!    - a completed session is reconciled: its primes are merged, chunk sizes
//!      are calibrated and it is handed the next chunk;
//!    - a failed session's chunk goes to the back of the failed queue and the
//!      session is retired;
//!    - an idle healthy session adopts the oldest failed chunk, if any.
//! 4. When a full sweep makes no progress, the orchestrator sleeps on the
//!    completion channel until some remote call finishes.
//! 5. The run ends once nothing is in flight or queued, or with
//!    [`Error::TotalFailure`] once every active worker has failed.
//!
//! ## Calibration
//!
//! Nothing is resized until every active session has reported at least one
//! timing. The average of those first timings becomes the *baseline*, and
//! from then on each session's next chunk size is
//! `round(size / (observed / baseline))`, clamped to `[1, max_chunk_size]`.
//! A worker slower than the baseline gets smaller chunks and a faster one
//! gets larger chunks.
//!
//! If a worker fails before its first completion the baseline is never set
//! and every session keeps the initial chunk size for the whole run.

mod config;
mod report;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_MAX_CHUNK_SIZE, SchedulerConfig};
pub use report::{RunReport, WorkerReport};

use crate::{
    Chunk, ComputeResult, Error, IntervalManager, Outcome, Result, SearchRange, Worker,
    WorkerDirectory, WorkerSession,
};
use core::time::Duration;
use std::{
    collections::{BTreeSet, VecDeque},
    time::Instant,
};
use tokio::sync::mpsc;

/// Distributes prime searches over the workers of a [`WorkerDirectory`].
pub struct Scheduler<D> {
    directory: D,
    config: SchedulerConfig,
}

impl<D: WorkerDirectory> Scheduler<D> {
    pub const fn new(directory: D, config: SchedulerConfig) -> Self {
        Self { directory, config }
    }

    /// Finds every prime in `range` using up to `workers` workers.
    ///
    /// # Errors
    ///
    /// - [`Error::NoWorkers`] if the directory returned no workers.
    /// - [`Error::TotalFailure`] if every active worker failed before the
    ///   range was covered. No partial result is returned.
    /// - Any error the directory itself returned.
    ///
    /// Failures of individual workers are not errors: their chunks are
    /// reassigned to the remaining workers.
    #[tracing::instrument(skip(self), fields(min = range.min(), max = range.max()))]
    pub async fn run(&self, range: SearchRange, workers: usize) -> Result<RunReport> {
        let started = Instant::now();

        let handles = self.directory.request_workers(workers).await?;
        if handles.is_empty() {
            return Err(Error::NoWorkers { requested: workers });
        }
        if handles.len() < workers {
            tracing::warn!(
                "Requested {workers} workers but only {} are available",
                handles.len()
            );
        }

        let sessions = handles
            .into_iter()
            .enumerate()
            .map(|(index, worker)| {
                WorkerSession::new(index, worker, self.config.initial_chunk_size)
                    .with_call_timeout(self.config.call_timeout)
            })
            .collect();

        let mut run = Run::new(range, sessions, self.config.max_chunk_size);
        run.drive().await?;

        let report = run.into_report(started.elapsed());
        tracing::info!(
            "Found {} primes with {} workers in {:?}",
            report.primes.len(),
            report.workers.len(),
            report.elapsed
        );
        Ok(report)
    }
}

/// Scales `current` by how the observed time compares to the baseline.
///
/// Computes `round(current / (observed / baseline))` and clamps the result to
/// `[1, ceiling]`. A zero `observed` or `baseline` gives no usable ratio and
/// leaves the size as it is (still clamped).
pub fn scaled_size(current: u64, observed: Duration, baseline: Duration, ceiling: u64) -> u64 {
    let ceiling = ceiling.max(1);
    let observed = observed.as_nanos();
    let baseline = baseline.as_nanos();
    if observed == 0 || baseline == 0 {
        return current.clamp(1, ceiling);
    }

    // current * baseline / observed, rounded half up.
    let numerator = u128::from(current)
        .saturating_mul(baseline)
        .saturating_mul(2)
        .saturating_add(observed);
    let scaled = numerator / observed.saturating_mul(2);

    u64::try_from(scaled).unwrap_or(u64::MAX).clamp(1, ceiling)
}

/// State of one call to [`Scheduler::run`].
struct Run<W> {
    intervals: IntervalManager,
    /// Active sessions only, indexed by session index.
    sessions: Vec<WorkerSession<W>>,
    primes: Vec<i64>,
    /// Chunks released by failed workers, oldest first.
    failed_chunks: VecDeque<Chunk>,
    failed_workers: BTreeSet<usize>,
    baseline: Option<Duration>,
    max_chunk_size: u64,
    completions_tx: mpsc::UnboundedSender<usize>,
    completions_rx: mpsc::UnboundedReceiver<usize>,
}

impl<W: Worker> Run<W> {
    fn new(range: SearchRange, sessions: Vec<WorkerSession<W>>, max_chunk_size: u64) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            intervals: IntervalManager::new(range),
            sessions,
            primes: Vec::new(),
            failed_chunks: VecDeque::new(),
            failed_workers: BTreeSet::new(),
            baseline: None,
            max_chunk_size,
            completions_tx,
            completions_rx,
        }
    }

    fn active(&self) -> usize {
        self.sessions.len()
    }

    async fn drive(&mut self) -> Result<()> {
        self.dispatch_initial()?;

        let mut cursor = 0;
        let mut stalled_steps = 0;
        loop {
            if self.outstanding() == 0 {
                return Ok(());
            }
            if self.failed_workers.len() == self.active() {
                tracing::debug!("Lost connection with all {} workers", self.active());
                return Err(Error::TotalFailure {
                    workers: self.active(),
                });
            }

            if self.step(cursor)? {
                stalled_steps = 0;
            } else {
                stalled_steps += 1;
            }
            cursor = (cursor + 1) % self.active();

            if stalled_steps >= self.active() {
                self.wait_for_completion().await?;
                stalled_steps = 0;
            }
        }
    }

    /// Hands one chunk to each session in order until the range runs out,
    /// then drops the sessions that received nothing.
    fn dispatch_initial(&mut self) -> Result<()> {
        let mut dispatched = 0;
        for session in &mut self.sessions {
            let Some(chunk) = self.intervals.pull_chunk(session.requested_size()) else {
                break;
            };
            session.dispatch(chunk, &self.completions_tx)?;
            dispatched += 1;
        }

        if dispatched < self.sessions.len() {
            tracing::debug!(
                "Range exhausted after {dispatched} of {} workers; the rest stay idle",
                self.sessions.len()
            );
        }
        self.sessions.truncate(dispatched);
        Ok(())
    }

    /// Visits one session. Returns `true` if anything changed.
    fn step(&mut self, index: usize) -> Result<bool> {
        match self.sessions[index].mark_attended() {
            Some(Outcome::Completed { chunk, result }) => {
                self.reconcile(index, &chunk, result)?;
                Ok(true)
            }
            Some(Outcome::Failed { chunk, error }) => {
                self.retire(index, chunk, &error)?;
                Ok(true)
            }
            None => self.adopt_orphan(index),
        }
    }

    fn reconcile(&mut self, index: usize, chunk: &Chunk, result: ComputeResult) -> Result<()> {
        tracing::trace!(
            "Session {index} tested {} integers in {:?}, {} primes",
            chunk.len(),
            result.elapsed,
            result.primes.len()
        );
        self.primes.extend(result.primes);

        match self.baseline {
            None => self.try_calibrate(),
            Some(baseline) => self.resize(index, baseline),
        }

        self.redispatch(index)
    }

    /// Sets the baseline once every active session has reported a timing,
    /// then rescales all of them against it.
    fn try_calibrate(&mut self) {
        let Some(timings) = self
            .sessions
            .iter()
            .map(|session| session.stats().last_elapsed)
            .collect::<Option<Vec<_>>>()
        else {
            return;
        };

        let total: Duration = timings.iter().sum();
        let baseline = total / u32::try_from(timings.len()).unwrap_or(u32::MAX);
        if baseline.is_zero() {
            return;
        }

        tracing::debug!("Calibrated baseline at {baseline:?}");
        self.baseline = Some(baseline);
        for index in 0..self.active() {
            if !self.failed_workers.contains(&index) {
                self.resize(index, baseline);
            }
        }
    }

    fn resize(&mut self, index: usize, baseline: Duration) {
        let session = &mut self.sessions[index];
        let Some(observed) = session.stats().last_elapsed else {
            return;
        };
        let size = scaled_size(
            session.requested_size(),
            observed,
            baseline,
            self.max_chunk_size,
        );
        if size != session.requested_size() {
            tracing::trace!(
                "Session {index} chunk size {} -> {size}",
                session.requested_size()
            );
        }
        session.set_requested_size(size);
    }

    /// Gives the session its next chunk: fresh integers first, then the
    /// oldest failed chunk. The last fresh pull also carries the oldest failed
    /// chunk along.
    fn redispatch(&mut self, index: usize) -> Result<()> {
        let requested = self.sessions[index].requested_size();
        let chunk = match self.intervals.pull_chunk(requested) {
            Some(fresh) if self.intervals.is_exhausted() => match self.failed_chunks.pop_front() {
                Some(orphan) => fresh.union(orphan)?,
                None => fresh,
            },
            Some(fresh) => fresh,
            None => match self.failed_chunks.pop_front() {
                Some(orphan) => orphan,
                None => return Ok(()),
            },
        };

        self.sessions[index].dispatch(chunk, &self.completions_tx)
    }

    fn retire(&mut self, index: usize, chunk: Chunk, error: &Error) -> Result<()> {
        let session = &mut self.sessions[index];
        tracing::debug!(
            "Worker {} failed, requeueing {} integers: {error}",
            session.name(),
            chunk.len()
        );
        self.failed_chunks.push_back(chunk);
        self.failed_workers.insert(index);
        session.terminate()
    }

    /// Lets an idle healthy session take over the oldest failed chunk.
    fn adopt_orphan(&mut self, index: usize) -> Result<bool> {
        if !self.sessions[index].is_attended() {
            return Ok(false);
        }
        let Some(chunk) = self.failed_chunks.pop_front() else {
            return Ok(false);
        };

        tracing::debug!(
            "Idle session {index} adopts {} requeued integers",
            chunk.len()
        );
        self.sessions[index].dispatch(chunk, &self.completions_tx)?;
        Ok(true)
    }

    /// Chunks in flight or waiting for reassignment.
    fn outstanding(&self) -> usize {
        self.sessions
            .iter()
            .filter(|session| session.is_outstanding())
            .count()
            + self.failed_chunks.len()
    }

    /// Blocks until at least one remote call has finished, then drains every
    /// notification already queued.
    async fn wait_for_completion(&mut self) -> Result<()> {
        self.completions_rx
            .recv()
            .await
            .ok_or_else(|| Error::ChannelError {
                context: "completion channel closed".to_owned(),
            })?;
        while self.completions_rx.try_recv().is_ok() {}
        Ok(())
    }

    fn into_report(self, elapsed: Duration) -> RunReport {
        let mut primes = self.primes;
        primes.sort_unstable();

        let workers = self
            .sessions
            .iter()
            .map(|session| {
                let stats = session.stats();
                WorkerReport {
                    index: session.index(),
                    name: session.name().to_owned(),
                    busy: stats.busy,
                    chunks: stats.chunks,
                    integers: stats.integers,
                    final_chunk_size: session.requested_size(),
                    failed: self.failed_workers.contains(&session.index()),
                }
            })
            .collect();

        RunReport {
            range: self.intervals.range(),
            primes,
            elapsed,
            workers,
            baseline: self.baseline,
        }
    }
}
