use super::*;
use crate::{Span, primes};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing::Level;
use tracing_subscriber::{
    Layer,
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
};

/// In-process worker with a scripted failure point and a synthetic cost.
struct ScriptedWorker {
    name: String,
    /// Calls with an index at or past this value fail.
    fail_from: Option<usize>,
    /// Reported compute time per integer.
    cost: Duration,
    /// Real delay before answering.
    delay: Duration,
    calls: AtomicUsize,
    completed: Arc<Mutex<Vec<Chunk>>>,
}

impl ScriptedWorker {
    fn healthy(name: &str, cost: Duration) -> Self {
        Self {
            name: name.to_owned(),
            fail_from: None,
            cost,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            completed: Arc::default(),
        }
    }

    fn failing_from(mut self, call: usize) -> Self {
        self.fail_from = Some(call);
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn log(&self) -> Arc<Mutex<Vec<Chunk>>> {
        Arc::clone(&self.completed)
    }
}

#[tonic::async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compute(&self, chunk: &Chunk) -> Result<ComputeResult> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_from.is_some_and(|from| call >= from) {
            return Err(Error::Connection {
                target: self.name.clone(),
                reason: "connection refused".to_owned(),
            });
        }

        self.completed.lock().push(chunk.clone());
        let integers = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
        Ok(ComputeResult {
            primes: primes::primes_in(chunk),
            elapsed: self.cost * integers,
        })
    }
}

/// Hands out a fixed set of workers, at most `count` per request.
struct StaticDirectory {
    workers: Mutex<Vec<ScriptedWorker>>,
}

impl StaticDirectory {
    fn new(workers: Vec<ScriptedWorker>) -> Self {
        Self {
            workers: Mutex::new(workers),
        }
    }
}

#[tonic::async_trait]
impl WorkerDirectory for StaticDirectory {
    type Worker = ScriptedWorker;

    async fn request_workers(&self, count: usize) -> Result<Vec<ScriptedWorker>> {
        let mut workers = self.workers.lock();
        let take = count.min(workers.len());
        Ok(workers.drain(..take).collect())
    }
}

fn scheduler(workers: Vec<ScriptedWorker>, initial_chunk_size: u64) -> Scheduler<StaticDirectory> {
    Scheduler::new(
        StaticDirectory::new(workers),
        SchedulerConfig {
            initial_chunk_size,
            ..SchedulerConfig::default()
        },
    )
}

fn range(min: i64, max: i64) -> SearchRange {
    SearchRange::new(min, max).unwrap()
}

const MICRO: Duration = Duration::from_micros(1);
const PRIMES_TO_20: [i64; 8] = [2, 3, 5, 7, 11, 13, 17, 19];

#[tokio::test]
async fn two_workers_find_primes_up_to_twenty() {
    let scheduler = scheduler(
        vec![
            ScriptedWorker::healthy("Worker1", MICRO),
            ScriptedWorker::healthy("Worker2", MICRO),
        ],
        8,
    );

    let report = scheduler.run(range(1, 20), 2).await.unwrap();

    assert_eq!(report.primes, PRIMES_TO_20);
    assert_eq!(report.workers.len(), 2);
    assert!(report.workers.iter().all(|w| !w.busy.is_zero()));
    assert!(report.workers.iter().all(|w| !w.failed));
    assert_eq!(report.workers.iter().map(|w| w.integers).sum::<u64>(), 20);
    assert_eq!(report.failed_workers(), 0);
}

#[tokio::test]
async fn proceeds_with_fewer_workers_than_requested() {
    let scheduler = scheduler(
        vec![
            ScriptedWorker::healthy("Worker1", MICRO),
            ScriptedWorker::healthy("Worker2", MICRO),
        ],
        8,
    );

    let report = scheduler.run(range(1, 20), 3).await.unwrap();

    assert_eq!(report.primes, PRIMES_TO_20);
    assert_eq!(report.workers.len(), 2);
}

#[tokio::test]
async fn sessions_left_without_work_are_not_active() {
    let scheduler = scheduler(
        vec![
            ScriptedWorker::healthy("Worker1", MICRO),
            ScriptedWorker::healthy("Worker2", MICRO),
        ],
        1000,
    );

    let report = scheduler.run(range(1, 20), 2).await.unwrap();

    assert_eq!(report.primes, PRIMES_TO_20);
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.workers[0].name, "Worker1");
}

#[tokio::test]
async fn empty_directory_fails_fast() {
    let scheduler = scheduler(Vec::new(), 8);
    let err = scheduler.run(range(1, 20), 2).await.unwrap_err();
    assert!(matches!(err, Error::NoWorkers { requested: 2 }));
}

#[tokio::test]
async fn survivor_reprocesses_a_lost_chunk() {
    let survivor = ScriptedWorker::healthy("Worker1", MICRO);
    let survivor_log = survivor.log();
    let lost = ScriptedWorker::healthy("Worker2", MICRO).failing_from(1);
    let lost_log = lost.log();
    let scheduler = scheduler(vec![survivor, lost], 10);

    let report = scheduler.run(range(1, 200), 2).await.unwrap();

    assert_eq!(report.primes, primes::sieve(200));
    assert!(!report.workers[0].failed);
    assert!(report.workers[1].failed);
    assert_eq!(report.failed_workers(), 1);
    assert_eq!(lost_log.lock().len(), 1);
    assert!(
        survivor_log.lock().iter().any(|chunk| !chunk.is_contiguous()),
        "the lost chunk rides along with the tail of the range"
    );
    assert_eq!(
        report.workers.iter().map(|w| w.integers).sum::<u64>(),
        200,
        "every integer is counted exactly once"
    );
}

#[tokio::test(start_paused = true)]
async fn idle_survivor_adopts_a_chunk_failed_later() {
    // Worker1 finishes and goes idle long before Worker2 reports its failure.
    let survivor = ScriptedWorker::healthy("Worker1", MICRO);
    let survivor_log = survivor.log();
    let lost = ScriptedWorker::healthy("Worker2", MICRO)
        .failing_from(0)
        .delayed(Duration::from_millis(50));
    let scheduler = scheduler(vec![survivor, lost], 10);

    let report = scheduler.run(range(1, 20), 2).await.unwrap();

    assert_eq!(report.primes, PRIMES_TO_20);
    assert_eq!(report.workers[0].chunks, 2);
    assert_eq!(
        survivor_log.lock().last(),
        Some(&Chunk::contiguous(Span::new(11, 20).unwrap()))
    );
    // Worker2 never completed a chunk, so calibration never happened.
    assert!(report.baseline.is_none());
    assert_eq!(report.workers[0].final_chunk_size, 10);
}

#[tokio::test]
async fn total_failure_returns_no_primes() {
    let scheduler = scheduler(
        vec![
            ScriptedWorker::healthy("Worker1", MICRO).failing_from(0),
            ScriptedWorker::healthy("Worker2", MICRO).failing_from(0),
        ],
        8,
    );

    let err = scheduler.run(range(1, 20), 2).await.unwrap_err();
    assert!(matches!(err, Error::TotalFailure { workers: 2 }));
}

/// Counts events at `INFO` or louder.
#[derive(Clone, Default)]
struct LoudEvents(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for LoudEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
        if *event.metadata().level() <= Level::INFO {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[tokio::test]
async fn total_failure_leaves_reporting_to_the_caller() {
    let loud = LoudEvents::default();
    let _guard = tracing_subscriber::registry().with(loud.clone()).set_default();
    let scheduler = scheduler(
        vec![
            ScriptedWorker::healthy("Worker1", MICRO).failing_from(1),
            ScriptedWorker::healthy("Worker2", MICRO).failing_from(0),
        ],
        5,
    );

    let err = scheduler.run(range(1, 100), 2).await.unwrap_err();

    assert!(matches!(err, Error::TotalFailure { workers: 2 }));
    assert_eq!(loud.0.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn total_failure_after_partial_progress() {
    let scheduler = scheduler(
        vec![
            ScriptedWorker::healthy("Worker1", MICRO).failing_from(2),
            ScriptedWorker::healthy("Worker2", MICRO).failing_from(1),
        ],
        10,
    );

    let err = scheduler.run(range(1, 10_000), 2).await.unwrap_err();
    assert!(matches!(err, Error::TotalFailure { workers: 2 }));
}

#[tokio::test]
async fn calibration_sizes_chunks_by_speed() {
    let fast = ScriptedWorker::healthy("Worker1", MICRO);
    let slow = ScriptedWorker::healthy("Worker2", MICRO * 3);
    let (fast_log, slow_log) = (fast.log(), slow.log());
    let scheduler = scheduler(vec![fast, slow], 10);

    let report = scheduler.run(range(1, 2_000), 2).await.unwrap();

    // First timings are 10µs and 30µs, so the baseline is their mean.
    assert_eq!(report.baseline, Some(Duration::from_micros(20)));
    // 10 / (10 / 20) = 20 and round(10 / (30 / 20)) = 7.
    assert!(fast_log.lock().iter().any(|chunk| chunk.len() == 20));
    assert!(slow_log.lock().iter().any(|chunk| chunk.len() == 7));
    assert_eq!(report.primes, primes::sieve(2_000));
}

#[tokio::test]
async fn chunks_tile_the_range_despite_failures() {
    let workers = vec![
        ScriptedWorker::healthy("Worker1", MICRO),
        ScriptedWorker::healthy("Worker2", MICRO * 2).failing_from(3),
        ScriptedWorker::healthy("Worker3", MICRO * 5),
    ];
    let logs: Vec<_> = workers.iter().map(ScriptedWorker::log).collect();
    let scheduler = scheduler(workers, 50);

    let report = scheduler.run(range(1, 5_000), 3).await.unwrap();

    assert_eq!(report.primes, primes::sieve(5_000));

    let mut covered: Vec<i64> = logs
        .iter()
        .flat_map(|log| log.lock().iter().flat_map(Chunk::iter).collect::<Vec<_>>())
        .collect();
    covered.sort_unstable();
    assert_eq!(covered, (1..=5_000).collect::<Vec<_>>());
}

#[tokio::test]
async fn negative_range_has_no_negative_primes() {
    let scheduler = scheduler(vec![ScriptedWorker::healthy("Worker1", MICRO)], 7);
    let report = scheduler.run(range(-30, 20), 1).await.unwrap();
    assert_eq!(report.primes, PRIMES_TO_20);
}

#[test]
fn scaled_size_rounds_the_speed_ratio() {
    let ms = Duration::from_millis;
    assert_eq!(scaled_size(10, ms(10), ms(20), 1_000), 20);
    assert_eq!(scaled_size(10, ms(30), ms(20), 1_000), 7);
    assert_eq!(scaled_size(10, ms(20), ms(20), 1_000), 10);
}

#[test]
fn scaled_size_never_drops_below_one() {
    assert_eq!(
        scaled_size(1, Duration::from_secs(3_600), Duration::from_nanos(1), 1_000),
        1
    );
    assert_eq!(
        scaled_size(
            u64::MAX,
            Duration::MAX,
            Duration::from_nanos(1),
            u64::MAX
        ),
        1
    );
}

#[test]
fn scaled_size_respects_the_ceiling() {
    assert_eq!(
        scaled_size(500, Duration::from_nanos(1), Duration::from_secs(1), 1_000),
        1_000
    );
}

#[test]
fn zero_observed_time_keeps_the_size() {
    assert_eq!(
        scaled_size(42, Duration::ZERO, Duration::from_millis(5), 1_000),
        42
    );
}
