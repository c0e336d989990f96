use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use primefarm_core::{
    Chunk, ComputeResult, IntervalManager, Result, Scheduler, SchedulerConfig, SearchRange, Span,
    Worker, WorkerDirectory, primes,
};
use tokio::runtime::Builder;

fn bench_primality(c: &mut Criterion) {
    let mut group = c.benchmark_group("primes/compute");
    for (label, min) in [("small", 1_i64), ("1e9", 1_000_000_000), ("1e15", 1_000_000_000_000_000)] {
        let chunk = Chunk::contiguous(Span::new(min, min + 9_999).unwrap());
        group.throughput(Throughput::Elements(chunk.len()));
        group.bench_with_input(BenchmarkId::from_parameter(label), &chunk, |b, chunk| {
            b.iter(|| primes::compute(black_box(chunk)));
        });
    }
    group.finish();
}

fn bench_interval_pulls(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval/pull_chunk");
    for size in [1_u64, 1_000, 100_000] {
        let range = SearchRange::new(0, 10_000_000).unwrap();
        group.throughput(Throughput::Elements(range.len()));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut intervals = IntervalManager::new(range);
                let mut pulled = 0_u64;
                while let Some(chunk) = intervals.pull_chunk(black_box(size)) {
                    pulled += chunk.len();
                }
                pulled
            });
        });
    }
    group.finish();
}

struct InProcess(String);

#[tonic::async_trait]
impl Worker for InProcess {
    fn name(&self) -> &str {
        &self.0
    }

    async fn compute(&self, chunk: &Chunk) -> Result<ComputeResult> {
        Ok(primes::compute(chunk))
    }
}

struct InProcessDirectory;

#[tonic::async_trait]
impl WorkerDirectory for InProcessDirectory {
    type Worker = InProcess;

    async fn request_workers(&self, count: usize) -> Result<Vec<InProcess>> {
        Ok((1..=count).map(|n| InProcess(format!("Worker{n}"))).collect())
    }
}

fn bench_scheduler(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread().enable_all().build().unwrap();
    let scheduler = Scheduler::new(InProcessDirectory, SchedulerConfig::default());
    let range = SearchRange::new(1, 200_000).unwrap();

    let mut group = c.benchmark_group("scheduler/run");
    group.throughput(Throughput::Elements(range.len()));
    for workers in [1_usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| runtime.block_on(scheduler.run(range, workers)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_primality, bench_interval_pulls, bench_scheduler);
criterion_main!(benches);
