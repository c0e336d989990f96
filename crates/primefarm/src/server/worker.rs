//! The compute worker.
//!
//! Each `Compute` call validates the requested spans, tests them on Tokio's
//! blocking pool and returns the primes together with the measured compute
//! time. The worker keeps no state between calls.

use super::{Registration, RunningNode, advertised_endpoint, base_router, spawn};
use crate::{
    directory::RegistryDirectory,
    telemetry::{
        increment_chunks_computed, increment_compute_errors, increment_integers_tested,
        increment_primes_found, record_compute_duration,
    },
};
use anyhow::Context;
use primefarm_core::{
    Chunk,
    proto::{
        ComputeReply, ComputeRequest,
        prime_worker_server::{PrimeWorker, PrimeWorkerServer},
    },
    primes,
};
use tokio::net::TcpListener;
use tonic::{Request, Response, Status, codec::CompressionEncoding};

#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerService;

#[tonic::async_trait]
impl PrimeWorker for WorkerService {
    #[tracing::instrument(skip_all, fields(spans = request.get_ref().spans.len()))]
    async fn compute(
        &self,
        request: Request<ComputeRequest>,
    ) -> Result<Response<ComputeReply>, Status> {
        let chunk = Chunk::try_from(request.into_inner()).inspect_err(|e| {
            increment_compute_errors();
            tracing::warn!("Rejected compute request: {e}");
        })?;
        let integers = chunk.len();

        let result = tokio::task::spawn_blocking(move || primes::compute(&chunk))
            .await
            .map_err(|e| {
                increment_compute_errors();
                Status::internal(format!("compute task failed: {e}"))
            })?;

        increment_chunks_computed();
        increment_integers_tested(integers);
        increment_primes_found(result.primes.len() as u64);
        record_compute_duration(result.elapsed.as_secs_f64() * 1000.0);
        tracing::debug!(
            "Tested {integers} integers in {:?}, found {} primes",
            result.elapsed,
            result.primes.len()
        );

        Ok(Response::new(result.into()))
    }
}

fn worker_server(service: WorkerService) -> PrimeWorkerServer<WorkerService> {
    PrimeWorkerServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}

/// Starts a compute worker on `listener` and registers it as the next free
/// `<prefix><N>`.
pub async fn start(
    listener: TcpListener,
    registry: RegistryDirectory,
    advertise_host: &str,
    prefix: &str,
) -> anyhow::Result<RunningNode> {
    let local_addr = listener.local_addr()?;
    let endpoint = advertised_endpoint(advertise_host, local_addr);

    let (reporter, router) = base_router()?;
    reporter
        .set_serving::<PrimeWorkerServer<WorkerService>>()
        .await;
    let router = router.add_service(worker_server(WorkerService));

    let name = registry
        .register_worker(prefix, &endpoint)
        .await
        .context("failed to register with the registrar")?;
    tracing::info!("Compute worker {name} listening on {local_addr}, advertised as {endpoint}");

    spawn::<PrimeWorkerServer<WorkerService>>(
        name.clone(),
        endpoint,
        listener,
        router,
        reporter,
        Some(Registration { registry, name }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use primefarm_core::proto::Span;
    use tonic::Code;

    fn request(spans: &[(i64, i64)]) -> Request<ComputeRequest> {
        Request::new(ComputeRequest {
            spans: spans
                .iter()
                .map(|&(min, max)| Span { min, max })
                .collect(),
        })
    }

    #[tokio::test]
    async fn computes_primes_of_every_span() {
        let reply = WorkerService
            .compute(request(&[(1, 20), (95, 110)]))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            reply.primes,
            vec![2, 3, 5, 7, 11, 13, 17, 19, 97, 101, 103, 107, 109]
        );
    }

    #[tokio::test]
    async fn rejects_malformed_spans() {
        let err = WorkerService
            .compute(request(&[(10, 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = WorkerService.compute(request(&[])).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
