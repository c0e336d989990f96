use super::endpoint;
use core::time::Duration;
use primefarm_core::{
    Chunk, ComputeResult, Error, Result, ServiceDirectory, Worker, WorkerDirectory,
    proto::{
        ComputeRequest, WorkersRequest, allocator_client::AllocatorClient,
        prime_worker_client::PrimeWorkerClient,
    },
};
use tonic::{codec::CompressionEncoding, transport::Channel};

/// Worker source backed by the allocator service.
#[derive(Clone, Debug)]
pub struct RemoteDirectory {
    allocator: AllocatorClient<Channel>,
    connect_timeout: Duration,
}

impl RemoteDirectory {
    /// Connects to the allocator at `uri`.
    pub async fn connect(uri: &str, connect_timeout: Duration) -> Result<Self> {
        let channel = endpoint(uri, connect_timeout)?
            .connect()
            .await
            .map_err(|e| Error::Connection {
                target: uri.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            allocator: AllocatorClient::new(channel),
            connect_timeout,
        })
    }

    /// Resolves the allocator by name through `services` and connects to it.
    pub async fn locate<S: ServiceDirectory + ?Sized>(
        services: &S,
        allocator_name: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let uri = services.resolve(allocator_name).await?;
        tracing::debug!("Resolved allocator {allocator_name} at {uri}");
        Self::connect(&uri, connect_timeout).await
    }
}

#[tonic::async_trait]
impl WorkerDirectory for RemoteDirectory {
    type Worker = GrpcWorker;

    async fn request_workers(&self, count: usize) -> Result<Vec<GrpcWorker>> {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let reply = self
            .allocator
            .clone()
            .request_workers(WorkersRequest { count })
            .await
            .map_err(|status| Error::Directory {
                context: format!("allocator refused the request: {}", status.message()),
            })?
            .into_inner();

        let workers = reply
            .workers
            .into_iter()
            .filter_map(|worker| {
                match GrpcWorker::connect_lazy(worker.name, &worker.endpoint, self.connect_timeout) {
                    Ok(worker) => Some(worker),
                    Err(e) => {
                        tracing::warn!("Skipping worker with unusable endpoint: {e}");
                        None
                    }
                }
            })
            .collect();
        Ok(workers)
    }
}

/// Handle to one remote compute worker.
///
/// The connection is established on the first call, so a dead worker shows
/// up as a failed compute call rather than at allocation time.
#[derive(Clone, Debug)]
pub struct GrpcWorker {
    name: String,
    client: PrimeWorkerClient<Channel>,
}

impl GrpcWorker {
    pub fn connect_lazy(name: String, uri: &str, connect_timeout: Duration) -> Result<Self> {
        let channel = endpoint(uri, connect_timeout)?.connect_lazy();
        let client = PrimeWorkerClient::new(channel)
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd)
            .max_decoding_message_size(usize::MAX);
        Ok(Self { name, client })
    }
}

#[tonic::async_trait]
impl Worker for GrpcWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compute(&self, chunk: &Chunk) -> Result<ComputeResult> {
        let request = ComputeRequest::from(chunk);
        let reply = self
            .client
            .clone()
            .compute(request)
            .await
            .map_err(|status| Error::remote(&self.name, &status))?;
        Ok(reply.into_inner().into())
    }
}
