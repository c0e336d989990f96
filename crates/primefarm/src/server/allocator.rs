//! The allocator hands healthy compute workers to clients.
//!
//! Registrations outlive crashed workers, so every request re-checks the
//! candidates: all `<prefix><N>` bindings are probed concurrently through
//! their health service, unreachable ones are removed from the registrar, and
//! the first `count` live workers in ordinal order are returned.

use super::{
    Registration, RunningNode, advertised_endpoint, base_router, spawn, worker::WorkerService,
};
use crate::{directory::RegistryDirectory, telemetry::increment_workers_pruned};
use anyhow::Context;
use core::time::Duration;
use futures::future::join_all;
use primefarm_core::{
    Error, ServiceDirectory, numbered_ordinal,
    proto::{
        Binding, WorkerEndpoint, WorkersReply, WorkersRequest,
        allocator_server::{Allocator, AllocatorServer},
        prime_worker_server::PrimeWorkerServer,
    },
};
use tokio::net::TcpListener;
use tonic::{Request, Response, Status, server::NamedService};
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};

#[derive(Clone, Debug)]
pub struct AllocatorService {
    registry: RegistryDirectory,
    worker_prefix: String,
    connect_timeout: Duration,
    health_timeout: Duration,
}

impl AllocatorService {
    pub const fn new(
        registry: RegistryDirectory,
        worker_prefix: String,
        connect_timeout: Duration,
        health_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            worker_prefix,
            connect_timeout,
            health_timeout,
        }
    }

    /// Registered workers that answered their health check, in ordinal order.
    async fn live_workers(&self) -> Result<Vec<Binding>, Error> {
        let mut candidates: Vec<(u64, Binding)> = self
            .registry
            .list(&self.worker_prefix)
            .await?
            .into_iter()
            .filter_map(|binding| {
                numbered_ordinal(&binding.name, &self.worker_prefix).map(|n| (n, binding))
            })
            .collect();
        candidates.sort_by_key(|(ordinal, _)| *ordinal);

        let health = join_all(
            candidates
                .iter()
                .map(|(_, binding)| self.is_serving(&binding.endpoint)),
        )
        .await;

        let mut live = Vec::with_capacity(candidates.len());
        let mut stale = Vec::new();
        for ((_, binding), serving) in candidates.into_iter().zip(health) {
            if serving {
                live.push(binding);
            } else {
                stale.push(binding.name);
            }
        }

        self.prune(&stale).await;
        Ok(live)
    }

    /// Probes the compute service's health at `endpoint`.
    async fn is_serving(&self, endpoint: &str) -> bool {
        let check = async {
            let channel = crate::directory::endpoint(endpoint, self.connect_timeout)?
                .connect()
                .await
                .context("connect failed")?;
            let reply = HealthClient::new(channel)
                .check(HealthCheckRequest {
                    service: <PrimeWorkerServer<WorkerService> as NamedService>::NAME.to_owned(),
                })
                .await?;
            anyhow::Ok(reply.into_inner().status == ServingStatus::Serving as i32)
        };

        match tokio::time::timeout(self.health_timeout, check).await {
            Ok(Ok(serving)) => serving,
            Ok(Err(e)) => {
                tracing::debug!("Health check of {endpoint} failed: {e:#}");
                false
            }
            Err(_) => {
                tracing::debug!(
                    "Health check of {endpoint} timed out after {:?}",
                    self.health_timeout
                );
                false
            }
        }
    }

    async fn prune(&self, stale: &[String]) {
        for name in stale {
            match self.registry.unregister(name).await {
                Ok(_) => tracing::info!("Pruned unreachable worker {name}"),
                Err(e) => tracing::warn!("Failed to prune {name}: {e}"),
            }
        }
        if !stale.is_empty() {
            increment_workers_pruned(stale.len() as u64);
        }
    }
}

#[tonic::async_trait]
impl Allocator for AllocatorService {
    #[tracing::instrument(skip_all, fields(count = request.get_ref().count))]
    async fn request_workers(
        &self,
        request: Request<WorkersRequest>,
    ) -> Result<Response<WorkersReply>, Status> {
        let count = request.into_inner().count;
        if count == 0 {
            return Err(Error::InvalidRequest {
                reason: "`count` must be greater than 0".to_owned(),
            }
            .into());
        }

        let requested = usize::try_from(count).unwrap_or(usize::MAX);
        let mut live = self.live_workers().await?;
        if live.len() < requested {
            tracing::warn!("Only {} of {requested} requested workers are live", live.len());
        }
        live.truncate(requested);

        let workers = live
            .into_iter()
            .map(|binding| WorkerEndpoint {
                name: binding.name,
                endpoint: binding.endpoint,
            })
            .collect();
        Ok(Response::new(WorkersReply { workers }))
    }
}

/// Settings for [`start`].
#[derive(Clone, Debug)]
pub struct AllocatorSettings {
    pub name: String,
    pub advertise_host: String,
    pub worker_prefix: String,
    pub connect_timeout: Duration,
    pub health_timeout: Duration,
}

/// Starts the allocator on `listener` and registers it under
/// `settings.name`, replacing any previous allocator binding.
pub async fn start(
    listener: TcpListener,
    registry: RegistryDirectory,
    settings: AllocatorSettings,
) -> anyhow::Result<RunningNode> {
    let local_addr = listener.local_addr()?;
    let endpoint = advertised_endpoint(&settings.advertise_host, local_addr);

    let (reporter, router) = base_router()?;
    reporter
        .set_serving::<AllocatorServer<AllocatorService>>()
        .await;
    let service = AllocatorService::new(
        registry.clone(),
        settings.worker_prefix,
        settings.connect_timeout,
        settings.health_timeout,
    );
    let router = router.add_service(AllocatorServer::new(service));

    registry
        .register(&settings.name, &endpoint)
        .await
        .with_context(|| format!("failed to register {}", settings.name))?;
    tracing::info!(
        "Allocator {} listening on {local_addr}, advertised as {endpoint}",
        settings.name
    );

    spawn::<AllocatorServer<AllocatorService>>(
        settings.name.clone(),
        endpoint,
        listener,
        router,
        reporter,
        Some(Registration {
            registry,
            name: settings.name,
        }),
    )
}
