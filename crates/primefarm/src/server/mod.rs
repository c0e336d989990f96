//! gRPC servers for the cluster roles.
//!
//! Every node serves `grpc.health.v1` and gRPC reflection next to its own
//! service, runs in a background task and stops when its
//! [`CancellationToken`] is cancelled. Shutdown happens in three steps:
//!
//! 1. the health status flips to `NOT_SERVING`,
//! 2. the server drains in-flight requests and stops,
//! 3. the node removes its own registration from the registrar (best effort).
//!
//! ## Submodules
//!
//! - [`registry`] - the registrar (naming service).
//! - [`allocator`] - hands out healthy workers and prunes dead registrations.
//! - [`worker`] - the compute worker.

pub mod allocator;
pub mod registry;
pub mod worker;

use crate::directory::RegistryDirectory;
use anyhow::Context;
use core::net::SocketAddr;
use primefarm_core::proto::FILE_DESCRIPTOR_SET;
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    server::NamedService,
    transport::{Server, server::Router},
};
use tonic_health::server::HealthReporter;

/// Handle to a node serving in the background.
#[derive(Debug)]
pub struct RunningNode {
    name: String,
    local_addr: SocketAddr,
    endpoint: String,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningNode {
    /// Name the node is known under in the registrar.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint other nodes use to reach this one.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Token that stops the node when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits until the node has stopped.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.task.await.context("server task panicked")?
    }

    /// Stops the node and waits for its shutdown to complete.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.wait().await
    }
}

/// A name this node must remove from the registrar when it stops.
struct Registration {
    registry: RegistryDirectory,
    name: String,
}

pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))
}

/// Endpoint advertised for a listener bound at `addr`.
pub fn advertised_endpoint(host: &str, addr: SocketAddr) -> String {
    format!("http://{host}:{}", addr.port())
}

/// Router carrying the health and reflection services every node exposes.
fn base_router() -> anyhow::Result<(HealthReporter, Router)> {
    let (reporter, health) = tonic_health::server::health_reporter();
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let router = Server::builder()
        .http2_adaptive_window(Some(true))
        .add_service(health)
        .add_service(reflection);
    Ok((reporter, router))
}

/// Serves `router` until `shutdown` is cancelled, then unregisters.
async fn serve<S: NamedService>(
    router: Router,
    listener: TcpListener,
    reporter: HealthReporter,
    shutdown: CancellationToken,
    registration: Option<Registration>,
) -> anyhow::Result<()> {
    router
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await;
            tracing::debug!("Marking {} as not serving", S::NAME);
            reporter.set_not_serving::<S>().await;
        })
        .await?;

    if let Some(Registration { registry, name }) = registration {
        match registry.unregister(&name).await {
            Ok(true) => tracing::info!("Unregistered {name}"),
            Ok(false) => tracing::debug!("{name} was no longer registered"),
            Err(e) => tracing::warn!("Failed to unregister {name}: {e}"),
        }
    }

    tracing::info!("{} shut down", S::NAME);
    Ok(())
}

/// Spawns `serve` in the background and wraps it in a [`RunningNode`].
fn spawn<S: NamedService + 'static>(
    name: String,
    endpoint: String,
    listener: TcpListener,
    router: Router,
    reporter: HealthReporter,
    registration: Option<Registration>,
) -> anyhow::Result<RunningNode> {
    let local_addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve::<S>(
        router,
        listener,
        reporter,
        shutdown.clone(),
        registration,
    ));

    Ok(RunningNode {
        name,
        local_addr,
        endpoint,
        shutdown,
        task,
    })
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
