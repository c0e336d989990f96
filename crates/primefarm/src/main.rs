use clap::{CommandFactory, Parser, error::ErrorKind};
use primefarm::{
    client,
    config::{CliArgs, Config, Role},
    directory::RegistryDirectory,
    server::{self, RunningNode, allocator::AllocatorSettings},
    telemetry::init_telemetry,
};
use std::{
    io::{self, Write},
    process::ExitCode,
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = match Config::try_from(args) {
        Ok(config) => config,
        Err(e) => CliArgs::command()
            .error(ErrorKind::ValueValidation, format!("{e:#}"))
            .exit(),
    };

    let providers = init_telemetry()?;
    let result = run(config).await;
    providers.shutdown();
    result
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let node = &config.node;
    let running = match &config.role {
        Role::Client(job) => {
            return match client::run(job, node, config.scheduler.clone()).await {
                Ok(report) => {
                    client::write_report(&mut io::stdout().lock(), &report)?;
                    io::stdout().flush()?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("{e:#}");
                    Ok(ExitCode::FAILURE)
                }
            };
        }
        Role::Registrar => {
            let listener = server::bind(&node.bind_host, node.registry_port).await?;
            server::registry::start(listener).await?
        }
        Role::Allocator { directory_host } => {
            let registry = connect_registry(&config, directory_host).await?;
            let listener = server::bind(&node.bind_host, node.port).await?;
            server::allocator::start(
                listener,
                registry,
                AllocatorSettings {
                    name: node.allocator_name.clone(),
                    advertise_host: node.advertise_host.clone(),
                    worker_prefix: node.worker_prefix.clone(),
                    connect_timeout: node.connect_timeout,
                    health_timeout: node.health_timeout,
                },
            )
            .await?
        }
        Role::Compute { directory_host } => {
            let registry = connect_registry(&config, directory_host).await?;
            let listener = server::bind(&node.bind_host, node.port).await?;
            server::worker::start(listener, registry, &node.advertise_host, &node.worker_prefix)
                .await?
        }
    };

    serve_until_signal(running).await?;
    Ok(ExitCode::SUCCESS)
}

async fn connect_registry(config: &Config, host: &str) -> anyhow::Result<RegistryDirectory> {
    let uri = config.node.registry_endpoint(host);
    RegistryDirectory::connect(&uri, config.node.connect_timeout)
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach the registrar at {uri}: {e}"))
}

async fn serve_until_signal(node: RunningNode) -> anyhow::Result<()> {
    let shutdown = node.shutdown_token();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        tracing::info!("Shutdown signal received, terminating gracefully...");
        shutdown.cancel();
    });

    tracing::info!("{} ready at {}", node.name(), node.endpoint());
    node.wait().await
}
