//! Command line and environment configuration.
//!
//! One binary plays every role of the cluster; exactly one mode flag picks
//! which:
//!
//! | Flag | Role |
//! |---|---|
//! | `-r` | registrar (naming service) |
//! | `-a [host]` | allocator, registered as `WorkerFactoryServer` |
//! | `-c [host]` | compute worker, registered as `Worker<N>` |
//! | `-u min max workers [host]` | client |
//!
//! `host` is the registrar's host and defaults to `127.0.0.1`. It may carry
//! an explicit port (`host:port`); otherwise the registry port is used.
//!
//! Everything else is a tunable with an environment fallback. A `.env` file
//! in the working directory is loaded first.

use anyhow::{Context, bail};
use clap::{ArgGroup, Parser};
use core::time::Duration;
use primefarm_core::{DEFAULT_CHUNK_SIZE, SchedulerConfig, SearchRange, scheduler};

/// Host used when a mode flag is given without a registrar host.
pub const DEFAULT_DIRECTORY_HOST: &str = "127.0.0.1";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "primefarm",
    version,
    about = "Distributed prime search with an adaptive interval scheduler"
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["compute", "allocator", "client", "registrar"])
))]
pub struct CliArgs {
    /// Start a compute worker and register it with the registrar on HOST.
    #[arg(short = 'c', value_name = "HOST", num_args = 0..=1)]
    pub compute: Option<Option<String>>,

    /// Start the worker allocator and register it with the registrar on HOST.
    #[arg(short = 'a', value_name = "HOST", num_args = 0..=1)]
    pub allocator: Option<Option<String>>,

    /// Find every prime in [MIN, MAX] using up to NUM_WORKERS workers.
    #[arg(
        short = 'u',
        value_names = ["MIN", "MAX", "NUM_WORKERS", "HOST"],
        num_args = 3..=4,
        allow_negative_numbers = true
    )]
    pub client: Option<Vec<String>>,

    /// Start the registrar.
    #[arg(short = 'r')]
    pub registrar: bool,

    /// Port the registrar listens on, and the default port used to reach it.
    ///
    /// Environment variable: `PRIMEFARM_REGISTRY_PORT`
    #[arg(long, env = "PRIMEFARM_REGISTRY_PORT", default_value_t = 50100)]
    pub registry_port: u16,

    /// Interface servers bind to.
    ///
    /// Environment variable: `PRIMEFARM_BIND_HOST`
    #[arg(long, env = "PRIMEFARM_BIND_HOST", default_value_t = String::from("0.0.0.0"))]
    pub bind_host: String,

    /// Host other nodes use to reach this node. Registered in the registrar
    /// together with the bound port.
    ///
    /// Environment variable: `PRIMEFARM_ADVERTISE_HOST`
    #[arg(long, env = "PRIMEFARM_ADVERTISE_HOST", default_value_t = String::from("127.0.0.1"))]
    pub advertise_host: String,

    /// Port for compute workers and the allocator. `0` picks a free port.
    ///
    /// Environment variable: `PRIMEFARM_PORT`
    #[arg(long, env = "PRIMEFARM_PORT", default_value_t = 0)]
    pub port: u16,

    /// Chunk size every worker starts with.
    ///
    /// Environment variable: `PRIMEFARM_CHUNK_SIZE`
    #[arg(long, env = "PRIMEFARM_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Largest chunk a fast worker can grow to.
    ///
    /// Environment variable: `PRIMEFARM_MAX_CHUNK_SIZE`
    #[arg(long, env = "PRIMEFARM_MAX_CHUNK_SIZE", default_value_t = scheduler::DEFAULT_MAX_CHUNK_SIZE)]
    pub max_chunk_size: u64,

    /// Fail a compute call that takes longer than this many seconds. Unset
    /// means wait indefinitely.
    ///
    /// Environment variable: `PRIMEFARM_CALL_TIMEOUT_SECS`
    #[arg(long, env = "PRIMEFARM_CALL_TIMEOUT_SECS")]
    pub call_timeout_secs: Option<u64>,

    /// Timeout for establishing any connection, in milliseconds.
    ///
    /// Environment variable: `PRIMEFARM_CONNECT_TIMEOUT_MS`
    #[arg(long, env = "PRIMEFARM_CONNECT_TIMEOUT_MS", default_value_t = 2_000)]
    pub connect_timeout_ms: u64,

    /// How long the allocator waits for a worker's health check, in
    /// milliseconds.
    ///
    /// Environment variable: `PRIMEFARM_HEALTH_TIMEOUT_MS`
    #[arg(long, env = "PRIMEFARM_HEALTH_TIMEOUT_MS", default_value_t = 1_000)]
    pub health_timeout_ms: u64,

    /// Name prefix compute workers are registered under.
    ///
    /// Environment variable: `PRIMEFARM_WORKER_PREFIX`
    #[arg(long, env = "PRIMEFARM_WORKER_PREFIX", default_value_t = String::from("Worker"))]
    pub worker_prefix: String,

    /// Name the allocator is registered under.
    ///
    /// Environment variable: `PRIMEFARM_ALLOCATOR_NAME`
    #[arg(long, env = "PRIMEFARM_ALLOCATOR_NAME", default_value_t = String::from("WorkerFactoryServer"))]
    pub allocator_name: String,
}

/// What this process does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Registrar,
    Allocator { directory_host: String },
    Compute { directory_host: String },
    Client(ClientJob),
}

/// A validated `-u` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientJob {
    pub range: SearchRange,
    pub workers: usize,
    pub directory_host: String,
}

/// Settings shared by every role.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub registry_port: u16,
    pub bind_host: String,
    pub advertise_host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub health_timeout: Duration,
    pub worker_prefix: String,
    pub allocator_name: String,
}

impl NodeConfig {
    /// gRPC endpoint of the registrar on `host`.
    ///
    /// A host that already names a port keeps it.
    pub fn registry_endpoint(&self, host: &str) -> String {
        if host.starts_with("http://") || host.starts_with("https://") {
            return host.to_owned();
        }
        if host.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            format!("http://{host}")
        } else {
            format!("http://{host}:{}", self.registry_port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub node: NodeConfig,
    pub scheduler: SchedulerConfig,
}

impl TryFrom<CliArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let host = |host: Option<String>| host.unwrap_or_else(|| DEFAULT_DIRECTORY_HOST.to_owned());

        let role = match (args.compute, args.allocator, args.client, args.registrar) {
            (Some(directory), None, None, false) => Role::Compute {
                directory_host: host(directory),
            },
            (None, Some(directory), None, false) => Role::Allocator {
                directory_host: host(directory),
            },
            (None, None, Some(values), false) => Role::Client(parse_client_job(values)?),
            (None, None, None, true) => Role::Registrar,
            _ => bail!("exactly one of -c, -a, -u or -r is required"),
        };

        if args.chunk_size == 0 {
            bail!("PRIMEFARM_CHUNK_SIZE must be greater than 0");
        }
        if args.max_chunk_size < args.chunk_size {
            bail!(
                "PRIMEFARM_MAX_CHUNK_SIZE ({}) must not be below PRIMEFARM_CHUNK_SIZE ({})",
                args.max_chunk_size,
                args.chunk_size
            );
        }
        if args.worker_prefix.is_empty() {
            bail!("PRIMEFARM_WORKER_PREFIX must not be empty");
        }
        if args.worker_prefix.ends_with(|c: char| c.is_ascii_digit()) {
            bail!("PRIMEFARM_WORKER_PREFIX must not end with a digit");
        }
        if args.call_timeout_secs == Some(0) {
            bail!("PRIMEFARM_CALL_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            role,
            node: NodeConfig {
                registry_port: args.registry_port,
                bind_host: args.bind_host,
                advertise_host: args.advertise_host,
                port: args.port,
                connect_timeout: Duration::from_millis(args.connect_timeout_ms),
                health_timeout: Duration::from_millis(args.health_timeout_ms),
                worker_prefix: args.worker_prefix,
                allocator_name: args.allocator_name,
            },
            scheduler: SchedulerConfig {
                initial_chunk_size: args.chunk_size,
                max_chunk_size: args.max_chunk_size,
                call_timeout: args.call_timeout_secs.map(Duration::from_secs),
            },
        })
    }
}

fn parse_client_job(values: Vec<String>) -> anyhow::Result<ClientJob> {
    let mut values = values.into_iter();
    let (Some(min), Some(max), Some(workers)) = (values.next(), values.next(), values.next())
    else {
        bail!("-u expects MIN MAX NUM_WORKERS [HOST]");
    };
    let directory_host = values
        .next()
        .unwrap_or_else(|| DEFAULT_DIRECTORY_HOST.to_owned());

    let min: i64 = min
        .parse()
        .with_context(|| format!("MIN is not an integer: {min}"))?;
    let max: i64 = max
        .parse()
        .with_context(|| format!("MAX is not an integer: {max}"))?;
    let workers: usize = workers
        .parse()
        .with_context(|| format!("NUM_WORKERS is not a non-negative integer: {workers}"))?;

    let range = SearchRange::new(min, max)?;
    if workers == 0 {
        bail!("NUM_WORKERS must be greater than 0");
    }

    Ok(ClientJob {
        range,
        workers,
        directory_host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Config> {
        let args = CliArgs::try_parse_from(core::iter::once("primefarm").chain(args.iter().copied()))?;
        Config::try_from(args)
    }

    #[test]
    fn client_with_default_host() {
        let config = parse(&["-u", "1", "20", "2"]).unwrap();
        let Role::Client(job) = config.role else {
            panic!("expected client role");
        };
        assert_eq!(job.range, SearchRange::new(1, 20).unwrap());
        assert_eq!(job.workers, 2);
        assert_eq!(job.directory_host, DEFAULT_DIRECTORY_HOST);
    }

    #[test]
    fn client_accepts_negative_bounds_and_host() {
        let config = parse(&["-u", "-10", "10", "3", "registry.local"]).unwrap();
        let Role::Client(job) = config.role else {
            panic!("expected client role");
        };
        assert_eq!(job.range.min(), -10);
        assert_eq!(job.directory_host, "registry.local");
    }

    #[test]
    fn tunables_may_follow_client_arguments() {
        let config = parse(&["-u", "1", "20", "2", "--chunk-size", "5"]).unwrap();
        let Role::Client(job) = config.role else {
            panic!("expected client role");
        };
        assert_eq!(job.directory_host, DEFAULT_DIRECTORY_HOST);
        assert_eq!(config.scheduler.initial_chunk_size, 5);

        let config = parse(&["-u", "-5", "5", "1", "host", "--chunk-size", "7"]).unwrap();
        assert_eq!(config.scheduler.initial_chunk_size, 7);
    }

    #[test]
    fn client_rejects_bad_input() {
        assert!(parse(&["-u", "1", "20"]).is_err());
        assert!(parse(&["-u", "1", "20", "2", "host", "extra"]).is_err());
        assert!(parse(&["-u", "one", "20", "2"]).is_err());
        assert!(parse(&["-u", "20", "20", "2"]).is_err());
        assert!(parse(&["-u", "30", "20", "2"]).is_err());
        assert!(parse(&["-u", "1", "20", "0"]).is_err());
        assert!(parse(&["-u", "1", "20", "-2"]).is_err());
    }

    #[test]
    fn server_roles_with_optional_host() {
        let config = parse(&["-c"]).unwrap();
        assert_eq!(
            config.role,
            Role::Compute {
                directory_host: DEFAULT_DIRECTORY_HOST.to_owned()
            }
        );

        let config = parse(&["-a", "10.0.0.5"]).unwrap();
        assert_eq!(
            config.role,
            Role::Allocator {
                directory_host: "10.0.0.5".to_owned()
            }
        );

        assert_eq!(parse(&["-r"]).unwrap().role, Role::Registrar);
    }

    #[test]
    fn exactly_one_mode_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["-r", "-c"]).is_err());
        assert!(parse(&["-a", "-u", "1", "2", "1"]).is_err());
    }

    #[test]
    fn tunables_are_validated() {
        assert!(parse(&["-r", "--chunk-size", "0"]).is_err());
        assert!(parse(&["-r", "--chunk-size", "100", "--max-chunk-size", "10"]).is_err());
        assert!(parse(&["-r", "--worker-prefix", "Node7"]).is_err());

        let config = parse(&["-r", "--call-timeout-secs", "30"]).unwrap();
        assert_eq!(config.scheduler.call_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn registry_endpoint_defaults_the_port() {
        let config = parse(&["-r", "--registry-port", "6000"]).unwrap();
        assert_eq!(
            config.node.registry_endpoint("10.0.0.5"),
            "http://10.0.0.5:6000"
        );
        assert_eq!(
            config.node.registry_endpoint("10.0.0.5:7000"),
            "http://10.0.0.5:7000"
        );
        assert_eq!(
            config.node.registry_endpoint("http://registry:1"),
            "http://registry:1"
        );
    }
}
