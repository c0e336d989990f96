//! The client role: runs the scheduler against the cluster and prints the
//! result.

use crate::{
    config::{ClientJob, NodeConfig},
    directory::{RegistryDirectory, RemoteDirectory},
};
use anyhow::Context;
use primefarm_core::{RunReport, Scheduler, SchedulerConfig};
use std::io::{self, Write};

/// Finds the allocator through the registrar and searches `job.range` with
/// up to `job.workers` workers.
///
/// # Errors
///
/// Fails if the registrar or the allocator cannot be reached, and with
/// [`primefarm_core::Error::NoWorkers`] or
/// [`primefarm_core::Error::TotalFailure`] from the scheduler.
pub async fn run(
    job: &ClientJob,
    node: &NodeConfig,
    scheduler: SchedulerConfig,
) -> anyhow::Result<RunReport> {
    let registry_uri = node.registry_endpoint(&job.directory_host);
    let registry = RegistryDirectory::connect(&registry_uri, node.connect_timeout)
        .await
        .with_context(|| format!("cannot reach the registrar at {registry_uri}"))?;
    let workers = RemoteDirectory::locate(&registry, &node.allocator_name, node.connect_timeout)
        .await
        .with_context(|| format!("cannot reach the allocator `{}`", node.allocator_name))?;

    let report = Scheduler::new(workers, scheduler)
        .run(job.range, job.workers)
        .await?;
    Ok(report)
}

/// Prints per-worker busy time, the total time, a summary line and then
/// every prime, one per line.
pub fn write_report(out: &mut impl Write, report: &RunReport) -> io::Result<()> {
    for worker in &report.workers {
        write!(out, "{} busy time: {:?}", worker.name, worker.busy)?;
        if worker.failed {
            write!(out, " (connection lost)")?;
        }
        writeln!(out)?;
    }
    writeln!(out, "Total time: {:?}", report.elapsed)?;
    writeln!(
        out,
        "Found {} primes in the interval ({}, {}).",
        report.primes.len(),
        report.range.min(),
        report.range.max()
    )?;
    for prime in &report.primes {
        writeln!(out, "{prime}")?;
    }
    Ok(())
}
