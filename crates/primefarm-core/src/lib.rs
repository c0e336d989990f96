#![doc = include_str!("../README.md")]

mod common;

pub mod directory;
pub mod interval;
pub mod primes;
pub mod scheduler;
pub mod session;

pub use common::{
    error::{Error, Result},
    proto,
    types::*,
};
pub use directory::{ServiceDirectory, Worker, WorkerDirectory, numbered_ordinal};
pub use interval::IntervalManager;
pub use scheduler::{RunReport, Scheduler, SchedulerConfig, WorkerReport};
pub use session::{Outcome, SessionStats, SessionStatus, WorkerSession};
