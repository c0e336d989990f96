//! Error types for the distributed prime search.
//!
//! This module defines the central `Error` enum shared by the scheduler, the
//! worker sessions and the gRPC services. It implements `From<Error>` for
//! `tonic::Status` so service handlers can propagate errors with `?` and the
//! client sees an appropriate status code.
//!
//! ## Error Cases
//! - `InvalidRange` / `OverlappingSpans`: a range or chunk violated its
//!   invariants.
//! - `InvalidTransition`: a worker session was driven out of order.
//! - `NoWorkers`: the directory returned zero workers, so the run cannot start.
//! - `TotalFailure`: every active worker failed; the run is abandoned.
//! - `Remote` / `Timeout` / `Connection`: a remote call or connection failed.
//!   Inside the scheduler these never escape the main loop; they turn a
//!   session into `Failed` and its chunk is reassigned.
//! - `NotFound` / `AlreadyBound` / `Directory`: naming and allocation errors.
//! - `InvalidRequest`: a client request was malformed.
//! - `ChannelError`: an internal channel closed unexpectedly.

use crate::session::SessionStatus;
use core::time::Duration;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the prime search cluster.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The bounds do not describe a valid range.
    #[error("Invalid range [{min}, {max}]: min must be less than max")]
    InvalidRange { min: i64, max: i64 },

    /// Two spans of the same chunk share at least one integer.
    #[error("Spans [{first_min}, {first_max}] and [{second_min}, {second_max}] overlap")]
    OverlappingSpans {
        first_min: i64,
        first_max: i64,
        second_min: i64,
        second_max: i64,
    },

    /// A session operation was called from a status that does not allow it.
    #[error("Session {session} cannot {action} while {from:?}")]
    InvalidTransition {
        session: usize,
        from: SessionStatus,
        action: &'static str,
    },

    /// The directory had no workers to hand out.
    #[error("No workers available ({requested} requested)")]
    NoWorkers { requested: usize },

    /// Every active worker failed before the range was covered.
    #[error("Connection lost with all {workers} workers")]
    TotalFailure { workers: usize },

    /// The remote side answered with an error status.
    #[error("Worker {worker} failed with {code:?}: {message}")]
    Remote {
        worker: String,
        code: Code,
        message: String,
    },

    /// The remote call did not finish within the configured limit.
    #[error("Worker {worker} did not answer within {after:?}")]
    Timeout { worker: String, after: Duration },

    /// A connection to a remote endpoint could not be established.
    #[error("Cannot connect to {target}: {reason}")]
    Connection { target: String, reason: String },

    /// No binding exists under the given name.
    #[error("Name not bound: {name}")]
    NotFound { name: String },

    /// The name is already bound and rebinding was not requested.
    #[error("Name already bound: {name}")]
    AlreadyBound { name: String },

    /// The directory misbehaved (bad endpoint, unexpected reply, ...).
    #[error("Directory error: {context}")]
    Directory { context: String },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    /// Wraps a status returned by a remote worker.
    pub fn remote(worker: impl Into<String>, status: &Status) -> Self {
        Self::Remote {
            worker: worker.into(),
            code: status.code(),
            message: status.message().to_owned(),
        }
    }

    /// Returns `true` for errors caused by a peer being unreachable or
    /// misbehaving, as opposed to local misuse.
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::Timeout { .. } | Self::Connection { .. }
        )
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRange { .. }
            | Error::OverlappingSpans { .. }
            | Error::InvalidRequest { .. } => Status::invalid_argument(err.to_string()),
            Error::InvalidTransition { .. } | Error::ChannelError { .. } => {
                Status::internal(err.to_string())
            }
            Error::NoWorkers { .. } | Error::TotalFailure { .. } => {
                Status::unavailable(err.to_string())
            }
            Error::Remote { code, message, .. } => Status::new(code, message),
            Error::Timeout { .. } => Status::deadline_exceeded(err.to_string()),
            Error::Connection { .. } | Error::Directory { .. } => {
                Status::unavailable(err.to_string())
            }
            Error::NotFound { name } => Status::not_found(format!("Name not bound: {name}")),
            Error::AlreadyBound { name } => {
                Status::already_exists(format!("Name already bound: {name}"))
            }
        }
    }
}
