//! gRPC implementations of the directory traits.
//!
//! - [`RegistryDirectory`] talks to the registrar and implements
//!   [`ServiceDirectory`](primefarm_core::ServiceDirectory).
//! - [`RemoteDirectory`] talks to the allocator and implements
//!   [`WorkerDirectory`](primefarm_core::WorkerDirectory), handing out
//!   [`GrpcWorker`] handles.

mod registry;
mod remote;

pub use registry::RegistryDirectory;
pub use remote::{GrpcWorker, RemoteDirectory};

use core::time::Duration;
use primefarm_core::{Error, Result};
use tonic::transport::Endpoint;

/// Parses `uri` into an endpoint with the connect timeout applied.
pub(crate) fn endpoint(uri: &str, connect_timeout: Duration) -> Result<Endpoint> {
    Endpoint::from_shared(uri.to_owned())
        .map(|endpoint| endpoint.connect_timeout(connect_timeout))
        .map_err(|e| Error::Connection {
            target: uri.to_owned(),
            reason: e.to_string(),
        })
}
