//! Shared types, protocol bindings and error definitions.
//!
//! The `common` module defines the pieces every node of the cluster agrees
//! on: the value types that describe work, the generated gRPC bindings, and
//! the error type.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type and its mapping onto gRPC statuses.
//! - [`types`] - Ranges, spans, chunks and compute results.
//! - [`proto`] - Generated Protobuf messages and service stubs.
//!
//! Conversions between the validated value types and their wire messages live
//! alongside the bindings so that every service validates input the same way.

pub mod error;
pub mod types;

mod convert;

pub mod proto {
    tonic::include_proto!("primefarm");
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("primefarm_descriptor");
}
