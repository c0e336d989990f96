/// Builds the gRPC client and server code for the `primefarm.proto` definition
/// using `tonic-prost-build`.
///
/// The proto defines three services that together make up a cluster:
///
/// - `PrimeWorker` - computes the primes inside a chunk of spans.
/// - `Allocator` - hands out up to N live worker endpoints.
/// - `Registry` - the naming service every node registers with.
///
/// # Files and Paths
///
/// - Proto file: `proto/primefarm.proto`
/// - Includes: `proto/`
///
/// A file descriptor set is written next to the generated code so the servers
/// can expose gRPC reflection.
///
/// # Panics
///
/// This function will `panic!` if code generation fails (for example when
/// `protoc` is not installed).
///
/// # Output
///
/// Generated code is accessible via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("primefarm");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("primefarm_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/primefarm.proto"], &["proto"])
        .unwrap();
}
