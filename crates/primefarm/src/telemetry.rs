//! # Telemetry
//!
//! Every node logs through `tracing` with a human-readable `fmt` layer on
//! stderr (stdout is reserved for the client's result listing). On top of
//! that, OpenTelemetry export can be compiled in.
//!
//! ## Feature matrix
//!
//! - `traces`: exports spans (the scheduler run, each remote compute call).
//! - `metrics`: exports counters and histograms for the compute workers and
//!   the allocator.
//! - `otlp`: OTLP/gRPC exporter, configured from the environment.
//! - `stdout`: stdout exporter, for local inspection.
//!
//! Exporters require at least one of `traces` or `metrics`. Both exporters
//! may be enabled together.
//!
//! ## OTLP environment
//!
//! - `OTLP_ENDPOINT` (required), e.g. `https://collector:4317`. TLS with the
//!   native roots is used for `https` endpoints.
//! - `OTLP_COMPRESSION` (optional): `gzip` or `zstd`.
//! - `OTLP_HEADERS` (optional): comma separated `key=value` pairs sent as
//!   gRPC metadata, e.g. an API key.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features traces,metrics,otlp -- -c
//! cargo run --features traces,stdout -- -u 1 100000 4
//! ```
//!
//! Without any telemetry feature the metric helpers below compile to no-ops.

#[cfg(all(feature = "otlp", not(any(feature = "traces", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'traces' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "traces", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'traces' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "traces")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "traces")))]
use tonic::{metadata::MetadataMap, transport::ClientTlsConfig};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "traces")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "traces")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "traces")]
use opentelemetry_sdk::trace as sdktrace;

/// Providers that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "traces")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled provider. Errors are reported on
    /// stderr since the subscriber may already be unusable.
    pub fn shutdown(self) {
        #[cfg(feature = "traces")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "traces")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "traces")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "traces"))]
    let scope = InstrumentationScope::builder("primefarm")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );

    #[cfg(feature = "traces")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "traces")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "traces")))]
struct OtlpSettings {
    endpoint: String,
    compression: Option<Compression>,
    metadata: MetadataMap,
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "traces")))]
impl OtlpSettings {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use std::str::FromStr;

        let endpoint = std::env::var("OTLP_ENDPOINT").context("missing `OTLP_ENDPOINT`")?;
        let compression = match std::env::var("OTLP_COMPRESSION") {
            Ok(raw) => Some(Compression::from_str(&raw.to_ascii_lowercase())?),
            Err(_) => None,
        };

        let mut metadata = MetadataMap::new();
        if let Ok(headers) = std::env::var("OTLP_HEADERS") {
            for pair in headers.split(',').filter(|pair| !pair.trim().is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("malformed `OTLP_HEADERS` entry: {pair}"))?;
                let key = tonic::metadata::AsciiMetadataKey::from_str(key.trim())
                    .with_context(|| format!("invalid header name: {key}"))?;
                metadata.insert(key, value.trim().parse().context("invalid header value")?);
            }
        }

        Ok(Self {
            endpoint,
            compression,
            metadata,
        })
    }

    fn tls(&self) -> Option<ClientTlsConfig> {
        self.endpoint
            .starts_with("https://")
            .then(|| ClientTlsConfig::new().with_native_roots())
    }
}

#[cfg(any(feature = "metrics", feature = "traces"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("primefarm")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = OtlpSettings::from_env()?;
        let mut exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_metadata(settings.metadata.clone())
            .with_timeout(std::time::Duration::from_secs(10))
            .with_endpoint(settings.endpoint.clone())
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta);
        if let Some(tls) = settings.tls() {
            exporter = exporter.with_tls_config(tls);
        }
        if let Some(compression) = settings.compression {
            exporter = exporter.with_compression(compression);
        }
        let exporter = exporter
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "traces")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let batch = sdktrace::BatchSpanProcessor::builder(SpanExporter::default())
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = OtlpSettings::from_env()?;
        let mut exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_metadata(settings.metadata.clone())
            .with_timeout(std::time::Duration::from_secs(10))
            .with_endpoint(settings.endpoint.clone())
            .with_protocol(Protocol::Grpc);
        if let Some(tls) = settings.tls() {
            exporter = exporter.with_tls_config(tls);
        }
        if let Some(compression) = settings.compression {
            exporter = exporter.with_compression(compression);
        }
        let exporter = exporter
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static CHUNKS_COMPUTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static COMPUTE_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static INTEGERS_TESTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PRIMES_FOUND: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static COMPUTE_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WORKERS_PRUNED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = CHUNKS_COMPUTED.set(
        meter
            .u64_counter("chunks_computed")
            .with_description("Chunks computed by this worker")
            .build(),
    );

    let _ = COMPUTE_ERRORS.set(
        meter
            .u64_counter("compute_errors")
            .with_description("Rejected or aborted compute requests")
            .build(),
    );

    let _ = INTEGERS_TESTED.set(
        meter
            .u64_counter("integers_tested")
            .with_description("Integers tested for primality")
            .build(),
    );

    let _ = PRIMES_FOUND.set(
        meter
            .u64_counter("primes_found")
            .with_description("Primes found by this worker")
            .build(),
    );

    let _ = COMPUTE_DURATION_MS.set(
        meter
            .f64_histogram("compute_duration")
            .with_unit("ms")
            .with_description("Time spent testing one chunk")
            .build(),
    );

    let _ = WORKERS_PRUNED.set(
        meter
            .u64_counter("workers_pruned")
            .with_description("Stale worker registrations removed by the allocator")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_chunks_computed() {
    if let Some(counter) = CHUNKS_COMPUTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_chunks_computed() {}

#[cfg(feature = "metrics")]
pub fn increment_compute_errors() {
    if let Some(counter) = COMPUTE_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_compute_errors() {}

#[cfg(feature = "metrics")]
pub fn increment_integers_tested(count: u64) {
    if let Some(counter) = INTEGERS_TESTED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_integers_tested(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_primes_found(count: u64) {
    if let Some(counter) = PRIMES_FOUND.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_primes_found(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn record_compute_duration(duration_ms: f64) {
    if let Some(histogram) = COMPUTE_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_compute_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_workers_pruned(count: u64) {
    if let Some(counter) = WORKERS_PRUNED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_workers_pruned(_count: u64) {}
