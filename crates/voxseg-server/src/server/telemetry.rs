//! # Logging and telemetry
//!
//! Console logging through `tracing-subscriber` is always installed. Its
//! verbosity follows `RUST_LOG` and defaults to `info`.
//!
//! OpenTelemetry export is opt-in through cargo features:
//!
//! - `trace`: export `tracing` spans.
//! - `metrics`: export request counters and histograms.
//! - `stdout`: print exported data to stdout.
//! - `otlp`: send exported data over OTLP/gRPC. The collector address comes
//!   from the standard `OTEL_EXPORTER_OTLP_ENDPOINT` variable.
//!
//! Exporters need at least one of `trace` or `metrics`:
//!
//! ```bash
//! cargo run --features trace,metrics,otlp -- --volume-path /data/seg
//! ```
//!
//! Only events inside a span are exported as span events; everything else
//! is console output only.

#[cfg(all(feature = "otlp", not(any(feature = "trace", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'trace' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "trace", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'trace' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "trace"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "trace"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "trace"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "trace")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "trace")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "trace")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "voxseg";

/// Exporter pipelines that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "trace")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter, reporting failures on stderr since
    /// logging may already be gone.
    pub fn shutdown(&self) {
        #[cfg(feature = "trace")]
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
    #[cfg(feature = "trace")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "trace")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "trace"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "trace")]
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
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "trace")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "trace"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
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
        let reader =
            sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(std::time::Duration::from_secs(5))
                .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .build()
            .context("failed to build OTLP metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "trace")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch_processor(
        opentelemetry_stdout::SpanExporter::default(),
    ));

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .context("failed to build OTLP span exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "trace", any(feature = "stdout", feature = "otlp")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + Send + Sync + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "metrics")]
struct Metrics {
    requests: Counter<u64>,
    requests_inflight: UpDownCounter<i64>,
    request_errors: Counter<u64>,
    request_duration_ms: Histogram<f64>,
    locations_per_request: Histogram<f64>,
    blocks_per_request: Histogram<f64>,
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Metrics> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = METRICS.set(Metrics {
        requests: meter
            .u64_counter("requests")
            .with_description("Total /values requests")
            .build(),
        requests_inflight: meter
            .i64_up_down_counter("requests_inflight")
            .with_description("Concurrent /values requests")
            .build(),
        request_errors: meter
            .u64_counter("request_errors")
            .with_description("Rejected or failed /values requests")
            .build(),
        request_duration_ms: meter
            .f64_histogram("request_duration")
            .with_unit("ms")
            .with_description("End-to-end /values duration")
            .build(),
        locations_per_request: meter
            .f64_histogram("locations_per_request")
            .with_description("Locations queried per request")
            .build(),
        blocks_per_request: meter
            .f64_histogram("blocks_per_request")
            .with_description("Blocks fetched per request")
            .build(),
    });
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
fn with_metrics(f: impl FnOnce(&Metrics)) {
    if let Some(metrics) = METRICS.get() {
        f(metrics);
    }
}

#[cfg(feature = "metrics")]
pub fn increment_requests() {
    with_metrics(|m| m.requests.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_requests_inflight() {
    with_metrics(|m| m.requests_inflight.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_requests_inflight() {
    with_metrics(|m| m.requests_inflight.add(-1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_requests_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_request_errors() {
    with_metrics(|m| m.request_errors.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_request_errors() {}

#[cfg(feature = "metrics")]
pub fn record_request_duration(duration_ms: f64) {
    with_metrics(|m| m.request_duration_ms.record(duration_ms, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn record_request_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn record_locations_per_request(count: f64) {
    with_metrics(|m| m.locations_per_request.record(count, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn record_locations_per_request(_count: f64) {}

#[cfg(feature = "metrics")]
pub fn record_blocks_per_request(count: f64) {
    with_metrics(|m| m.blocks_per_request.record(count, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn record_blocks_per_request(_count: f64) {}
