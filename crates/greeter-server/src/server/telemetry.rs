//! # Telemetry
//!
//! Console logging is always on: a `tracing-subscriber` registry filtered by
//! `RUST_LOG` (default `info`) with either a pretty or a JSON `fmt` layer.
//!
//! OpenTelemetry export is opt-in through cargo features.
//!
//! ## Feature matrix
//!
//! - `otel-tracing`: Bridges `tracing` spans into OpenTelemetry traces.
//! - `otel-metrics`: Records RPC and gateway metrics (counters, histograms).
//! - `stdout`: Exports to stdout via `opentelemetry-stdout`.
//! - `otlp`: Exports over OTLP/gRPC. The endpoint is read from
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://localhost:4317`).
//!
//! ## Feature constraints
//!
//! - Exporters require at least one of `otel-tracing` or `otel-metrics`.
//! - `stdout` and `otlp` can be enabled at the same time.
//!
//! ## Metrics
//!
//! - `rpc.calls` (`method`, `category`) - completed RPCs by outcome.
//! - `rpc.duration` (`method`) - handler latency in milliseconds.
//! - `gateway.responses` (`route`, `status`) - gateway replies by HTTP status.
//!
//! The recording helpers compile to no-ops without `otel-metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features otel-tracing,otel-metrics,stdout
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://collector:4317 cargo run --features otel-tracing,otlp
//! ```

#[cfg(all(
    feature = "otlp",
    not(any(feature = "otel-tracing", feature = "otel-metrics"))
))]
compile_error!(
    "The 'otlp' feature requires at least one of 'otel-tracing' or 'otel-metrics' to be enabled."
);

#[cfg(all(
    feature = "stdout",
    not(any(feature = "otel-tracing", feature = "otel-metrics"))
))]
compile_error!(
    "The 'stdout' feature requires at least one of 'otel-tracing' or 'otel-metrics' to be enabled."
);

use crate::server::config::LogFormat;
use core::time::Duration;
use greeter_core::ErrorCategory;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otel-metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "otel-metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "otel-metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel-tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
const SERVICE_NAME: &str = "greeter";

/// Handles to the exporters installed by [`init_telemetry`].
///
/// Call [`TelemetryProviders::shutdown`] before exiting so buffered spans and
/// metrics are flushed.
pub struct TelemetryProviders {
    #[cfg(feature = "otel-tracing")]
    tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "otel-metrics")]
    meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    pub fn shutdown(self) {
        #[cfg(feature = "otel-tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "otel-metrics")]
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

/// Installs the global subscriber and any enabled exporters.
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already set.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel-tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel-tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "otel-metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let pretty = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });
    let json = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
    });

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json);

    #[cfg(feature = "otel-tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "otel-metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel-tracing")]
        tracer_provider,
        #[cfg(feature = "otel-metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
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

#[cfg(feature = "otel-metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::{Compression, WithTonicConfig};

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_compression(Compression::Gzip)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel-tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(
        sdktrace::BatchSpanProcessor::builder(opentelemetry_stdout::SpanExporter::default())
            .with_batch_config(batch_config())
            .build(),
    );

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::{Compression, WithTonicConfig};

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_compression(Compression::Gzip)
            .build()
            .context("failed to build tracer exporter")?;

        builder.with_span_processor(
            sdktrace::BatchSpanProcessor::builder(exporter)
                .with_batch_config(batch_config())
                .build(),
        )
    };

    Ok(builder.build())
}

#[cfg(all(feature = "otel-tracing", any(feature = "stdout", feature = "otlp")))]
fn batch_config() -> sdktrace::BatchConfig {
    sdktrace::BatchConfigBuilder::default()
        .with_scheduled_delay(Duration::from_secs(5))
        .with_max_queue_size(2048)
        .build()
}

#[cfg(feature = "otel-metrics")]
static RPC_CALLS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static RPC_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static GATEWAY_RESPONSES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "otel-metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = RPC_CALLS.set(
        meter
            .u64_counter("rpc.calls")
            .with_description("Completed RPCs by outcome category")
            .build(),
    );

    let _ = RPC_DURATION_MS.set(
        meter
            .f64_histogram("rpc.duration")
            .with_unit("ms")
            .with_description("Handler latency per RPC")
            .build(),
    );

    let _ = GATEWAY_RESPONSES.set(
        meter
            .u64_counter("gateway.responses")
            .with_description("Gateway replies by HTTP status")
            .build(),
    );
}

#[cfg(feature = "otel-metrics")]
pub fn record_rpc(method: &'static str, category: ErrorCategory, elapsed: Duration) {
    if let Some(counter) = RPC_CALLS.get() {
        counter.add(
            1,
            &[
                KeyValue::new("method", method),
                KeyValue::new("category", category.as_str()),
            ],
        );
    }
    if let Some(histogram) = RPC_DURATION_MS.get() {
        histogram.record(
            elapsed.as_secs_f64() * 1_000.0,
            &[KeyValue::new("method", method)],
        );
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn record_rpc(_method: &'static str, _category: ErrorCategory, _elapsed: Duration) {}

#[cfg(feature = "otel-metrics")]
pub fn record_gateway_response(route: &str, status: u16) {
    if let Some(counter) = GATEWAY_RESPONSES.get() {
        counter.add(
            1,
            &[
                KeyValue::new("route", route.to_owned()),
                KeyValue::new("status", i64::from(status)),
            ],
        );
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn record_gateway_response(_route: &str, _status: u16) {}
