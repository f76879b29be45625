//! Tracing subscriber setup, with optional OTLP export.
//!
//! Logs always go to stderr through the `fmt` layer. When an OTLP endpoint
//! is configured, spans and log records are also exported over gRPC.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use forgeconf::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports so an unreachable collector cannot stall us.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

struct Providers {
    tracer: SdkTracerProvider,
    logger: SdkLoggerProvider,
}

static PROVIDERS: OnceLock<Providers> = OnceLock::new();

/// Install the global subscriber. Call once, from `main`.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("Invalid log filter: {}", config.log_level))?;

    let (otel_layer, log_layer) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let providers = build_providers(endpoint)?;
            let tracer = providers.tracer.tracer("meshforge");
            global::set_tracer_provider(providers.tracer.clone());

            let log_layer =
                opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
                    &providers.logger,
                );
            let _ = PROVIDERS.set(providers);
            (
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(log_layer),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .with(log_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    match config.otlp_endpoint.as_deref() {
        Some(endpoint) => tracing::info!("🔭 Exporting traces and logs to {}", endpoint),
        None => tracing::debug!("OTLP export disabled"),
    }
    Ok(())
}

fn build_providers(endpoint: &str) -> Result<Providers> {
    let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    let resource = Resource::builder_empty()
        .with_service_name("meshforge")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(span_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger = SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource)
        .build();

    Ok(Providers { tracer, logger })
}

/// Flush pending spans and logs. A no-op when export was never enabled.
pub fn shutdown() -> Result<()> {
    let Some(providers) = PROVIDERS.get() else {
        return Ok(());
    };
    tracing::info!("🔭 Flushing telemetry...");
    providers
        .tracer
        .shutdown()
        .map_err(|e| anyhow::anyhow!("tracer shutdown failed: {e}"))?;
    providers
        .logger
        .shutdown()
        .map_err(|e| anyhow::anyhow!("logger shutdown failed: {e}"))?;
    Ok(())
}
