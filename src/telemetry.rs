use opentelemetry::trace::TraceId;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

const SERVICE_NAME: &str = "integration-operator";

/// Fetch an opentelemetry::trace::TraceId as hex through the full tracing stack
pub fn get_trace_id() -> Option<TraceId> {
    use opentelemetry::trace::TraceContextExt as _; // opentelemetry::Context -> opentelemetry::trace::Span
    use tracing_opentelemetry::OpenTelemetrySpanExt as _; // tracing::Span to opentelemetry::Context

    match tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
    {
        TraceId::INVALID => None,
        valid => Some(valid),
    }
}

#[cfg(feature = "telemetry")]
fn init_tracer_provider() -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use anyhow::Context as _;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};

    let otlp_endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL")
        .context("Need a otel tracing collector configured via OPENTELEMETRY_ENDPOINT_URL")?;

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()
        .context("Failed to create OTLP span exporter")?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build())
}

/// Initialize tracing: compact logs filtered by `RUST_LOG` (default `info`), plus span export
/// when built with the `telemetry` feature.
pub fn init() -> anyhow::Result<()> {
    #[cfg(feature = "telemetry")]
    let telemetry = {
        use opentelemetry::trace::TracerProvider;
        let provider = init_tracer_provider()?;
        let tracer = provider.tracer(SERVICE_NAME);
        // Set the global tracer provider so it stays alive
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    };

    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    #[cfg(feature = "telemetry")]
    let collector = Registry::default()
        .with(telemetry)
        .with(logger)
        .with(env_filter);
    #[cfg(not(feature = "telemetry"))]
    let collector = Registry::default().with(logger).with(env_filter);

    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}
