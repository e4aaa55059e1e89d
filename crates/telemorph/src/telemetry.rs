use std::io::IsTerminal;

use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace as sdktrace;
use telemorph_core::config::LogFormat;
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Keeps the span exporter alive; flushes it when dropped.
pub struct TelemetryGuard {
    provider: Option<sdktrace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("telemetry shutdown failed: {err}");
            }
        }
    }
}

/// Installs the process subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(format: LogFormat) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = std::io::stdout().is_terminal();
    let (compact, json) = match format {
        LogFormat::Compact => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(ansi)
                    .compact(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json()
                    .flatten_event(true),
            ),
        ),
    };

    let (otlp_layer, provider) = match build_otlp_layer() {
        Some((layer, provider)) => (Some(layer), Some(provider)),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(compact)
        .with(json)
        .with(otlp_layer)
        .try_init();

    TelemetryGuard { provider }
}

fn build_otlp_layer<S>() -> Option<(OpenTelemetryLayer<S, sdktrace::Tracer>, sdktrace::SdkTracerProvider)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_err() {
        return None;
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder().with_tonic().build() {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("otlp span exporter disabled: {err}");
            return None;
        }
    };

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer("telemorph");
    Some((tracing_opentelemetry::layer().with_tracer(tracer), provider))
}
