//! Logging and trace export for the cyberdeck daemon.
//!
//! Call [`init_tracing`] once, before the tokio runtime is built.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `CYBERDECK_LOG_FORMAT=json` | Newline-delimited JSON instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector URL; enables span export. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = cyberdeck_runtime::telemetry::init_tracing("cyberdeck");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the log line format.
pub const LOG_FORMAT_ENV: &str = "CYBERDECK_LOG_FORMAT";

/// Install the global subscriber.
///
/// Console output is always on; span export is added when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the exporter builds.  A second
/// call leaves the first subscriber in place.
///
/// Hold the returned guard until exit: dropping it flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let provider = build_provider(service_name);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("cyberdeck")));
    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer().compact()))
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json_layer)
        .with(text_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("[cyberdeck] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the tracer provider down (flushing spans) when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[cyberdeck] trace provider shutdown failed: {e}");
            }
        }
    }
}

/// `None` when no endpoint is configured or the exporter fails to build.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("[cyberdeck] OTLP exporter unavailable: {e}");
            return None;
        }
    };

    // The simple exporter needs no runtime; init happens before tokio starts.
    Some(
        SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(service_name.to_string()).build())
            .with_simple_exporter(exporter)
            .build(),
    )
}
