//! Logging and trace export setup for the `objnav` binary.
//!
//! Call [`init_tracing`] once at startup and keep the returned guard alive
//! until the process exits.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `OBJNAV_LOG_FORMAT=json` | Newline-delimited JSON logs instead of the compact format. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector URL.  When set, spans (one per episode) are exported. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = objnav_runtime::telemetry::init_tracing("objnav");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console log rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `Json` when `value` is `"json"` (any case), otherwise `Compact`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("OBJNAV_LOG_FORMAT").ok().as_deref())
    }
}

/// Install the global subscriber.
///
/// A subscriber installed earlier (e.g. by a test harness) is left in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("objnav")));
    let (json_layer, compact_layer) = match LogFormat::from_env() {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact())),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("[objnav] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the span exporter down (flushing pending spans) on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[objnav] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the exporter builds.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[objnav] OTLP exporter init failed: {e}"))
        .ok()?;
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    // The run loop is synchronous; the simple exporter needs no async runtime.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
