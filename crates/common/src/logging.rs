use crate::config::{Environment, LogLevel};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::Layered, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (falls back to `log_level`).
///
/// Also adds an OpenTelemetry layer that exports traces if a global tracer provider
/// has been initialized (e.g. via common::TelemetryGuard).
pub fn setup_logging(log_level: LogLevel, environment: Environment) {
    install_subscriber(log_level, environment, tracing_opentelemetry::layer());
}

/// `RUST_LOG` wins over the configured level.
pub(crate) fn env_filter(log_level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()))
}

pub(crate) fn install_subscriber<L>(log_level: LogLevel, environment: Environment, otel_layer: L)
where
    L: Layer<Layered<EnvFilter, Registry>> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(otel_layer);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back_to_configured_level() {
        // RUST_LOG is not set under `cargo test` unless the caller exports it.
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter(LogLevel::Warn);
        assert_eq!(filter.to_string(), "warn");
    }
}
