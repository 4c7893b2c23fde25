use crate::config::Config;
use common::TelemetryGuard;

pub const SERVICE_NAME: &str = "toonout";

/// Installs the tracing subscriber. With an OTLP endpoint configured the
/// returned guard must stay alive until shutdown so spans and metrics flush.
pub fn setup_logging(config: &Config) -> anyhow::Result<Option<TelemetryGuard>> {
    match config.otel_endpoint.as_deref().filter(|e| !e.is_empty()) {
        Some(endpoint) => Ok(Some(TelemetryGuard::init(
            SERVICE_NAME,
            endpoint,
            config.log_level,
            config.environment,
        )?)),
        None => {
            common::setup_logging(config.log_level, config.environment);
            Ok(None)
        }
    }
}
