//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! The filter comes from [`LoggingConfig::filter`], an `EnvFilter` directive
//! string such as `"info,assay_core=debug"`. Output is pretty or JSON per
//! [`LoggingConfig::format`].

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::RuntimeError;

/// Install the global tracing subscriber.
///
/// # Errors
///
/// [`RuntimeError::Telemetry`] when the filter doesn't parse or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), RuntimeError> {
    let filter =
        EnvFilter::try_new(&config.filter).map_err(|e| RuntimeError::Telemetry(e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| RuntimeError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig {
            filter: "info,assay_core=notalevel".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(
            init_tracing(&config),
            Err(RuntimeError::Telemetry(_))
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig {
            filter: "warn".to_string(),
            format: LogFormat::Json,
        };
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
