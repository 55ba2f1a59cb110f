//! Tracing/logging initialization.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_VAR: &str = "CLASSHUB_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event; what log shippers expect.
    #[default]
    Json,
    /// Multi-line human-readable output for local runs.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = LogConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(LogConfigError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogConfigError {
    #[error("unknown log format '{0}' (expected 'json' or 'pretty')")]
    UnknownFormat(String),

    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Explicit filter directives. `None` falls back to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
}

impl LogConfig {
    /// Read `CLASSHUB_LOG_FORMAT`; the filter stays with `RUST_LOG`.
    pub fn from_env() -> Result<Self, LogConfigError> {
        let format = match std::env::var(LOG_FORMAT_VAR) {
            Ok(raw) => raw.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self { format, filter: None })
    }

    fn env_filter(&self) -> Result<EnvFilter, LogConfigError> {
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives).map_err(|e| LogConfigError::InvalidFilter {
                filter: directives.clone(),
                reason: e.to_string(),
            }),
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    // The default config has no explicit filter, so it cannot fail.
    let _ = init_with(&LogConfig::default());
}

/// Initialize with an explicit config. Only the filter can be rejected; an
/// already-installed global subscriber is left in place.
pub fn init_with(config: &LogConfig) -> Result<(), LogConfigError> {
    let filter = config.env_filter()?;

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .with_target(true)
            .try_init(),
    };
    if installed.is_ok() {
        ::tracing::debug!(format = ?config.format, filter = ?config.filter, "logging initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(
            "xml".parse::<LogFormat>().unwrap_err(),
            LogConfigError::UnknownFormat("xml".to_string())
        );
    }

    #[test]
    fn rejects_invalid_filter() {
        let config = LogConfig {
            format: LogFormat::Pretty,
            filter: Some("classhub=notalevel".to_string()),
        };
        assert!(matches!(init_with(&config), Err(LogConfigError::InvalidFilter { .. })));
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        let config = LogConfig {
            format: LogFormat::Pretty,
            filter: Some("debug".to_string()),
        };
        assert!(init_with(&config).is_ok());
    }
}
