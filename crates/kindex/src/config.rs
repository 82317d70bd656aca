//! Process settings read from the environment

use std::env;

use kindex_mapping::KnownStatusConfig;

use crate::{Error, Result};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging and tracing settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// Output format, from `LOG_FORMAT`
    pub format: LogFormat,
    /// `EnvFilter` directives, from `LOG_LEVEL`
    pub filter: String,
    /// Whether spans are exported over OTLP, set by the presence of
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`
    pub otlp: bool,
}

/// Everything the daemon reads from its environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Address of the health and diagnostics server
    pub listen_addr: String,
    /// Logging and tracing
    pub telemetry: TelemetrySettings,
    /// Known-status vocabulary
    pub status: KnownStatusConfig,
}

impl Settings {
    /// Reads settings from the process environment
    ///
    /// # Errors
    ///
    /// Will return `Err` if `STATUS_STRICT` is set to something other than a boolean
    pub fn from_env() -> Result<Self> {
        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let telemetry = TelemetrySettings {
            format,
            filter: env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            otlp: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok(),
        };

        let mut status = KnownStatusConfig::default();
        if let Ok(precedence) = env::var("STATUS_PRECEDENCE") {
            status.precedence = precedence
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(unknown) = env::var("STATUS_UNKNOWN")
            && !unknown.trim().is_empty()
        {
            status.unknown = unknown.trim().to_string();
        }
        if let Ok(strict) = env::var("STATUS_STRICT") {
            status.strict = strict.trim().parse().map_err(|_| {
                Error::Message(format!("STATUS_STRICT must be true or false, got '{strict}'"))
            })?;
        }

        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            telemetry,
            status,
        })
    }
}
