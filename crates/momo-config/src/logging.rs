//! Tracing subscriber setup.
//!
//! Logs go to stderr; `RUST_LOG` wins over the configured directives.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::{ConfigError, Defaults};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

fn build_filter(directives: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directives).map_err(|e| ConfigError::Validation {
        field: "log_filter".into(),
        reason: format!("'{directives}': {e}"),
    })
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(directives: &str, format: LogFormat) -> Result<(), ConfigError> {
    let filter = build_filter(directives)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Pretty => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(?format, directives, "tracing initialized");
    }
    Ok(())
}

/// Install the subscriber described by the `[defaults]` table.
pub fn init_from(defaults: &Defaults) -> Result<(), ConfigError> {
    init(&defaults.log_filter, defaults.log_format)
}
