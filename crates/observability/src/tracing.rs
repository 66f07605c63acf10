//! Tracing/logging initialization.
//!
//! Request and job context (request id, job id, correlation id) travels in
//! `tracing` spans, so every event logged inside a span carries those fields.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Log output settings, usually sourced from `LOG_LEVEL` / `LOG_JSON_FORMAT`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json: false,
        }
    }
}

impl LogSettings {
    /// Filter directive derived from the configured level (`RUST_LOG` wins).
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(normalize_level(&self.level)))
    }
}

fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(settings: &LogSettings) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(settings.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = if settings.json {
        builder.json().with_current_span(true).with_span_list(true).try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_style_levels_are_accepted() {
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("INFO"), "info");
        assert_eq!(normalize_level("critical"), "error");
        assert_eq!(normalize_level(""), "info");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(&LogSettings::default());
        init(&LogSettings { level: "debug".into(), json: true });
    }
}
