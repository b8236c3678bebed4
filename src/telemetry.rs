//! Tracing subscriber setup for processes embedding the engine.
//!
//! Environment variables:
//! - `RUST_LOG`: filter directives (default: `pid_relations=info,sqlx=warn`)
//! - `LOG_FORMAT`: `json` for structured logs, `pretty` for development
//!   (default: `json`)

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "pid_relations=info,sqlx=warn";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl LogFormat {
    /// Read `LOG_FORMAT`; anything but `pretty` selects JSON.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(format) if format.eq_ignore_ascii_case("pretty") => Self::Pretty,
            _ => Self::Json,
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing() -> Result<(), TryInitError> {
    init_tracing_with(LogFormat::from_env())
}

/// Install the global subscriber with an explicit format.
pub fn init_tracing_with(format: LogFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Whichever test installs first wins; the second call must not panic.
        let _ = init_tracing_with(LogFormat::Pretty);
        assert!(init_tracing_with(LogFormat::Json).is_err());
    }
}
