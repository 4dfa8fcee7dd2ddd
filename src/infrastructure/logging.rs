//! Tracing setup for the process.

use tracing_subscriber::{fmt, EnvFilter};

/// Output format for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Initialize the global subscriber. The filter comes from `CAW_LOG` (or
/// `RUST_LOG`), defaulting to `info`. Safe to call once per process; later
/// calls are ignored.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_env("CAW_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(false);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
