//! Structured logging initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable (development).
    Pretty,
    /// One JSON object per line (log aggregation).
    Json,
}

impl LogFormat {
    /// Parse a format name; anything but `json` is pretty.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `necho` crates log at `level` and
/// request traces from `tower_http` at debug.
///
/// ```rust,no_run
/// use necho_node::observability::{init_logging, LogFormat};
///
/// init_logging("info", LogFormat::Json);
/// ```
pub fn init_logging(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "necho={level},necho_node={level},necho_realtime={level},tower_http=debug",
            level = level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }

    tracing::info!(level = %level, format = ?format, "Logging initialized");
}
