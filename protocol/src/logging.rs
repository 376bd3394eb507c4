//! # Structured Logging
//!
//! Installs the `tracing` subscriber used by embedders of the pool: pretty
//! output for local runs, JSON lines for log aggregation, and `RUST_LOG`
//! filtering on top of a default level.
//!
//! Vault and strategy operations log with structured fields (holder,
//! amount, shares, price-per-share) under the `granary_contracts` target,
//! so `RUST_LOG=granary_contracts=info` yields an audit trail of every
//! deposit, withdrawal, harvest and state change.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses "json" or "pretty" (case-insensitive). Anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `default_level` when set. Returns `false` if a
/// subscriber was already installed (e.g. by an earlier test), in which
/// case nothing changes.
pub fn init_logging(default_level: &str, format: LogFormat) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(?format, "logging initialized");
    }
    installed
}
