//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Carry the verbosity flag to the components that consult it
//!
//! # Design Decisions
//! - `RUST_LOG` always wins over the computed default filter
//! - JSON format for machine parsing, pretty format for terminals
//! - Verbosity is a plain `Copy` value fixed at startup; nothing mutates it

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Whether per-request diagnostics are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verbosity(bool);

impl Verbosity {
    pub const QUIET: Self = Self(false);
    pub const VERBOSE: Self = Self(true);

    pub fn new(verbose: bool) -> Self {
        Self(verbose)
    }

    pub fn is_verbose(self) -> bool {
        self.0
    }
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        Self(verbose)
    }
}

/// Log `$($arg)*` at info level, but only when `$verbosity` is verbose.
#[macro_export]
macro_rules! verbose_info {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity.is_verbose() {
            ::tracing::info!($($arg)*);
        }
    };
}

/// Default filter directive when `RUST_LOG` is not set.
pub fn default_directive(verbosity: Verbosity) -> String {
    let level = if verbosity.is_verbose() { "debug" } else { "info" };
    format!("forward_proxy={level},tower_http={level}")
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig, verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(verbosity).into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
