//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, verbosity gate)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging through `tracing` everywhere
//! - Per-request diagnostics only when verbose
//! - Metrics are cheap no-ops until an exporter is installed

pub mod logging;
pub mod metrics;

pub use logging::Verbosity;
