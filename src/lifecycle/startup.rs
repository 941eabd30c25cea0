//! Startup orchestration.
//!
//! Any error here is fatal: the binary prints it and exits non-zero.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::{Cli, ConfigError, ProxyConfig};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::tls::{self, TlsError};
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics, Verbosity};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Tls(#[from] TlsError),

    #[error("{0}")]
    Listener(#[from] ListenerError),

    #[error("Failed to start metrics exporter: {0}")]
    Metrics(String),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse flags, then run the proxy until shutdown.
pub async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = cli.into_config()?;
    let verbosity = Verbosity::new(config.verbose);
    logging::init_logging(&config.observability, verbosity);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        https = config.tls.enabled,
        verbose = config.verbose,
        "forward-proxy starting"
    );

    serve(config).await
}

/// Build every subsystem from a validated config and serve until a signal.
pub async fn serve(config: ProxyConfig) -> Result<(), StartupError> {
    let acceptor = tls::build_acceptor(&config.tls).await?;

    if let Some(addr) = &config.observability.metrics_address {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e: std::net::AddrParseError| StartupError::Metrics(e.to_string()))?;
        metrics::init_metrics(addr).map_err(|e| StartupError::Metrics(e.to_string()))?;
    }

    let listener = Listener::bind(&config.listener).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        scheme = if acceptor.is_some() { "https" } else { "http" },
        "Proxy listening"
    );

    let shutdown = Shutdown::new();
    let signal_task = shutdown.trigger_on_signal();

    let server = HttpServer::new(config).with_tls(acceptor);
    let result = server.run(listener, shutdown.subscribe()).await;

    signal_task.abort();
    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}
