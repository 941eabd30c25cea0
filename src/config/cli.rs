//! Command-line flags.
//!
//! Flags override whatever the defaults or the `--config` file set.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{read_config, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::config::validation::validate_config;

#[derive(Debug, Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP/HTTPS proxy with CONNECT tunneling", long_about = None)]
pub struct Cli {
    /// Increase verbosity
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Port to listen on (all interfaces)
    #[arg(long)]
    pub port: Option<u16>,

    /// Use HTTPS for the proxy listener
    #[arg(long)]
    pub https: bool,

    /// Path to TLS certificate. Without one, `--https` generates a
    /// self-signed certificate and saves it to cert.pem
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Path to TLS private key
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum concurrent client connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Build the effective configuration: file (or defaults), then flags.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ProxyConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply(self, config: &mut ProxyConfig) {
        if self.verbose {
            config.verbose = true;
        }
        if let Some(port) = self.port {
            config.listener.bind_address = format!("0.0.0.0:{}", port);
        }
        if self.https {
            config.tls.enabled = true;
        }
        // A lone cert or key means "generate"; only a full pair is loaded.
        if let (Some(cert), Some(key)) = (self.cert, self.key) {
            config.tls.cert_path = Some(cert);
            config.tls.key_path = Some(key);
        }
        if let Some(max) = self.max_connections {
            config.listener.max_connections = max;
        }
        if let Some(addr) = self.metrics_address {
            config.observability.metrics_address = Some(addr);
        }
    }
}
