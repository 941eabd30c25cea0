//! Forward HTTP/HTTPS proxy.
//!
//! ```text
//!   client ──▶ listener ──▶ (TLS) ──▶ hyper HTTP/1.1 ──▶ dispatcher
//!                                                          │
//!                      ┌───────────────────────────────────┴──────────┐
//!                      ▼                                              ▼
//!             CONNECT host:port                              GET http://… etc.
//!        dial → 200 → upgrade → relay                 pooled client → stream back
//! ```

use clap::Parser;

use forward_proxy::config::Cli;
use forward_proxy::lifecycle::startup;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = startup::run(cli).await {
        tracing::error!(error = %e, "Fatal error");
        eprintln!("forward-proxy: {e}");
        std::process::exit(1);
    }
}
