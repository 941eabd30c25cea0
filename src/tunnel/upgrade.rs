//! CONNECT handling: dial the destination, then take over the client
//! connection once the 200 response has gone out.
//!
//! hyper only hands over the raw connection after the response head has
//! been written, so [`Upgrader::prepare`] returns a [`PendingTunnel`] that
//! the dispatcher starts right before replying. Everything the client sends
//! after the blank line then belongs to the tunnel.
//!
//! The connection's [`ConnectionLease`] moves into the tunnel with the
//! socket, so a tunnel counts against `max_connections` and holds up the
//! shutdown drain just like any other client connection.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Request;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::net::ConnectionLease;
use crate::observability::Verbosity;
use crate::tunnel::relay::{relay_with_lease, RelayHandle};

/// Opens tunnels for CONNECT requests.
#[derive(Debug, Clone, Copy)]
pub struct Upgrader {
    connect_timeout: Duration,
    verbosity: Verbosity,
}

impl Upgrader {
    pub fn new(connect_timeout: Duration, verbosity: Verbosity) -> Self {
        Self {
            connect_timeout,
            verbosity,
        }
    }

    /// Dial `authority` and claim the client connection's upgrade handle.
    ///
    /// The destination is dialed first; when that fails the client gets a
    /// 503 and nothing is upgraded. When the transport cannot hand over the
    /// connection, the freshly dialed stream is closed before returning.
    pub async fn prepare<B>(
        &self,
        request: &mut Request<B>,
        authority: &str,
    ) -> Result<PendingTunnel, ProxyError> {
        let upstream = dial(authority, self.connect_timeout).await?;

        let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
            drop(upstream);
            tracing::warn!(authority, "Connection does not support upgrades");
            return Err(ProxyError::HijackUnsupported);
        };

        Ok(PendingTunnel {
            authority: authority.to_string(),
            on_upgrade,
            upstream,
            lease: request.extensions_mut().remove::<Arc<ConnectionLease>>(),
            verbosity: self.verbosity,
        })
    }
}

/// Open a TCP connection to `authority`, bounded by `timeout`.
pub async fn dial(authority: &str, timeout: Duration) -> Result<TcpStream, ProxyError> {
    match tokio::time::timeout(timeout, TcpStream::connect(authority)).await {
        Ok(Ok(stream)) => {
            // Tunnels carry interactive traffic such as TLS handshakes.
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::upstream(format!("dial tcp {authority}: {e}"))),
        Err(_) => Err(ProxyError::upstream(format!(
            "dial tcp {authority}: i/o timeout after {}s",
            timeout.as_secs()
        ))),
    }
}

/// A dialed destination waiting for the client connection to be released.
#[derive(Debug)]
pub struct PendingTunnel {
    authority: String,
    on_upgrade: OnUpgrade,
    upstream: TcpStream,
    lease: Option<Arc<ConnectionLease>>,
    verbosity: Verbosity,
}

impl PendingTunnel {
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Wait for the upgrade in the background and relay once it lands.
    ///
    /// If the upgrade never completes (client went away, connection was not
    /// served with upgrades) the upstream stream is dropped and closed.
    pub fn spawn(self) -> tokio::task::JoinHandle<Option<RelayHandle>> {
        tokio::spawn(async move {
            let PendingTunnel {
                authority,
                on_upgrade,
                upstream,
                lease,
                verbosity,
            } = self;

            match on_upgrade.await {
                Ok(upgraded) => {
                    tracing::debug!(authority = %authority, "Tunnel established");
                    Some(relay_with_lease(
                        TokioIo::new(upgraded),
                        upstream,
                        verbosity,
                        lease,
                    ))
                }
                Err(e) => {
                    tracing::warn!(authority = %authority, error = %e, "Upgrade failed");
                    None
                }
            }
        })
    }
}
