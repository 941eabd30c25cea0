//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Optional TLS handshake per connection
//! - Serve HTTP/1.1 with upgrades enabled so CONNECT can take the socket
//! - Hand every request to the dispatcher
//! - Stop accepting on shutdown and drain in-flight connections
//!
//! Each connection runs on its own task, so a failure (or panic) while
//! serving one never reaches the accept loop or other connections.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use hyper::{body::Incoming, server::conn::http1, Request};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::dispatch::Dispatcher;
use crate::net::{ConnectionLease, ConnectionPermit, ConnectionTracker, Listener};

/// HTTP front end of the forward proxy.
pub struct HttpServer {
    config: ProxyConfig,
    dispatcher: Dispatcher,
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a plain-HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let dispatcher = Dispatcher::from_config(&config);
        Self {
            config,
            dispatcher,
            tls: None,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Terminate TLS on accepted connections with `acceptor`.
    pub fn with_tls(mut self, acceptor: Option<TlsAcceptor>) -> Self {
        self.tls = acceptor;
        self
    }

    /// Live connection tracker, shared with every connection task.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the accept loop until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = self.tls.is_some(),
            "HTTP server starting"
        );

        let (drain_tx, drain_rx) = watch::channel(false);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        self.spawn_connection(stream, peer, permit, drain_rx.clone());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        // Typically fd exhaustion; give it a moment to clear.
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                },
            }
        }

        drop(listener);
        drain_tx.send_replace(true);

        let grace = self.config.timeouts.shutdown_grace();
        if self.tracker.wait_for_drain(grace).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Drain deadline passed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        drain: watch::Receiver<bool>,
    ) {
        let lease = Arc::new(ConnectionLease::new(permit, self.tracker.track()));
        let span = tracing::debug_span!("connection", id = %lease.id(), peer = %peer);
        let dispatcher = self.dispatcher.clone();
        let tls = self.tls.clone();

        tokio::spawn(
            async move {
                let _ = stream.set_nodelay(true);

                match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            serve_connection(tls_stream, dispatcher, lease, drain).await
                        }
                        Err(e) => tracing::debug!(error = %e, "TLS handshake failed"),
                    },
                    None => serve_connection(stream, dispatcher, lease, drain).await,
                }
            }
            .instrument(span),
        );
    }
}

/// Serve HTTP/1.1 on one client connection until it closes or is upgraded.
///
/// Every request carries a clone of `lease` in its extensions; a tunnel that
/// takes the socket over keeps it until the relay finishes.
pub async fn serve_connection<I>(
    io: I,
    dispatcher: Dispatcher,
    lease: Arc<ConnectionLease>,
    mut drain: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .service_fn(move |mut request: Request<Incoming>| {
            let dispatcher = dispatcher.clone();
            request.extensions_mut().insert(Arc::clone(&lease));
            async move { Ok::<_, Infallible>(dispatcher.dispatch(request.map(Body::new)).await) }
        });

    let mut builder = http1::Builder::new();
    builder.preserve_header_case(true).title_case_headers(true);

    let connection = builder
        .serve_connection(TokioIo::new(io), TowerToHyperService::new(service))
        .with_upgrades();
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = draining(&mut drain) => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Connection ended with error");
    }
}

/// Resolve once the server starts draining, or once the server is gone.
///
/// The borrowed value is released here so nothing holds the channel's read
/// lock while the connection finishes.
async fn draining(drain: &mut watch::Receiver<bool>) {
    let _ = drain.wait_for(|draining| *draining).await;
}
