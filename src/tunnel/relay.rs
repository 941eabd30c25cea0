//! Bidirectional byte relay for established tunnels.
//!
//! Two tasks run per tunnel, one per direction. Each copies until its
//! source ends or either side errors, then fires the shared [`CloseSignal`]
//! and shuts down its destination. The other direction is blocked in a
//! read it can no longer complete on its own, so it watches the signal and
//! bails out as soon as it fires. Once both tasks return, every stream half
//! has been dropped and both connections are closed.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ProxyError;
use crate::net::ConnectionLease;
use crate::observability::{metrics, Verbosity};

/// Idempotent close flag shared by both directions of a tunnel.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the tunnel closed. Returns `true` only for the first caller;
    /// later calls are no-ops.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Which way bytes flow, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to destination.
    Upstream,
    /// Destination to client.
    Downstream,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// How one direction of a relay ended.
#[derive(Debug)]
pub enum PipeOutcome {
    /// Source reached end-of-stream after this many bytes.
    Finished(u64),
    /// The other direction closed the tunnel first.
    Closed,
    /// Reading or writing failed.
    Failed(ProxyError),
}

/// Join handles for both directions of a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    pub upstream: JoinHandle<PipeOutcome>,
    pub downstream: JoinHandle<PipeOutcome>,
    close: CloseSignal,
}

impl RelayHandle {
    /// Close both streams from outside the relay.
    pub fn close(&self) -> bool {
        self.close.close()
    }

    /// Wait for both directions to finish.
    pub async fn join(self) -> (PipeOutcome, PipeOutcome) {
        let (up, down) = tokio::join!(self.upstream, self.downstream);
        (flatten(up), flatten(down))
    }
}

fn flatten(joined: Result<PipeOutcome, tokio::task::JoinError>) -> PipeOutcome {
    joined.unwrap_or_else(|e| {
        PipeOutcome::Failed(ProxyError::RelayIo(std::io::Error::new(
            std::io::ErrorKind::Other,
            e,
        )))
    })
}

/// Splice `client` and `upstream` together until either side goes away.
///
/// Errors are logged when verbose and never propagated; the streams simply
/// close.
pub fn relay<C, U>(client: C, upstream: U, verbosity: Verbosity) -> RelayHandle
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    relay_with_lease(client, upstream, verbosity, None)
}

/// Like [`relay`], but keeps the client connection's `lease` until both
/// directions have finished.
pub fn relay_with_lease<C, U>(
    client: C,
    upstream: U,
    verbosity: Verbosity,
    lease: Option<Arc<ConnectionLease>>,
) -> RelayHandle
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);
    let close = CloseSignal::new();

    metrics::tunnel_opened();
    let tunnel_guard = Arc::new(TunnelGauge { _lease: lease });

    let upstream = tokio::spawn(pipe(
        client_read,
        upstream_write,
        close.clone(),
        Direction::Upstream,
        verbosity,
        Arc::clone(&tunnel_guard),
    ));
    let downstream = tokio::spawn(pipe(
        upstream_read,
        client_write,
        close.clone(),
        Direction::Downstream,
        verbosity,
        tunnel_guard,
    ));

    RelayHandle {
        upstream,
        downstream,
        close,
    }
}

/// Decrements the active tunnel gauge when the last direction finishes, and
/// releases the connection lease with it.
struct TunnelGauge {
    _lease: Option<Arc<ConnectionLease>>,
}

impl Drop for TunnelGauge {
    fn drop(&mut self) {
        metrics::tunnel_closed();
    }
}

async fn pipe<R, W>(
    mut source: R,
    mut destination: W,
    close: CloseSignal,
    direction: Direction,
    verbosity: Verbosity,
    _gauge: Arc<TunnelGauge>,
) -> PipeOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = tokio::select! {
        result = tokio::io::copy(&mut source, &mut destination) => match result {
            Ok(bytes) => PipeOutcome::Finished(bytes),
            Err(e) => PipeOutcome::Failed(ProxyError::RelayIo(e)),
        },
        _ = close.closed() => PipeOutcome::Closed,
    };

    // Signal first: a stalled shutdown must not keep the other side waiting.
    close.close();
    // Shutting down an already closed stream only yields an error we ignore.
    let _ = destination.shutdown().await;
    drop(source);

    match &outcome {
        PipeOutcome::Finished(bytes) => {
            metrics::record_tunnel_bytes(direction.as_str(), *bytes);
            tracing::trace!(direction = direction.as_str(), bytes, "Relay direction finished");
        }
        PipeOutcome::Failed(e) => {
            crate::verbose_info!(
                verbosity,
                direction = direction.as_str(),
                "{}",
                e
            );
        }
        PipeOutcome::Closed => {
            tracing::trace!(direction = direction.as_str(), "Relay direction closed by peer");
        }
    }

    outcome
}
