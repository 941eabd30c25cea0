//! Error taxonomy for request handling.
//!
//! Every variant is handled inside the per-request task. None of them
//! terminate the listener; only `lifecycle::startup` errors are fatal.

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors that can occur while dispatching a single proxied request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Dialing the destination or obtaining a response from it failed.
    ///
    /// Carries the underlying error text, which becomes the response body.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// The transport cannot hand over the raw client connection.
    #[error("Hijacking not supported")]
    HijackUnsupported,

    /// Byte copy inside an established tunnel failed.
    #[error("Error while transferring data: {0}")]
    RelayIo(#[from] std::io::Error),

    /// Streaming a forwarded response body failed part way.
    #[error("Error while copying response body: {0}")]
    ResponseStream(String),
}

impl ProxyError {
    /// Build an `UpstreamUnavailable` from any displayable error.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }

    /// Status code reported to the client for this error.
    ///
    /// Relay and stream errors never reach a response in practice: by the
    /// time they happen the status line has already been written.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::RelayIo(_) | ProxyError::ResponseStream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = Response::new(Body::from(self.to_string()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.headers_mut().insert(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            axum::http::HeaderValue::from_static("nosniff"),
        );
        response
    }
}
