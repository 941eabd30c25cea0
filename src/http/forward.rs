//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Re-issue the client's request against its absolute-form target
//! - Rebuild the origin's response: status, every header, streamed body
//! - Map transport failures to 503 with the error text as body
//!
//! # Design Decisions
//! - Connection reuse is left to the hyper-util pooled client
//! - The body is never buffered; stream errors are logged, not escalated
//! - Dropping the origin response releases its connection on every path

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, Request, Response},
};
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::ProxyError;
use crate::observability::Verbosity;

/// Pooled client used as the forwarding transport.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build the shared forwarding client.
pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);

    Client::builder(TokioExecutor::new())
        .http1_preserve_header_case(true)
        .build(connector)
}

/// Append every header of `src` to `dst`.
///
/// Multi-valued headers keep all their values, in order.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

/// Render an error with its whole source chain, `outer: inner: root`.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

/// Forwards non-CONNECT requests to their origin.
#[derive(Clone)]
pub struct Forwarder {
    client: HttpClient,
    verbosity: Verbosity,
}

impl Forwarder {
    pub fn new(client: HttpClient, verbosity: Verbosity) -> Self {
        Self { client, verbosity }
    }

    /// Send `request` to its target and stream the answer back.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let target = request.uri().to_string();

        let upstream = self
            .client
            .request(request)
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(error_chain(&e)))?;

        let (parts, body) = upstream.into_parts();

        let verbosity = self.verbosity;
        let body = body.map_err(move |e| {
            let err = ProxyError::ResponseStream(e.to_string());
            crate::verbose_info!(verbosity, target = %target, error = %err, "Response body stream failed");
            e
        });

        let mut response = Response::new(Body::new(body));
        *response.status_mut() = parts.status;
        copy_headers(response.headers_mut(), &parts.headers);
        // Carries the origin's header casing through to the client.
        *response.extensions_mut() = parts.extensions;

        Ok(response)
    }
}
