//! Per-request entry point.
//!
//! CONNECT requests become tunnels; every other method is forwarded as a
//! plain HTTP request. No other method is special-cased.

use std::time::Instant;

use axum::{
    body::Body,
    http::{header::HOST, Method, Request, Response, StatusCode},
    response::IntoResponse,
};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::forward::{build_client, Forwarder};
use crate::observability::{metrics, Verbosity};
use crate::tunnel::Upgrader;

/// Routes each request to the forwarder or the tunnel upgrader.
#[derive(Clone)]
pub struct Dispatcher {
    forwarder: Forwarder,
    upgrader: Upgrader,
    verbosity: Verbosity,
}

impl Dispatcher {
    pub fn new(forwarder: Forwarder, upgrader: Upgrader, verbosity: Verbosity) -> Self {
        Self {
            forwarder,
            upgrader,
            verbosity,
        }
    }

    /// Wire up the forwarding client and upgrader from configuration.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let verbosity = Verbosity::new(config.verbose);
        let connect_timeout = config.timeouts.connect();
        Self::new(
            Forwarder::new(build_client(connect_timeout), verbosity),
            Upgrader::new(connect_timeout, verbosity),
            verbosity,
        )
    }

    /// Handle one request. Never fails: errors become responses.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();

        if request.method() == Method::CONNECT {
            let response = self.tunnel(request).await;
            metrics::record_request("connect", response.status().as_u16(), start);
            response
        } else {
            let response = self.forward(request).await;
            metrics::record_request("http", response.status().as_u16(), start);
            response
        }
    }

    async fn tunnel(&self, mut request: Request<Body>) -> Response<Body> {
        let Some(authority) = connect_target(&request) else {
            return ProxyError::upstream("CONNECT request has no host:port target").into_response();
        };

        match self.upgrader.prepare(&mut request, &authority).await {
            Ok(pending) => {
                crate::verbose_info!(
                    self.verbosity,
                    target = %pending.authority(),
                    "Handling CONNECT request for {}",
                    pending.authority()
                );
                // The relay starts once hyper has flushed the 200 below.
                pending.spawn();
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::OK;
                response
            }
            Err(e) => {
                crate::verbose_info!(self.verbosity, target = %authority, error = %e, "CONNECT failed");
                e.into_response()
            }
        }
    }

    async fn forward(&self, request: Request<Body>) -> Response<Body> {
        crate::verbose_info!(
            self.verbosity,
            method = %request.method(),
            target = %request.uri(),
            "Handling HTTP request for {}",
            request.uri()
        );

        match self.forwarder.forward(request).await {
            Ok(response) => response,
            Err(e) => {
                crate::verbose_info!(self.verbosity, error = %e, "Forwarding failed");
                e.into_response()
            }
        }
    }
}

/// `host:port` a CONNECT request asks for: the request-target, falling back
/// to the Host header.
pub fn connect_target<B>(request: &Request<B>) -> Option<String> {
    request
        .uri()
        .authority()
        .map(|authority| authority.to_string())
        .or_else(|| {
            request
                .headers()
                .get(HOST)
                .and_then(|host| host.to_str().ok())
                .filter(|host| !host.is_empty())
                .map(str::to_string)
        })
}
