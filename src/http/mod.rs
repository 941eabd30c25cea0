//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper HTTP/1.1 with upgrades, trace layer)
//!     → dispatch.rs (CONNECT vs. everything else)
//!         → forward.rs (pooled client, headers copied, body streamed)
//!         → tunnel::upgrade (dial, 200, raw socket) → tunnel::relay
//!     → Send to client
//! ```

pub mod dispatch;
pub mod forward;
pub mod server;

pub use dispatch::Dispatcher;
pub use forward::{copy_headers, Forwarder};
pub use server::HttpServer;
