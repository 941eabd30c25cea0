//! Forward HTTP/HTTPS proxy library.
//!
//! Plain requests are re-issued against their absolute-form target and the
//! response streamed back; CONNECT requests become raw byte tunnels.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod tunnel;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
