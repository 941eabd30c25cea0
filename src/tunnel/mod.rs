//! CONNECT tunneling subsystem.
//!
//! # Data Flow
//! ```text
//! CONNECT host:port
//!     → upgrade.rs (dial destination with timeout, claim upgrade handle)
//!     → 200 written by the HTTP layer
//!     → upgrade.rs (await raw client connection)
//!     → relay.rs (two copy tasks until either side closes)
//! ```
//!
//! # Design Decisions
//! - No HTTP framing touches a connection after it has been upgraded
//! - Either direction finishing closes both streams
//! - Only the dial is time-bounded; established tunnels live until closed

pub mod relay;
pub mod upgrade;

pub use relay::{relay, CloseSignal, Direction, PipeOutcome, RelayHandle};
pub use upgrade::{dial, PendingTunnel, Upgrader};
