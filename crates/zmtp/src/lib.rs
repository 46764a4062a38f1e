//! Minimal cooperative ZMTP 3.0 core.
//!
//! zmtp speaks the ZeroMQ wire protocol (greeting, NULL-mechanism READY
//! handshake, framing) on top of any non-blocking byte stream, with every
//! protocol object held in a fixed-capacity pool.
//!
//! # Crate Structure
//!
//! - [`transport`]: Stream contract, TCP and in-memory transports
//! - [`frame`]: Pools, messages, resumable partial I/O and the frame codec
//! - [`peer`]: Greeting, handshake, channels and the owning context (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use zmtp_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use zmtp_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use zmtp_peer::*;
}
