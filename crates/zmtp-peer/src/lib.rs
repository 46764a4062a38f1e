//! ZMTP 3.0 peers over a cooperative, non-blocking transport.
//!
//! A [`Context`] owns the transport and every pool. Channels are bound to a
//! connection with [`Context::connect`] or [`Context::listen`], complete the
//! greeting and READY exchange with [`Context::poll_handshake`], and then
//! exchange frames with [`Context::poll_send`] / [`Context::poll_recv`].
//! Nothing blocks: every `poll_*` call returns `Poll::Pending` when the
//! transport cannot move more bytes, and resumes where it stopped.

pub mod channel;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod greeting;
pub mod handshake;

pub use channel::{Channel, ChannelPool, MAX_CHANNELS};
pub use context::{ChannelHandle, Context, PoolUsage};
pub use endpoint::{Endpoint, EndpointPool, MAX_ENDPOINTS};
pub use error::{PeerError, Result};
pub use greeting::{
    Greeting, GREETING_SIZE, MECHANISM_SIZE, NULL_MECHANISM, SIGNATURE, SIGNATURE_SIZE,
    VERSION_MAJOR, VERSION_MINOR,
};
pub use handshake::{command_name, Handshake, HandshakeConfig, HandshakeState, READY_COMMAND};
