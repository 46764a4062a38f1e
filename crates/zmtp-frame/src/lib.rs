//! ZMTP framing over a cooperative, non-blocking stream.
//!
//! Every frame on the wire is:
//! - a flags byte (`MORE`, `LARGE`, `COMMAND`)
//! - a 1-byte length, or an 8-byte big-endian length when `LARGE` is set
//! - the payload
//!
//! Messages, connections and every other protocol object live in
//! fixed-capacity [`Pool`]s. All stream I/O goes through the resumable
//! [`Connection::poll_send`] / [`Connection::poll_recv`] pair, which returns
//! `Poll::Pending` instead of blocking and picks up where it left off.

pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod pool;

pub use codec::{
    decode_frame, encode_frame, encode_header, header_len, message_flags, wire_flags,
    FrameConfig, FrameReceiver, FrameSender, DEFAULT_MAX_PAYLOAD, FLAG_COMMAND, FLAG_LARGE,
    FLAG_MORE, MAX_HEADER_SIZE, SHORT_FRAME_MAX,
};
pub use connection::{
    Connection, ConnectionPool, Direction, Transfer, INPUT_BUFFER_SIZE, MAX_CONNECTIONS,
};
pub use error::{FrameError, Result};
pub use message::{Message, MessagePool, Payload, Reclaimed, MAX_MESSAGES, MSG_COMMAND, MSG_MORE};
pub use pool::{Handle, Pool};
