use std::fmt;

use zmtp_frame::{Connection, FrameConfig, FrameReceiver, FrameSender, Handle, Pool};

use crate::greeting::Greeting;
use crate::handshake::{Handshake, HandshakeState};

/// Number of channels that may be alive at once.
pub const MAX_CHANNELS: usize = 10;

pub type ChannelPool<S> = Pool<Channel<S>, MAX_CHANNELS>;

/// A bound connection plus the protocol state that travels with it.
pub(crate) struct Link<S> {
    pub(crate) conn: Handle<Connection<S>>,
    pub(crate) handshake: Handshake,
    pub(crate) sender: FrameSender,
    pub(crate) receiver: FrameReceiver,
}

impl<S> Link<S> {
    pub(crate) fn new(conn: Handle<Connection<S>>, handshake: Handshake, frame: FrameConfig) -> Self {
        Self {
            conn,
            handshake,
            sender: FrameSender::new(),
            receiver: FrameReceiver::new(frame),
        }
    }
}

/// Application-facing endpoint of the protocol.
///
/// A channel is bound to at most one connection. Every new connection starts
/// with a fresh handshake, and application frames are refused until it is
/// established.
pub struct Channel<S> {
    link: Option<Link<S>>,
}

impl<S> Default for Channel<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Channel<S> {
    pub fn new() -> Self {
        Self { link: None }
    }

    pub fn is_bound(&self) -> bool {
        self.link.is_some()
    }

    pub fn connection(&self) -> Option<&Handle<Connection<S>>> {
        self.link.as_ref().map(|link| &link.conn)
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.link.as_ref().map(|link| &link.handshake)
    }

    pub fn handshake_state(&self) -> Option<HandshakeState> {
        self.handshake().map(Handshake::state)
    }

    pub fn is_established(&self) -> bool {
        self.handshake().is_some_and(Handshake::is_established)
    }

    pub fn peer_greeting(&self) -> Option<&Greeting> {
        self.handshake().and_then(Handshake::peer_greeting)
    }

    /// Attach `link`, or hand it back if the channel is already bound.
    pub(crate) fn bind(&mut self, link: Link<S>) -> std::result::Result<(), Link<S>> {
        if self.link.is_some() {
            return Err(link);
        }
        self.link = Some(link);
        Ok(())
    }

    pub(crate) fn unbind(&mut self) -> Option<Link<S>> {
        self.link.take()
    }

    pub(crate) fn link_mut(&mut self) -> Option<&mut Link<S>> {
        self.link.as_mut()
    }
}

impl<S> fmt::Debug for Channel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("connection", &self.connection())
            .field("handshake", &self.handshake_state())
            .finish()
    }
}
