//! ZMTP 3.0 greeting exchange and READY negotiation.
//!
//! [`Handshake`] is a resumable state machine. Each state is one or more
//! exact-length transfers through the connection's partial I/O engine, so
//! [`Handshake::poll`] can return `Pending` in the middle of any state and
//! pick up at the same byte on the next call.

use std::fmt;
use std::task::{ready, Poll};

use tracing::{debug, warn};
use zmtp_frame::{
    Connection, FrameConfig, FrameError, FrameReceiver, FrameSender, Handle, Message,
    MessagePool, MSG_COMMAND,
};
use zmtp_transport::Stream;

use crate::error::{PeerError, Result};
use crate::greeting::{
    Greeting, GREETING_SIZE, MAJOR_OFFSET, MINOR_OFFSET, NULL_MECHANISM, SIGNATURE,
    SIGNATURE_SIZE, VERSION_MAJOR, VERSION_MINOR,
};

/// Body of the READY command: length-prefixed command name.
pub static READY_COMMAND: &[u8] = b"\x05READY";

const READY_NAME: &[u8] = b"READY";

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Value of the as-server byte in the local greeting.
    pub as_server: bool,
    /// Local major version. The peer must advertise the same one.
    pub major: u8,
    /// Local minor version. Not checked on the peer side.
    pub minor: u8,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            as_server: false,
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    SendSignature,
    /// Fails unless the byte is `0xFF`.
    RecvSignatureByte0,
    /// Fails unless bit 0 of the final signature byte is set.
    RecvSignatureRest,
    /// Send the local major version, then read the peer's.
    ExchangeMajorVersion { sent: bool },
    SendRestOfGreeting,
    RecvRestOfGreeting,
    SendReady,
    RecvReady,
    Established,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Established | Self::Failed)
    }
}

/// Per-connection handshake negotiator.
pub struct Handshake {
    state: HandshakeState,
    config: HandshakeConfig,
    local: Greeting,
    incoming: [u8; GREETING_SIZE],
    peer: Option<Greeting>,
    ready: Option<Handle<Message>>,
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            state: HandshakeState::SendSignature,
            local: Greeting::new(config.major, config.minor, config.as_server),
            config,
            incoming: [0; GREETING_SIZE],
            peer: None,
            ready: None,
            sender: FrameSender::new(),
            receiver: FrameReceiver::default(),
        }
    }

    /// Use `frame` when decoding the peer's READY command.
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.receiver = FrameReceiver::new(frame);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    pub fn is_failed(&self) -> bool {
        self.state == HandshakeState::Failed
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn local_greeting(&self) -> &Greeting {
        &self.local
    }

    /// The peer's greeting, once it has been fully received and accepted.
    pub fn peer_greeting(&self) -> Option<&Greeting> {
        self.peer.as_ref()
    }

    /// Run the negotiation as far as the transport allows.
    ///
    /// Returns `Ready(Ok(()))` once established. Any I/O or validation
    /// failure moves to [`HandshakeState::Failed`]; the connection must then
    /// be closed and discarded.
    pub fn poll<S: Stream>(
        &mut self,
        conn: &mut Connection<S>,
        messages: &mut MessagePool,
    ) -> Poll<Result<()>> {
        loop {
            match self.state {
                HandshakeState::Established => return Poll::Ready(Ok(())),
                HandshakeState::Failed => return Poll::Ready(Err(PeerError::HandshakeFailed)),
                _ => {}
            }

            match ready!(self.step(conn, messages)) {
                Ok(next) => {
                    debug!(from = ?self.state, to = ?next, "handshake step");
                    self.state = next;
                    if next == HandshakeState::Established {
                        debug!(peer = ?self.peer, "handshake established");
                    }
                }
                Err(err) => {
                    debug!(state = ?self.state, error = %err, "handshake failed");
                    if let Err(release_err) = self.release(messages) {
                        warn!(error = %release_err, "failed to release READY message");
                    }
                    self.state = HandshakeState::Failed;
                    return Poll::Ready(Err(err));
                }
            }
        }
    }

    /// Destroy the outgoing READY message if a send was left unfinished.
    pub fn release(&mut self, messages: &mut MessagePool) -> Result<()> {
        if let Some(handle) = self.ready.take() {
            Message::destroy(messages, handle)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn hold_ready(&mut self, handle: Handle<Message>) {
        self.ready = Some(handle);
    }

    fn step<S: Stream>(
        &mut self,
        conn: &mut Connection<S>,
        messages: &mut MessagePool,
    ) -> Poll<Result<HandshakeState>> {
        let next = match self.state {
            HandshakeState::SendSignature => {
                ready!(conn.poll_send(&self.local.as_bytes()[..SIGNATURE_SIZE]))?;
                HandshakeState::RecvSignatureByte0
            }
            HandshakeState::RecvSignatureByte0 => {
                ready!(conn.poll_recv(&mut self.incoming[..1]))?;
                if self.incoming[0] != SIGNATURE[0] {
                    return Poll::Ready(Err(violation(format!(
                        "signature starts with {:#04x}, expected 0xff",
                        self.incoming[0]
                    ))));
                }
                HandshakeState::RecvSignatureRest
            }
            HandshakeState::RecvSignatureRest => {
                ready!(conn.poll_recv(&mut self.incoming[1..SIGNATURE_SIZE]))?;
                if self.incoming[SIGNATURE_SIZE - 1] & 0x01 == 0 {
                    return Poll::Ready(Err(violation(format!(
                        "signature ends with {:#04x}, bit 0 must be set",
                        self.incoming[SIGNATURE_SIZE - 1]
                    ))));
                }
                HandshakeState::ExchangeMajorVersion { sent: false }
            }
            HandshakeState::ExchangeMajorVersion { sent: false } => {
                ready!(conn.poll_send(&self.local.as_bytes()[MAJOR_OFFSET..MINOR_OFFSET]))?;
                HandshakeState::ExchangeMajorVersion { sent: true }
            }
            HandshakeState::ExchangeMajorVersion { sent: true } => {
                ready!(conn.poll_recv(&mut self.incoming[MAJOR_OFFSET..MINOR_OFFSET]))?;
                let major = self.incoming[MAJOR_OFFSET];
                if major != self.config.major {
                    return Poll::Ready(Err(violation(format!(
                        "peer major version {major}, expected {}",
                        self.config.major
                    ))));
                }
                HandshakeState::SendRestOfGreeting
            }
            HandshakeState::SendRestOfGreeting => {
                ready!(conn.poll_send(&self.local.as_bytes()[MINOR_OFFSET..]))?;
                HandshakeState::RecvRestOfGreeting
            }
            HandshakeState::RecvRestOfGreeting => {
                ready!(conn.poll_recv(&mut self.incoming[MINOR_OFFSET..]))?;
                let peer = Greeting::from_bytes(self.incoming);
                if peer.mechanism() != NULL_MECHANISM {
                    return Poll::Ready(Err(violation(format!(
                        "unsupported mechanism {:?}",
                        String::from_utf8_lossy(peer.mechanism())
                    ))));
                }
                self.peer = Some(peer);
                HandshakeState::SendReady
            }
            HandshakeState::SendReady => {
                let handle = match self.ready.take() {
                    Some(handle) => handle,
                    None => Message::from_static(messages, MSG_COMMAND, READY_COMMAND)?,
                };
                let sent = match messages.get(&handle) {
                    Some(msg) => self.sender.poll(conn, msg),
                    None => Poll::Ready(Err(FrameError::InvalidHandle)),
                };
                let Poll::Ready(result) = sent else {
                    self.ready = Some(handle);
                    return Poll::Pending;
                };
                Message::destroy(messages, handle)?;
                result?;
                HandshakeState::RecvReady
            }
            HandshakeState::RecvReady => {
                let handle = ready!(self.receiver.poll(conn, messages))?;
                let verdict = match messages.get(&handle) {
                    Some(msg) => check_ready(msg),
                    None => Err(FrameError::InvalidHandle.into()),
                };
                Message::destroy(messages, handle)?;
                verdict?;
                HandshakeState::Established
            }
            HandshakeState::Established | HandshakeState::Failed => self.state,
        };
        Poll::Ready(Ok(next))
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("peer", &self.peer)
            .field("ready_pending", &self.ready.is_some())
            .finish()
    }
}

/// Name of a command frame body: a length byte followed by that many bytes.
pub fn command_name(body: &[u8]) -> Option<&[u8]> {
    let (&len, rest) = body.split_first()?;
    rest.get(..usize::from(len))
}

fn check_ready(msg: &Message) -> Result<()> {
    if !msg.is_command() {
        return Err(violation("READY frame is missing the COMMAND flag".into()));
    }
    match command_name(msg.data()) {
        Some(READY_NAME) => Ok(()),
        Some(name) => Err(violation(format!(
            "expected READY command, got {:?}",
            String::from_utf8_lossy(name)
        ))),
        None => Err(violation("truncated command name".into())),
    }
}

fn violation(detail: String) -> PeerError {
    PeerError::ProtocolViolation(detail)
}
