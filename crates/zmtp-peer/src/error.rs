use zmtp_frame::FrameError;
use zmtp_transport::TransportError;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A received value failed validation during the handshake.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The handshake already terminated in failure.
    #[error("handshake failed")]
    HandshakeFailed,

    /// The channel already has a connection.
    #[error("channel is already bound to a connection")]
    AlreadyBound,

    /// The channel has no connection.
    #[error("channel is not bound to a connection")]
    NotBound,

    /// Application traffic before the handshake completed.
    #[error("handshake has not completed on this channel")]
    NotEstablished,
}

impl PeerError {
    /// A pool had no free slot. Recoverable: free something and retry.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_pool_exhausted())
    }

    /// The handshake rejected something the peer sent.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::Frame(FrameError::AllocationFailure { .. }))
    }

    /// The underlying transport failure, however deep it was wrapped.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) | Self::Frame(FrameError::Transport(err)) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
