/// Errors that can occur while moving or framing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream failed, closed, aborted or timed out mid-operation.
    #[error("transport error: {0}")]
    Transport(#[from] zmtp_transport::TransportError),

    /// A fixed-capacity pool has no free slot.
    #[error("{pool} pool exhausted (capacity {capacity})")]
    PoolExhausted { pool: &'static str, capacity: usize },

    /// The payload buffer could not be allocated.
    #[error("failed to allocate {size} byte payload")]
    AllocationFailure { size: usize },

    /// A decoded frame declares a payload larger than allowed.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u64, max: usize },

    /// The handle does not refer to a live slot of this pool.
    #[error("handle does not refer to a live pool slot")]
    InvalidHandle,

    /// A new transfer was started before the previous one finished.
    #[error("{requested}-byte transfer started while a {pending}-byte transfer in the same direction is unfinished")]
    TransferInterleaved { requested: usize, pending: usize },
}

impl FrameError {
    /// Whether the error came from pool exhaustion (recoverable by the caller).
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
