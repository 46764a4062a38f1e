use tracing::trace;

use crate::error::{FrameError, Result};
use crate::pool::{Handle, Pool};

/// Message flag: more frames of the same logical message follow.
pub const MSG_MORE: u8 = 0x01;

/// Message flag: the frame carries a protocol command, not application data.
pub const MSG_COMMAND: u8 = 0x04;

/// Number of messages that may be alive at once.
pub const MAX_MESSAGES: usize = 4;

pub type MessagePool = Pool<Message, MAX_MESSAGES>;

/// Where a message's bytes live.
#[derive(Debug)]
pub enum Payload {
    /// Allocated for this message alone; freed when the message is destroyed.
    Owned(Vec<u8>),
    /// Static bytes wrapped without a copy; never freed by the message.
    Borrowed(&'static [u8]),
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(data) => data.as_slice(),
            Self::Borrowed(data) => *data,
        }
    }
}

/// What [`Message::destroy`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaimed {
    /// An owned buffer of this many bytes was freed.
    Freed(usize),
    /// The payload was borrowed and left untouched.
    Kept,
}

/// The unit of application data: a flags byte plus an immutable payload.
#[derive(Debug)]
pub struct Message {
    flags: u8,
    payload: Payload,
}

impl Message {
    /// Allocate a zero-filled buffer of `size` bytes.
    pub fn alloc(pool: &mut MessagePool, flags: u8, size: usize) -> Result<Handle<Message>> {
        Self::alloc_with(pool, flags, size, |_| {})
    }

    /// Allocate a buffer of `size` bytes and initialise it in place.
    pub fn alloc_with(
        pool: &mut MessagePool,
        flags: u8,
        size: usize,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<Handle<Message>> {
        if pool.available() == 0 {
            return Err(exhausted(pool));
        }
        let mut data = alloc_buffer(size)?;
        fill(&mut data);
        Self::from_data(pool, flags, data)
    }

    /// Take ownership of `data`; it is freed when the message is destroyed.
    pub fn from_data(pool: &mut MessagePool, flags: u8, data: Vec<u8>) -> Result<Handle<Message>> {
        pool.allocate(Self {
            flags,
            payload: Payload::Owned(data),
        })
    }

    /// Wrap static bytes without copying them.
    pub fn from_static(
        pool: &mut MessagePool,
        flags: u8,
        data: &'static [u8],
    ) -> Result<Handle<Message>> {
        pool.allocate(Self {
            flags,
            payload: Payload::Borrowed(data),
        })
    }

    /// Release the slot, freeing the payload only if the message owns it.
    pub fn destroy(pool: &mut MessagePool, handle: Handle<Message>) -> Result<Reclaimed> {
        let message = pool.release(handle)?;
        let reclaimed = match message.payload {
            Payload::Owned(data) => Reclaimed::Freed(data.len()),
            Payload::Borrowed(_) => Reclaimed::Kept,
        };
        trace!(?reclaimed, "message destroyed");
        Ok(reclaimed)
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn data(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn size(&self) -> usize {
        self.data().len()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_more(&self) -> bool {
        self.flags & MSG_MORE != 0
    }

    pub fn is_command(&self) -> bool {
        self.flags & MSG_COMMAND != 0
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.payload, Payload::Owned(_))
    }
}

/// Zero-filled payload buffer; allocation failure is reported, not aborted on.
pub(crate) fn alloc_buffer(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| FrameError::AllocationFailure { size })?;
    data.resize(size, 0);
    Ok(data)
}

pub(crate) fn exhausted(pool: &MessagePool) -> FrameError {
    FrameError::PoolExhausted {
        pool: pool.name(),
        capacity: pool.capacity(),
    }
}
