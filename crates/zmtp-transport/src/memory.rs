use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Stream, Transport};

#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

type SharedPipe = Rc<RefCell<Pipe>>;
type PendingSlot = Rc<RefCell<Option<Ends>>>;

#[derive(Debug)]
struct Ends {
    rx: SharedPipe,
    tx: SharedPipe,
}

impl Ends {
    fn pair() -> (Self, Self) {
        let a_to_b = SharedPipe::default();
        let b_to_a = SharedPipe::default();
        (
            Self {
                rx: Rc::clone(&b_to_a),
                tx: Rc::clone(&a_to_b),
            },
            Self {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }
}

#[derive(Debug)]
enum MemoryLink {
    Pending(PendingSlot),
    Connected(Ends),
    Closed,
}

/// One end of an in-process byte pipe.
///
/// Single-threaded (`Rc`), like the scheduler it is driven from. `max_chunk`
/// caps how many bytes a single `try_send`/`try_receive` call moves, which
/// lets tests force partial transfers.
#[derive(Debug)]
pub struct MemoryStream {
    link: MemoryLink,
    max_chunk: usize,
}

impl MemoryStream {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a, b) = Ends::pair();
        (Self::connected(a), Self::connected(b))
    }

    fn connected(ends: Ends) -> Self {
        Self {
            link: MemoryLink::Connected(ends),
            max_chunk: usize::MAX,
        }
    }

    /// Cap the number of bytes moved per call.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Bytes sent by the peer and not yet received.
    pub fn pending_bytes(&self) -> usize {
        match &self.link {
            MemoryLink::Connected(ends) => ends.rx.borrow().bytes.len(),
            _ => 0,
        }
    }

    fn attach(&mut self) {
        let ends = match &self.link {
            MemoryLink::Pending(slot) => slot.borrow_mut().take(),
            _ => None,
        };
        if let Some(ends) = ends {
            debug!("memory listener attached to peer");
            self.link = MemoryLink::Connected(ends);
        }
    }
}

impl Stream for MemoryStream {
    fn try_send(&mut self, data: &[u8]) -> Result<usize> {
        self.attach();
        match &self.link {
            MemoryLink::Pending(_) => Ok(0),
            MemoryLink::Closed => Err(TransportError::Closed),
            MemoryLink::Connected(ends) => {
                let mut tx = ends.tx.borrow_mut();
                if tx.closed {
                    return Err(TransportError::Closed);
                }
                let n = data.len().min(self.max_chunk);
                tx.bytes.extend(&data[..n]);
                Ok(n)
            }
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.attach();
        match &self.link {
            MemoryLink::Pending(_) => Ok(0),
            MemoryLink::Closed => Err(TransportError::Closed),
            MemoryLink::Connected(ends) => {
                let mut rx = ends.rx.borrow_mut();
                let n = buf.len().min(self.max_chunk).min(rx.bytes.len());
                if n == 0 && rx.closed && !buf.is_empty() {
                    return Err(TransportError::Closed);
                }
                for (slot, byte) in buf.iter_mut().zip(rx.bytes.drain(..n)) {
                    *slot = byte;
                }
                Ok(n)
            }
        }
    }

    fn close(&mut self) {
        if let MemoryLink::Connected(ends) = &self.link {
            ends.tx.borrow_mut().closed = true;
            ends.rx.borrow_mut().closed = true;
        }
        self.link = MemoryLink::Closed;
    }

    fn is_connected(&self) -> bool {
        match &self.link {
            MemoryLink::Connected(_) => true,
            MemoryLink::Pending(slot) => slot.borrow().is_some(),
            MemoryLink::Closed => false,
        }
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-process loopback transport keyed by port.
///
/// Clones share one listener registry, so a "server" and a "client" context
/// built from clones of the same transport can reach each other.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    listeners: Rc<RefCell<HashMap<u16, PendingSlot>>>,
    max_chunk: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            listeners: Rc::default(),
            max_chunk: usize::MAX,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the per-call transfer size of every stream this transport creates.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }
}

impl Transport for MemoryTransport {
    type Stream = MemoryStream;

    fn connect(&mut self, addr: SocketAddr) -> Result<MemoryStream> {
        let port = addr.port();
        let slot = self
            .listeners
            .borrow_mut()
            .remove(&port)
            .filter(|slot| Rc::strong_count(slot) > 1)
            .ok_or(TransportError::Refused(port))?;
        let (local, remote) = Ends::pair();
        *slot.borrow_mut() = Some(remote);
        debug!(port, "memory link connected");
        Ok(MemoryStream::connected(local).with_max_chunk(self.max_chunk))
    }

    fn listen(&mut self, addr: SocketAddr) -> Result<MemoryStream> {
        let port = addr.port();
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|_, slot| Rc::strong_count(slot) > 1);
        if listeners.contains_key(&port) {
            return Err(TransportError::AddrInUse(port));
        }
        let slot = PendingSlot::default();
        listeners.insert(port, Rc::clone(&slot));
        debug!(port, "memory link listening");
        Ok(MemoryStream {
            link: MemoryLink::Pending(slot),
            max_chunk: self.max_chunk,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
