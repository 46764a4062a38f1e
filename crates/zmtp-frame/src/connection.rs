//! Resumable exact-length transfers over a non-blocking stream.
//!
//! [`Connection::poll_send`] and [`Connection::poll_recv`] move exactly
//! `buf.len()` bytes. Each call pushes as far as the transport allows and
//! returns `Poll::Pending` when it stops making progress; the transfer cursor
//! stays in the connection so the next call continues from the same offset.
//! Callers must re-invoke with the same buffer until the transfer is ready.
//! Each direction has its own cursor, so a receive can run while a send is
//! suspended on backpressure.

use std::fmt::Write as _;
use std::task::Poll;

use tracing::{debug, trace};
use zmtp_transport::{Stream, TransportError, TransportEvent};

use crate::error::{FrameError, Result};
use crate::pool::Pool;

/// Size of the per-connection receive staging buffer.
pub const INPUT_BUFFER_SIZE: usize = 100;

/// Number of connections that may be alive at once.
pub const MAX_CONNECTIONS: usize = 10;

const PREVIEW_BYTES: usize = 32;

pub type ConnectionPool<S> = Pool<Connection<S>, MAX_CONNECTIONS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Position inside an unfinished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub len: usize,
    pub done: usize,
}

/// A transport stream plus the state needed to resume partial transfers.
pub struct Connection<S> {
    stream: S,
    staging: [u8; INPUT_BUFFER_SIZE],
    send_cursor: Option<Transfer>,
    recv_cursor: Option<Transfer>,
    fault: Option<TransportEvent>,
}

impl<S: Stream> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            staging: [0; INPUT_BUFFER_SIZE],
            send_cursor: None,
            recv_cursor: None,
            fault: None,
        }
    }

    /// Send exactly `data.len()` bytes.
    pub fn poll_send(&mut self, data: &[u8]) -> Poll<Result<()>> {
        let mut cursor = match self.begin(Direction::Send, data.len()) {
            Ok(cursor) => cursor,
            Err(err) => return Poll::Ready(Err(err)),
        };

        while cursor.done < cursor.len {
            match self.stream.try_send(&data[cursor.done..]) {
                Ok(0) => {
                    self.send_cursor = Some(cursor);
                    return Poll::Pending;
                }
                Ok(n) => cursor.done += n,
                Err(err) => return Poll::Ready(Err(self.fail(err))),
            }
        }

        self.send_cursor = None;
        trace!(len = data.len(), bytes = %preview(data), "sent");
        Poll::Ready(Ok(()))
    }

    /// Receive exactly `buf.len()` bytes, staged through the input buffer.
    pub fn poll_recv(&mut self, buf: &mut [u8]) -> Poll<Result<()>> {
        let mut cursor = match self.begin(Direction::Receive, buf.len()) {
            Ok(cursor) => cursor,
            Err(err) => return Poll::Ready(Err(err)),
        };

        while cursor.done < cursor.len {
            let want = (cursor.len - cursor.done).min(INPUT_BUFFER_SIZE);
            match self.stream.try_receive(&mut self.staging[..want]) {
                Ok(0) => {
                    self.recv_cursor = Some(cursor);
                    return Poll::Pending;
                }
                Ok(n) => {
                    buf[cursor.done..cursor.done + n].copy_from_slice(&self.staging[..n]);
                    cursor.done += n;
                }
                Err(err) => return Poll::Ready(Err(self.fail(err))),
            }
        }

        self.recv_cursor = None;
        trace!(len = buf.len(), bytes = %preview(buf), "read");
        Poll::Ready(Ok(()))
    }

    /// Deliver a host stack notification.
    ///
    /// Closed, aborted and timed-out links fail every later transfer.
    pub fn notify(&mut self, event: TransportEvent) {
        if event.is_terminal() {
            debug!(?event, "connection failed");
            self.fault.get_or_insert(event);
            self.reset_cursors();
        } else {
            trace!(?event, "connection wake-up");
        }
    }

    /// The unfinished transfer in `direction`, if one is suspended.
    pub fn progress(&self, direction: Direction) -> Option<Transfer> {
        match direction {
            Direction::Send => self.send_cursor,
            Direction::Receive => self.recv_cursor,
        }
    }

    /// Whether a terminal notification or error has been seen.
    pub fn is_failed(&self) -> bool {
        self.fault.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.fault.is_none() && self.stream.is_connected()
    }

    /// Close the underlying stream; later transfers fail.
    pub fn close(&mut self) {
        self.stream.close();
        self.fault.get_or_insert(TransportEvent::Closed);
        self.reset_cursors();
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    fn begin(&mut self, direction: Direction, len: usize) -> Result<Transfer> {
        if let Some(event) = self.fault {
            return Err(event
                .into_error()
                .unwrap_or(TransportError::Closed)
                .into());
        }
        match self.progress(direction) {
            None => Ok(Transfer {
                direction,
                len,
                done: 0,
            }),
            Some(cursor) if cursor.len == len => Ok(cursor),
            Some(cursor) => Err(FrameError::TransferInterleaved {
                requested: len,
                pending: cursor.len,
            }),
        }
    }

    fn reset_cursors(&mut self) {
        self.send_cursor = None;
        self.recv_cursor = None;
    }

    fn fail(&mut self, err: TransportError) -> FrameError {
        self.reset_cursors();
        let event = match err {
            TransportError::Aborted => TransportEvent::Aborted,
            TransportError::TimedOut => TransportEvent::TimedOut,
            _ => TransportEvent::Closed,
        };
        self.fault.get_or_insert(event);
        debug!(error = %err, "transfer failed");
        err.into()
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("send_cursor", &self.send_cursor)
            .field("recv_cursor", &self.recv_cursor)
            .field("fault", &self.fault)
            .finish()
    }
}

fn preview(data: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 3);
    for byte in data.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{byte:02X} ");
    }
    if data.len() > PREVIEW_BYTES {
        out.push_str("..");
    }
    out.trim_end().to_string()
}
