use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{Stream, Transport};

/// TCP transport over non-blocking `std::net` sockets.
///
/// Connect only starts the TCP handshake; the returned link reports `Ok(0)`
/// until the socket is established, and a refused or unreachable peer
/// surfaces as [`TransportError::Connect`] from the next transfer. Listen
/// binds a non-blocking listener whose link attaches to the first accepted
/// peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TcpTransport {
    type Stream = TcpLink;

    fn connect(&mut self, addr: SocketAddr) -> Result<TcpLink> {
        let connect_err = |source| TransportError::Connect { addr, source };
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(connect_err)?;
        socket.set_nonblocking(true).map_err(connect_err)?;
        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(err) if is_in_progress(&err) => {}
            Err(source) => return Err(TransportError::Connect { addr, source }),
        }
        debug!(%addr, "tcp connect started");
        Ok(TcpLink {
            state: LinkState::Connecting {
                stream: socket.into(),
                addr,
            },
        })
    }

    fn listen(&mut self, addr: SocketAddr) -> Result<TcpLink> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind { addr, source })?;
        info!(addr = ?listener.local_addr().ok(), "listening on tcp");
        Ok(TcpLink {
            state: LinkState::Listening(listener),
        })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// One TCP link: either waiting for its peer or attached to it.
pub struct TcpLink {
    state: LinkState,
}

enum LinkState {
    Listening(TcpListener),
    Connecting { stream: TcpStream, addr: SocketAddr },
    Connected(TcpStream),
    Closed,
}

impl TcpLink {
    /// Advance a pending accept or connect.
    fn poll_ready(&mut self) -> Result<()> {
        match self.state {
            LinkState::Listening(_) => self.poll_accept(),
            LinkState::Connecting { .. } => self.poll_connect(),
            LinkState::Connected(_) | LinkState::Closed => Ok(()),
        }
    }

    /// Attach an outbound link once the TCP handshake has finished.
    fn poll_connect(&mut self) -> Result<()> {
        let LinkState::Connecting { stream, addr } = &self.state else {
            return Ok(());
        };
        let addr = *addr;
        let failure = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Some(err),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => None,
                Err(err) if err.kind() == ErrorKind::NotConnected => return Ok(()),
                Err(err) => Some(err),
            },
        };
        if let Some(source) = failure {
            debug!(%addr, error = %source, "tcp connect failed");
            self.state = LinkState::Closed;
            return Err(TransportError::Connect { addr, source });
        }

        let state = mem::replace(&mut self.state, LinkState::Closed);
        if let LinkState::Connecting { stream, .. } = state {
            stream.set_nodelay(true)?;
            debug!(%addr, "connected tcp link");
            self.state = LinkState::Connected(stream);
        }
        Ok(())
    }

    /// Attach a waiting listener to its peer if one is pending.
    fn poll_accept(&mut self) -> Result<()> {
        let LinkState::Listening(listener) = &self.state else {
            return Ok(());
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                debug!(%peer, "accepted tcp peer");
                self.state = LinkState::Connected(stream);
                Ok(())
            }
            Err(err) if is_transient(&err) => Ok(()),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }
}

impl Stream for TcpLink {
    fn try_send(&mut self, data: &[u8]) -> Result<usize> {
        self.poll_ready()?;
        match &mut self.state {
            LinkState::Listening(_) | LinkState::Connecting { .. } => Ok(0),
            LinkState::Closed => Err(TransportError::Closed),
            LinkState::Connected(stream) => match stream.write(data) {
                Ok(0) if !data.is_empty() => Err(TransportError::Closed),
                Ok(n) => Ok(n),
                Err(err) => map_io_error(err),
            },
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.poll_ready()?;
        match &mut self.state {
            LinkState::Listening(_) | LinkState::Connecting { .. } => Ok(0),
            LinkState::Closed => Err(TransportError::Closed),
            LinkState::Connected(stream) => match stream.read(buf) {
                Ok(0) if !buf.is_empty() => Err(TransportError::Closed),
                Ok(n) => Ok(n),
                Err(err) => map_io_error(err),
            },
        }
    }

    fn close(&mut self) {
        if let LinkState::Connected(stream) | LinkState::Connecting { stream, .. } = &self.state {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.state = LinkState::Closed;
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected(_))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            LinkState::Listening(listener) => listener.local_addr().ok(),
            LinkState::Connecting { stream, .. } | LinkState::Connected(stream) => {
                stream.local_addr().ok()
            }
            LinkState::Closed => None,
        }
    }
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            LinkState::Listening(_) => "listening",
            LinkState::Connecting { .. } => "connecting",
            LinkState::Connected(_) => "connected",
            LinkState::Closed => "closed",
        };
        f.debug_struct("TcpLink").field("state", &state).finish()
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// A non-blocking connect that has not finished yet.
fn is_in_progress(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    err.kind() == ErrorKind::WouldBlock
}

fn map_io_error(err: std::io::Error) -> Result<usize> {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => Ok(0),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            Err(TransportError::Aborted)
        }
        ErrorKind::TimedOut => Err(TransportError::TimedOut),
        ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        _ => Err(TransportError::Io(err)),
    }
}
