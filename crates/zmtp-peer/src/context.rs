use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::task::Poll;

use tracing::{debug, trace};
use zmtp_frame::{
    Connection, ConnectionPool, FrameConfig, FrameError, Handle, Message, MessagePool, Reclaimed,
};
use zmtp_transport::{Stream, Transport, TransportEvent};

use crate::channel::{Channel, ChannelPool, Link};
use crate::endpoint::{Endpoint, EndpointPool};
use crate::error::{PeerError, Result};
use crate::greeting::Greeting;
use crate::handshake::{Handshake, HandshakeConfig, HandshakeState};

pub type ChannelHandle<T> = Handle<Channel<<T as Transport>::Stream>>;

/// Slots in use per pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolUsage {
    pub endpoints: usize,
    pub connections: usize,
    pub messages: usize,
    pub channels: usize,
}

impl PoolUsage {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Connect,
    Listen,
}

/// Owner of the transport and every protocol pool.
///
/// All operations run on the caller's thread and never block. The `poll_*`
/// operations return `Poll::Pending` when the transport cannot move more
/// bytes; call them again (with the same arguments) on a later turn.
pub struct Context<T: Transport> {
    transport: T,
    frame: FrameConfig,
    handshake: HandshakeConfig,
    endpoints: EndpointPool,
    connections: ConnectionPool<T::Stream>,
    messages: MessagePool,
    channels: ChannelPool<T::Stream>,
}

impl<T: Transport> Context<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, FrameConfig::default(), HandshakeConfig::default())
    }

    pub fn with_config(transport: T, frame: FrameConfig, handshake: HandshakeConfig) -> Self {
        Self {
            transport,
            frame,
            handshake,
            endpoints: EndpointPool::new("endpoints"),
            connections: ConnectionPool::new("connections"),
            messages: MessagePool::new("messages"),
            channels: ChannelPool::new("channels"),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn usage(&self) -> PoolUsage {
        PoolUsage {
            endpoints: self.endpoints.in_use(),
            connections: self.connections.in_use(),
            messages: self.messages.in_use(),
            channels: self.channels.in_use(),
        }
    }

    // Channels

    pub fn channel_new(&mut self) -> Result<ChannelHandle<T>> {
        let ch = self.channels.allocate(Channel::new())?;
        debug!(channel = ch.index(), "channel created");
        Ok(ch)
    }

    pub fn channel(&self, ch: &ChannelHandle<T>) -> Option<&Channel<T::Stream>> {
        self.channels.get(ch)
    }

    /// Open an outbound connection and bind it to `ch`.
    ///
    /// The handshake is not run; drive [`Context::poll_handshake`] next.
    pub fn connect(&mut self, ch: &ChannelHandle<T>, addr: IpAddr, port: u16) -> Result<()> {
        self.bind(ch, Endpoint::new(addr, port), Role::Connect)
    }

    /// Listen on `port` on every local address and bind the link to `ch`.
    pub fn listen(&mut self, ch: &ChannelHandle<T>, port: u16) -> Result<()> {
        self.bind(ch, Endpoint::any(port), Role::Listen)
    }

    pub fn poll_handshake(&mut self, ch: &ChannelHandle<T>) -> Poll<Result<()>> {
        let (link, conn, messages) = self.parts(ch)?;
        link.handshake.poll(conn, messages)
    }

    /// Send one frame. The caller keeps ownership of `msg` and destroys it.
    pub fn poll_send(&mut self, ch: &ChannelHandle<T>, msg: &Handle<Message>) -> Poll<Result<()>> {
        let (link, conn, messages) = self.parts(ch)?;
        if !link.handshake.is_established() {
            return Poll::Ready(Err(PeerError::NotEstablished));
        }
        let msg = messages.get(msg).ok_or(FrameError::InvalidHandle)?;
        link.sender.poll(conn, msg).map_err(PeerError::from)
    }

    /// Receive one frame as a newly owned message.
    pub fn poll_recv(&mut self, ch: &ChannelHandle<T>) -> Poll<Result<Handle<Message>>> {
        let (link, conn, messages) = self.parts(ch)?;
        if !link.handshake.is_established() {
            return Poll::Ready(Err(PeerError::NotEstablished));
        }
        link.receiver.poll(conn, messages).map_err(PeerError::from)
    }

    /// Deliver a transport notification to the channel's connection.
    pub fn notify(&mut self, ch: &ChannelHandle<T>, event: TransportEvent) -> Result<()> {
        let (_, conn, _) = self.parts(ch)?;
        conn.notify(event);
        Ok(())
    }

    /// Close and release the channel's connection. The channel can be bound again.
    pub fn close(&mut self, ch: &ChannelHandle<T>) -> Result<()> {
        let link = self
            .channels
            .get_mut(ch)
            .ok_or(FrameError::InvalidHandle)?
            .unbind()
            .ok_or(PeerError::NotBound)?;
        debug!(channel = ch.index(), "channel closed");
        self.discard(link)
    }

    /// Release the channel and, if bound, its connection.
    pub fn channel_destroy(&mut self, ch: ChannelHandle<T>) -> Result<()> {
        let index = ch.index();
        let mut channel = self.channels.release(ch)?;
        if let Some(link) = channel.unbind() {
            self.discard(link)?;
        }
        debug!(channel = index, "channel destroyed");
        Ok(())
    }

    pub fn handshake_state(&self, ch: &ChannelHandle<T>) -> Option<HandshakeState> {
        self.channels.get(ch).and_then(Channel::handshake_state)
    }

    pub fn peer_greeting(&self, ch: &ChannelHandle<T>) -> Option<&Greeting> {
        self.channels.get(ch).and_then(Channel::peer_greeting)
    }

    pub fn connection(&self, ch: &ChannelHandle<T>) -> Option<&Connection<T::Stream>> {
        let conn = self.channels.get(ch)?.connection()?;
        self.connections.get(conn)
    }

    /// Local address of the bound link, e.g. to learn an ephemeral port.
    pub fn local_addr(&self, ch: &ChannelHandle<T>) -> Option<SocketAddr> {
        self.connection(ch)?.stream().local_addr()
    }

    // Messages

    /// New zero-filled message the context owns.
    pub fn msg_new(&mut self, flags: u8, size: usize) -> Result<Handle<Message>> {
        Ok(Message::alloc(&mut self.messages, flags, size)?)
    }

    /// Take ownership of `data` without copying it.
    pub fn msg_from_data(&mut self, flags: u8, data: Vec<u8>) -> Result<Handle<Message>> {
        Ok(Message::from_data(&mut self.messages, flags, data)?)
    }

    /// Wrap static bytes; destroying the message leaves them alone.
    pub fn msg_from_static(&mut self, flags: u8, data: &'static [u8]) -> Result<Handle<Message>> {
        Ok(Message::from_static(&mut self.messages, flags, data)?)
    }

    pub fn msg(&self, msg: &Handle<Message>) -> Option<&Message> {
        self.messages.get(msg)
    }

    pub fn msg_destroy(&mut self, msg: Handle<Message>) -> Result<Reclaimed> {
        Ok(Message::destroy(&mut self.messages, msg)?)
    }

    fn bind(&mut self, ch: &ChannelHandle<T>, endpoint: Endpoint, role: Role) -> Result<()> {
        match self.channels.get(ch) {
            None => return Err(FrameError::InvalidHandle.into()),
            Some(channel) if channel.is_bound() => return Err(PeerError::AlreadyBound),
            Some(_) => {}
        }

        let ep = self.endpoints.allocate(endpoint)?;
        let opened = self.open(ch, &ep, role);
        self.endpoints.release(ep)?;
        if let Err(err) = &opened {
            debug!(channel = ch.index(), ?role, error = %err, "channel bind failed");
        }
        opened
    }

    fn open(&mut self, ch: &ChannelHandle<T>, ep: &Handle<Endpoint>, role: Role) -> Result<()> {
        let addr = self
            .endpoints
            .get(ep)
            .ok_or(FrameError::InvalidHandle)?
            .socket_addr();
        let stream = match role {
            Role::Connect => self.transport.connect(addr)?,
            Role::Listen => self.transport.listen(addr)?,
        };
        let conn = self.connections.allocate(Connection::new(stream))?;
        debug!(
            channel = ch.index(),
            connection = conn.index(),
            ?role,
            %addr,
            transport = self.transport.name(),
            "channel bound"
        );

        let handshake = Handshake::new(self.handshake.clone()).with_frame_config(self.frame.clone());
        let link = Link::new(conn, handshake, self.frame.clone());
        let Some(channel) = self.channels.get_mut(ch) else {
            self.discard(link)?;
            return Err(FrameError::InvalidHandle.into());
        };
        if let Err(link) = channel.bind(link) {
            self.discard(link)?;
            return Err(PeerError::AlreadyBound);
        }
        Ok(())
    }

    /// Tear a link down and return its slots.
    fn discard(&mut self, mut link: Link<T::Stream>) -> Result<()> {
        let released = link.handshake.release(&mut self.messages);
        let mut conn = self.connections.release(link.conn)?;
        conn.close();
        trace!("connection released");
        released
    }

    #[allow(clippy::type_complexity)]
    fn parts(
        &mut self,
        ch: &ChannelHandle<T>,
    ) -> Result<(
        &mut Link<T::Stream>,
        &mut Connection<T::Stream>,
        &mut MessagePool,
    )> {
        let link = self
            .channels
            .get_mut(ch)
            .ok_or(FrameError::InvalidHandle)?
            .link_mut()
            .ok_or(PeerError::NotBound)?;
        let conn = self
            .connections
            .get_mut(&link.conn)
            .ok_or(FrameError::InvalidHandle)?;
        Ok((link, conn, &mut self.messages))
    }
}

impl<T: Transport> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport.name())
            .field("frame", &self.frame)
            .field("handshake", &self.handshake)
            .field("usage", &self.usage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use zmtp_frame::{MAX_CONNECTIONS, MAX_MESSAGES, MSG_COMMAND, MSG_MORE};
    use zmtp_transport::{MemoryTransport, TransportError};

    use super::*;
    use crate::channel::MAX_CHANNELS;
    use crate::handshake::READY_COMMAND;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn drive<R>(mut poll: impl FnMut() -> Poll<Result<R>>) -> Result<R> {
        for _ in 0..10_000 {
            if let Poll::Ready(result) = poll() {
                return result;
            }
        }
        panic!("operation never completed");
    }

    /// Listening and connecting channels, handshake complete on both.
    fn established(
        ctx: &mut Context<MemoryTransport>,
        port: u16,
    ) -> (ChannelHandle<MemoryTransport>, ChannelHandle<MemoryTransport>) {
        let server = ctx.channel_new().unwrap();
        let client = ctx.channel_new().unwrap();
        ctx.listen(&server, port).unwrap();
        ctx.connect(&client, LOCALHOST, port).unwrap();
        for _ in 0..1_000 {
            let a = ctx.poll_handshake(&server);
            let b = ctx.poll_handshake(&client);
            if let (Poll::Ready(a), Poll::Ready(b)) = (a, b) {
                a.unwrap();
                b.unwrap();
                return (server, client);
            }
        }
        panic!("handshake never completed");
    }

    #[test]
    fn channel_pool_exhausts_and_recovers() {
        let mut ctx = Context::new(MemoryTransport::new());
        let mut live: Vec<_> = (0..MAX_CHANNELS).map(|_| ctx.channel_new().unwrap()).collect();
        assert!(ctx.channel_new().unwrap_err().is_pool_exhausted());

        let freed = live.pop().unwrap();
        ctx.channel_destroy(freed).unwrap();
        let again = ctx.channel_new().unwrap();
        assert!(ctx.channel_new().unwrap_err().is_pool_exhausted());
        live.push(again);
        assert_eq!(ctx.usage().channels, MAX_CHANNELS);
    }

    #[test]
    fn binding_twice_is_rejected() {
        let mut ctx = Context::new(MemoryTransport::new());
        let ch = ctx.channel_new().unwrap();
        ctx.listen(&ch, 9999).unwrap();
        assert!(matches!(ctx.listen(&ch, 9998), Err(PeerError::AlreadyBound)));
        assert!(matches!(
            ctx.connect(&ch, LOCALHOST, 9999),
            Err(PeerError::AlreadyBound)
        ));
        assert_eq!(ctx.usage().connections, 1);
        assert_eq!(ctx.usage().endpoints, 0);
    }

    #[test]
    fn failed_connect_releases_every_slot() {
        let mut ctx = Context::new(MemoryTransport::new());
        let ch = ctx.channel_new().unwrap();
        let err = ctx.connect(&ch, LOCALHOST, 1234).unwrap_err();
        assert!(matches!(
            err.transport_error(),
            Some(TransportError::Refused(1234))
        ));
        assert_eq!(ctx.usage().endpoints, 0);
        assert_eq!(ctx.usage().connections, 0);
        assert!(!ctx.channel(&ch).unwrap().is_bound());
    }

    #[test]
    fn failed_listen_releases_endpoint() {
        let mut ctx = Context::new(MemoryTransport::new());
        let first = ctx.channel_new().unwrap();
        let second = ctx.channel_new().unwrap();
        ctx.listen(&first, 7000).unwrap();
        let err = ctx.listen(&second, 7000).unwrap_err();
        assert!(matches!(
            err.transport_error(),
            Some(TransportError::AddrInUse(7000))
        ));
        assert_eq!(ctx.usage().endpoints, 0);
        assert_eq!(ctx.usage().connections, 1);
    }

    #[test]
    fn every_channel_can_hold_a_connection() {
        let mut ctx = Context::new(MemoryTransport::new());
        let mut channels: Vec<_> = (0..MAX_CHANNELS).map(|_| ctx.channel_new().unwrap()).collect();
        for (i, ch) in channels.iter().enumerate() {
            ctx.listen(ch, 8000 + i as u16).unwrap();
        }
        assert_eq!(ctx.usage().connections, MAX_CONNECTIONS);

        let last = channels.pop().unwrap();
        ctx.channel_destroy(last).unwrap();
        assert_eq!(ctx.usage().connections, MAX_CONNECTIONS - 1);
        assert_eq!(ctx.usage().channels, MAX_CHANNELS - 1);
    }

    #[test]
    fn traffic_before_handshake_is_refused() {
        let mut ctx = Context::new(MemoryTransport::new());
        let ch = ctx.channel_new().unwrap();
        let msg = ctx.msg_from_static(0, b"early").unwrap();

        assert!(matches!(
            ctx.poll_send(&ch, &msg),
            Poll::Ready(Err(PeerError::NotBound))
        ));
        ctx.listen(&ch, 4444).unwrap();
        assert!(matches!(
            ctx.poll_send(&ch, &msg),
            Poll::Ready(Err(PeerError::NotEstablished))
        ));
        assert!(matches!(
            ctx.poll_recv(&ch),
            Poll::Ready(Err(PeerError::NotEstablished))
        ));
        ctx.msg_destroy(msg).unwrap();
    }

    #[test]
    fn hello_round_trip() {
        let mut ctx = Context::new(MemoryTransport::new());
        let (server, client) = established(&mut ctx, 9999);

        let hello = ctx.msg_from_static(0, b"hello").unwrap();
        drive(|| ctx.poll_send(&client, &hello)).unwrap();
        assert_eq!(ctx.msg_destroy(hello).unwrap(), Reclaimed::Kept);

        let got = drive(|| ctx.poll_recv(&server)).unwrap();
        let msg = ctx.msg(&got).unwrap();
        assert_eq!(msg.data(), b"hello");
        assert_eq!(msg.size(), 5);
        assert_eq!(msg.flags(), 0);
        assert_eq!(ctx.msg_destroy(got).unwrap(), Reclaimed::Freed(5));
        assert_eq!(ctx.usage().messages, 0);
    }

    #[test]
    fn multipart_frames_arrive_in_order() {
        let mut ctx = Context::new(MemoryTransport::new().with_max_chunk(3));
        let (server, client) = established(&mut ctx, 6000);

        let head = ctx.msg_from_data(MSG_MORE, b"head".to_vec()).unwrap();
        let body = ctx.msg_new(0, 300).unwrap();
        drive(|| ctx.poll_send(&client, &head)).unwrap();
        drive(|| ctx.poll_send(&client, &body)).unwrap();
        ctx.msg_destroy(head).unwrap();
        ctx.msg_destroy(body).unwrap();

        let first = drive(|| ctx.poll_recv(&server)).unwrap();
        let second = drive(|| ctx.poll_recv(&server)).unwrap();
        assert!(ctx.msg(&first).unwrap().is_more());
        assert_eq!(ctx.msg(&first).unwrap().data(), b"head");
        assert_eq!(ctx.msg(&second).unwrap().size(), 300);
        assert!(!ctx.msg(&second).unwrap().is_more());
    }

    #[test]
    fn message_pool_exhaustion_surfaces_on_recv() {
        let mut ctx = Context::new(MemoryTransport::new());
        let (server, client) = established(&mut ctx, 6100);

        let msg = ctx.msg_from_static(0, b"x").unwrap();
        drive(|| ctx.poll_send(&client, &msg)).unwrap();
        let mut held = vec![msg];
        while held.len() < MAX_MESSAGES {
            held.push(ctx.msg_new(0, 1).unwrap());
        }

        let err = drive(|| ctx.poll_recv(&server)).unwrap_err();
        assert!(err.is_pool_exhausted());

        let freed = held.pop().unwrap();
        ctx.msg_destroy(freed).unwrap();
        let got = drive(|| ctx.poll_recv(&server)).unwrap();
        assert_eq!(ctx.msg(&got).unwrap().data(), b"x");
    }

    #[test]
    fn closed_peer_fails_recv() {
        let mut ctx = Context::new(MemoryTransport::new());
        let (server, client) = established(&mut ctx, 6200);

        ctx.close(&client).unwrap();
        let err = drive(|| ctx.poll_recv(&server)).unwrap_err();
        assert!(matches!(err.transport_error(), Some(TransportError::Closed)));
    }

    #[test]
    fn notification_terminates_pending_recv() {
        let mut ctx = Context::new(MemoryTransport::new());
        let (server, _client) = established(&mut ctx, 6300);

        assert!(ctx.poll_recv(&server).is_pending());
        ctx.notify(&server, TransportEvent::TimedOut).unwrap();
        let Poll::Ready(Err(err)) = ctx.poll_recv(&server) else {
            panic!("expected failure");
        };
        assert!(matches!(err.transport_error(), Some(TransportError::TimedOut)));
    }

    #[test]
    fn discard_frees_connection_when_ready_release_fails() {
        let mut ctx = Context::new(MemoryTransport::new());
        let ch = ctx.channel_new().unwrap();
        ctx.listen(&ch, 6500).unwrap();
        assert_eq!(ctx.usage().connections, 1);

        let mut link = ctx.channels.get_mut(&ch).unwrap().unbind().unwrap();
        let mut other = MessagePool::new("other");
        let foreign = Message::from_static(&mut other, MSG_COMMAND, READY_COMMAND).unwrap();
        link.handshake.hold_ready(foreign);

        let err = ctx.discard(link).unwrap_err();
        assert!(matches!(err, PeerError::Frame(FrameError::InvalidHandle)));
        assert_eq!(ctx.usage().connections, 0);
    }

    #[test]
    fn close_allows_rebinding() {
        let mut ctx = Context::new(MemoryTransport::new());
        let (server, client) = established(&mut ctx, 6400);
        assert!(ctx.peer_greeting(&server).is_some());

        ctx.close(&server).unwrap();
        assert!(matches!(ctx.close(&server), Err(PeerError::NotBound)));
        assert_eq!(ctx.handshake_state(&server), None);

        ctx.listen(&server, 6401).unwrap();
        assert_eq!(
            ctx.handshake_state(&server),
            Some(HandshakeState::SendSignature)
        );

        ctx.channel_destroy(server).unwrap();
        ctx.channel_destroy(client).unwrap();
        assert!(ctx.usage().is_idle());
    }
}
