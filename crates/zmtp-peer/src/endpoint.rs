use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use zmtp_frame::Pool;

/// Number of endpoints that may be alive at once.
pub const MAX_ENDPOINTS: usize = 2;

pub type EndpointPool = Pool<Endpoint, MAX_ENDPOINTS>;

/// Address and port used while opening a connection.
///
/// Only lives for the duration of a connect or listen call. The port is held
/// in network byte order, the way the transport's address structures expect
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    addr: IpAddr,
    port_be: u16,
}

impl Endpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self {
            addr,
            port_be: port.to_be(),
        }
    }

    /// Wildcard local address, for listening.
    pub fn any(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Port in host byte order.
    pub fn port(&self) -> u16 {
        u16::from_be(self.port_be)
    }

    /// Port exactly as stored, in network byte order.
    pub fn port_be(&self) -> u16 {
        self.port_be
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_stored_big_endian() {
        let ep = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999);
        assert_eq!(ep.port_be().to_ne_bytes(), 9999u16.to_be_bytes());
        assert_eq!(ep.port(), 9999);
        assert_eq!(ep.socket_addr(), "127.0.0.1:9999".parse().unwrap());
    }

    #[test]
    fn any_uses_unspecified_address() {
        let ep = Endpoint::any(5555);
        assert!(ep.addr().is_unspecified());
        assert_eq!(ep.socket_addr().port(), 5555);
    }

    #[test]
    fn endpoint_pool_holds_two() {
        let mut pool = EndpointPool::new("endpoints");
        let _a = pool.allocate(Endpoint::any(1)).unwrap();
        let _b = pool.allocate(Endpoint::any(2)).unwrap();
        assert!(pool.allocate(Endpoint::any(3)).unwrap_err().is_pool_exhausted());
    }
}
