use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("bad port in '{0}'")]
    BadPort(String),
    #[error("couldn't resolve '{0}'")]
    Unresolved(String),
    #[error("'{0}' has no IPv4 address")]
    NoIpv4(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrKind {
    Loopback,
    Broadcast,
    Ip,
}

/// Transport endpoint. Loopback addresses never reach a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddr {
    pub kind: AddrKind,
    pub ip: [u8; 4],
    pub port: u16,
}

impl NetAddr {
    pub const LOOPBACK: NetAddr = NetAddr {
        kind: AddrKind::Loopback,
        ip: [127, 0, 0, 1],
        port: 0,
    };

    pub const fn ip(ip: [u8; 4], port: u16) -> Self {
        Self {
            kind: AddrKind::Ip,
            ip,
            port,
        }
    }

    pub const fn broadcast(port: u16) -> Self {
        Self {
            kind: AddrKind::Broadcast,
            ip: [255, 255, 255, 255],
            port,
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.kind == AddrKind::Loopback
    }

    /// Host equality, ignoring the port.
    pub fn compare_base(&self, other: &NetAddr) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match self.kind {
            AddrKind::Loopback | AddrKind::Broadcast => true,
            AddrKind::Ip => self.ip == other.ip,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.kind {
            AddrKind::Loopback => None,
            AddrKind::Broadcast | AddrKind::Ip => Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(self.ip),
                self.port,
            ))),
        }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr.ip() {
            IpAddr::V4(v4) => Some(Self::ip(v4.octets(), addr.port())),
            IpAddr::V6(_) => None,
        }
    }

    /// Parses `host[:port]`, resolving hostnames. `localhost` is the
    /// in-process loopback.
    pub fn resolve(text: &str, default_port: u16) -> Result<Self, AddressError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AddressError::Empty);
        }
        if text == "localhost" || text == "loopback" {
            return Ok(Self::LOOPBACK);
        }

        let (host, port) = match text.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| AddressError::BadPort(text.to_string()))?;
                (host, port)
            }
            None => (text, default_port),
        };

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| AddressError::Unresolved(text.to_string()))?;

        addrs
            .filter_map(Self::from_socket_addr)
            .next()
            .ok_or_else(|| AddressError::NoIpv4(text.to_string()))
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddrKind::Loopback => write!(f, "loopback"),
            _ => write!(
                f,
                "{}.{}.{}.{}:{}",
                self.ip[0], self.ip[1], self.ip[2], self.ip[3], self.port
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_numeric() {
        let addr = NetAddr::resolve("192.168.1.20:27911", 27910).unwrap();
        assert_eq!(addr, NetAddr::ip([192, 168, 1, 20], 27911));

        let addr = NetAddr::resolve("10.0.0.1", 27910).unwrap();
        assert_eq!(addr.port, 27910);
    }

    #[test]
    fn test_resolve_localhost_is_loopback() {
        assert!(NetAddr::resolve("localhost", 27910).unwrap().is_loopback());
    }

    #[test]
    fn test_resolve_errors() {
        assert_eq!(NetAddr::resolve("  ", 1), Err(AddressError::Empty));
        assert!(matches!(
            NetAddr::resolve("10.0.0.1:notaport", 1),
            Err(AddressError::BadPort(_))
        ));
    }

    #[test]
    fn test_base_compare_ignores_port() {
        let a = NetAddr::ip([10, 0, 0, 1], 1000);
        let b = NetAddr::ip([10, 0, 0, 1], 2000);
        let c = NetAddr::ip([10, 0, 0, 2], 1000);
        assert!(a.compare_base(&b));
        assert_ne!(a, b);
        assert!(!a.compare_base(&c));
        assert!(!a.compare_base(&NetAddr::LOOPBACK));
    }

    #[test]
    fn test_display() {
        assert_eq!(NetAddr::ip([1, 2, 3, 4], 5).to_string(), "1.2.3.4:5");
        assert_eq!(NetAddr::LOOPBACK.to_string(), "loopback");
    }
}
