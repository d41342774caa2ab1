use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::address::NetAddr;
use super::loopback::LoopbackTransport;
use super::stats::NetworkStats;
use crate::protocol::MAX_MSGLEN;

/// Which logical socket a datagram belongs to. A listen server runs both in
/// one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetSrc {
    Client,
    Server,
}

impl NetSrc {
    pub fn peer(self) -> NetSrc {
        match self {
            NetSrc::Client => NetSrc::Server,
            NetSrc::Server => NetSrc::Client,
        }
    }
}

/// Whole-datagram, best-effort delivery.
pub trait Transport {
    /// Failures are logged and the datagram is dropped.
    fn send(&mut self, sock: NetSrc, to: &NetAddr, data: &[u8]);

    /// Next pending datagram for `sock`. Never blocks; `None` once drained.
    fn receive(&mut self, sock: NetSrc) -> Option<(NetAddr, Vec<u8>)>;

    /// True for addresses that belong to this host.
    fn is_local(&self, addr: &NetAddr) -> bool {
        addr.is_loopback()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, sock: NetSrc, to: &NetAddr, data: &[u8]) {
        (**self).send(sock, to, data)
    }

    fn receive(&mut self, sock: NetSrc) -> Option<(NetAddr, Vec<u8>)> {
        (**self).receive(sock)
    }

    fn is_local(&self, addr: &NetAddr) -> bool {
        (**self).is_local(addr)
    }
}

/// Non-blocking UDP sockets for either role, with loopback traffic kept
/// in-process.
pub struct UdpTransport {
    client: Option<UdpSocket>,
    server: Option<UdpSocket>,
    loopback: LoopbackTransport,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_MSGLEN],
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            server: None,
            loopback: LoopbackTransport::new(),
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_MSGLEN],
        }
    }

    pub fn bind<A: ToSocketAddrs>(&mut self, sock: NetSrc, addr: A) -> io::Result<SocketAddr> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;

        log::info!("Opened {:?} socket on {}", sock, local_addr);
        match sock {
            NetSrc::Client => self.client = Some(socket),
            NetSrc::Server => self.server = Some(socket),
        }
        Ok(local_addr)
    }

    pub fn local_addr(&self, sock: NetSrc) -> Option<SocketAddr> {
        self.socket(sock).and_then(|s| s.local_addr().ok())
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    fn socket(&self, sock: NetSrc) -> Option<&UdpSocket> {
        match sock {
            NetSrc::Client => self.client.as_ref(),
            NetSrc::Server => self.server.as_ref(),
        }
    }

    /// Blocks until `sock` has a datagram waiting or `timeout` elapses.
    pub fn sleep(&self, sock: NetSrc, timeout: Duration) -> io::Result<()> {
        let Some(socket) = self.socket(sock) else {
            std::thread::sleep(timeout);
            return Ok(());
        };

        let mut first = [0u8; 1];
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let result = socket.peek_from(&mut first);
        socket.set_nonblocking(true)?;

        if let Err(e) = result
            && !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        {
            log::debug!("sleep on {:?} socket woke with {}", sock, e);
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, sock: NetSrc, to: &NetAddr, data: &[u8]) {
        if to.is_loopback() {
            self.loopback.send(sock, to, data);
            self.stats.record_sent(data.len());
            return;
        }

        let Some(socket) = self.socket(sock) else {
            log::warn!("send to {} on unopened {:?} socket", to, sock);
            return;
        };
        let Some(addr) = to.to_socket_addr() else {
            return;
        };

        match socket.send_to(data, addr) {
            Ok(bytes) => self.stats.record_sent(bytes),
            Err(e) => log::warn!("send to {} failed: {}", to, e),
        }
    }

    fn receive(&mut self, sock: NetSrc) -> Option<(NetAddr, Vec<u8>)> {
        if let Some(packet) = self.loopback.receive(sock) {
            self.stats.record_received(packet.1.len());
            return Some(packet);
        }

        let socket = match sock {
            NetSrc::Client => self.client.as_ref()?,
            NetSrc::Server => self.server.as_ref()?,
        };

        loop {
            match socket.recv_from(&mut self.recv_buffer) {
                Ok((size, from)) => {
                    let Some(addr) = NetAddr::from_socket_addr(from) else {
                        continue;
                    };
                    if size >= self.recv_buffer.len() {
                        log::warn!("Oversize packet from {}", addr);
                        continue;
                    }
                    self.stats.record_received(size);
                    return Some((addr, self.recv_buffer[..size].to_vec()));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    log::warn!("recv on {:?} socket failed: {}", sock, e);
                    return None;
                }
            }
        }
    }

    fn is_local(&self, addr: &NetAddr) -> bool {
        if addr.is_loopback() || addr.ip[0] == 127 {
            return true;
        }
        [NetSrc::Client, NetSrc::Server]
            .into_iter()
            .filter_map(|sock| self.local_addr(sock))
            .filter_map(NetAddr::from_socket_addr)
            .any(|local| local.ip != [0, 0, 0, 0] && local.compare_base(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_round_trip() {
        let mut net = UdpTransport::new();
        let server = net.bind(NetSrc::Server, "127.0.0.1:0").unwrap();
        net.bind(NetSrc::Client, "127.0.0.1:0").unwrap();

        let to = NetAddr::from_socket_addr(server).unwrap();
        net.send(NetSrc::Client, &to, b"hello");
        net.sleep(NetSrc::Server, Duration::from_millis(200)).unwrap();

        let (from, data) = net.receive(NetSrc::Server).unwrap();
        assert_eq!(data, b"hello");
        assert!(net.is_local(&from));
        assert!(net.receive(NetSrc::Server).is_none());
        assert_eq!(net.stats().packets_sent, 1);
        assert_eq!(net.stats().packets_received, 1);
    }

    #[test]
    fn test_loopback_bypasses_sockets() {
        let mut net = UdpTransport::new();
        net.send(NetSrc::Client, &NetAddr::LOOPBACK, b"x");
        let (from, data) = net.receive(NetSrc::Server).unwrap();
        assert!(from.is_loopback());
        assert_eq!(data, b"x");
    }
}
