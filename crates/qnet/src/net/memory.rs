use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use super::address::NetAddr;
use super::transport::{NetSrc, Transport};

pub type SharedNetwork = Rc<RefCell<MemoryNetwork>>;

/// A simulated IP network living in one process. Every bound socket gets an
/// inbox keyed by its address.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    inboxes: HashMap<NetAddr, VecDeque<(NetAddr, Vec<u8>)>>,
}

impl MemoryNetwork {
    pub fn shared() -> SharedNetwork {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn bind(net: &SharedNetwork, addr: NetAddr) -> MemorySocket {
        net.borrow_mut().inboxes.entry(addr).or_default();
        MemorySocket {
            net: Rc::clone(net),
            addr,
        }
    }

    pub fn pending(&self, addr: &NetAddr) -> usize {
        self.inboxes.get(addr).map_or(0, VecDeque::len)
    }
}

/// One endpoint on a [`MemoryNetwork`]. It serves a single session, so the
/// socket role passed to [`Transport`] calls is not consulted.
#[derive(Debug)]
pub struct MemorySocket {
    net: SharedNetwork,
    addr: NetAddr,
}

impl MemorySocket {
    pub fn addr(&self) -> NetAddr {
        self.addr
    }

    /// Moves to a new source port the way a NAT mapping change would.
    /// Datagrams still queued for the old port are lost.
    pub fn rebind(&mut self, port: u16) {
        let mut net = self.net.borrow_mut();
        net.inboxes.remove(&self.addr);
        self.addr = self.addr.with_port(port);
        net.inboxes.entry(self.addr).or_default();
    }
}

impl Transport for MemorySocket {
    fn send(&mut self, _sock: NetSrc, to: &NetAddr, data: &[u8]) {
        let mut net = self.net.borrow_mut();
        match net.inboxes.get_mut(to) {
            Some(inbox) => inbox.push_back((self.addr, data.to_vec())),
            None => log::debug!("no route from {} to {}", self.addr, to),
        }
    }

    fn receive(&mut self, _sock: NetSrc) -> Option<(NetAddr, Vec<u8>)> {
        self.net.borrow_mut().inboxes.get_mut(&self.addr)?.pop_front()
    }

    fn is_local(&self, addr: &NetAddr) -> bool {
        addr.is_loopback() || addr.compare_base(&self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_carries_source() {
        let net = MemoryNetwork::shared();
        let mut a = MemoryNetwork::bind(&net, NetAddr::ip([10, 0, 0, 1], 100));
        let mut b = MemoryNetwork::bind(&net, NetAddr::ip([10, 0, 0, 2], 200));

        a.send(NetSrc::Client, &b.addr(), b"ping");
        let (from, data) = b.receive(NetSrc::Server).unwrap();
        assert_eq!(from, a.addr());
        assert_eq!(data, b"ping");
        assert!(!b.is_local(&from));
    }

    #[test]
    fn test_rebind_changes_source_port() {
        let net = MemoryNetwork::shared();
        let mut a = MemoryNetwork::bind(&net, NetAddr::ip([10, 0, 0, 1], 100));
        let mut b = MemoryNetwork::bind(&net, NetAddr::ip([10, 0, 0, 2], 200));

        a.rebind(101);
        a.send(NetSrc::Client, &b.addr(), b"x");
        assert_eq!(b.receive(NetSrc::Server).unwrap().0.port, 101);
    }
}
