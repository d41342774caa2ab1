use std::collections::VecDeque;

use super::address::NetAddr;
use super::transport::{NetSrc, Transport};

const MAX_LOOPBACK: usize = 16;

/// In-process queues between the client and server sockets of one process.
/// Only loopback destinations are accepted.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    to_client: VecDeque<Vec<u8>>,
    to_server: VecDeque<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&mut self, sock: NetSrc) -> &mut VecDeque<Vec<u8>> {
        match sock {
            NetSrc::Client => &mut self.to_client,
            NetSrc::Server => &mut self.to_server,
        }
    }

    pub fn pending(&self, sock: NetSrc) -> usize {
        match sock {
            NetSrc::Client => self.to_client.len(),
            NetSrc::Server => self.to_server.len(),
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, sock: NetSrc, to: &NetAddr, data: &[u8]) {
        if !to.is_loopback() {
            log::warn!("loopback transport can't reach {}", to);
            return;
        }
        let queue = self.queue(sock.peer());
        if queue.len() >= MAX_LOOPBACK {
            log::debug!("loopback queue to {:?} full, dropping oldest", sock.peer());
            queue.pop_front();
        }
        queue.push_back(data.to_vec());
    }

    fn receive(&mut self, sock: NetSrc) -> Option<(NetAddr, Vec<u8>)> {
        self.queue(sock).pop_front().map(|data| (NetAddr::LOOPBACK, data))
    }
}
