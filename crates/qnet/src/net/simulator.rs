use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::address::NetAddr;
use super::stats::NetworkStats;
use super::transport::{NetSrc, Transport};

#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// 0-100.
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self, rng: &mut impl Rng) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.r#gen::<f32>() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self, rng: &mut impl Rng) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        self.min_latency_ms + rng.gen_range(0..=range) + jitter
    }
}

#[derive(Debug)]
struct DelayedPacket {
    release_time: u64,
    order: u64,
    sock: NetSrc,
    to: NetAddr,
    data: Vec<u8>,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedPacket {}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

type DropRule = Box<dyn FnMut(NetSrc, &NetAddr, &[u8]) -> bool>;

/// Wraps a transport and loses or delays outgoing datagrams.
pub struct LossyTransport<T: Transport> {
    inner: T,
    sim: PacketLossSimulation,
    rng: StdRng,
    drop_rule: Option<DropRule>,
    delayed: BinaryHeap<DelayedPacket>,
    next_order: u64,
    now: u64,
    stats: NetworkStats,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, sim: PacketLossSimulation) -> Self {
        Self {
            inner,
            sim,
            rng: StdRng::from_entropy(),
            drop_rule: None,
            delayed: BinaryHeap::new(),
            next_order: 0,
            now: 0,
            stats: NetworkStats::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Deterministic loss: datagrams for which `rule` returns true are
    /// dropped, in addition to the random loss.
    pub fn with_drop_rule(
        mut self,
        rule: impl FnMut(NetSrc, &NetAddr, &[u8]) -> bool + 'static,
    ) -> Self {
        self.drop_rule = Some(Box::new(rule));
        self
    }

    pub fn set_simulation(&mut self, sim: PacketLossSimulation) {
        self.sim = sim;
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Advances the clock and releases delayed datagrams that are due.
    pub fn flush(&mut self, now: u64) {
        self.now = now;
        while self.delayed.peek().is_some_and(|p| p.release_time <= now) {
            if let Some(p) = self.delayed.pop() {
                self.inner.send(p.sock, &p.to, &p.data);
            }
        }
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send(&mut self, sock: NetSrc, to: &NetAddr, data: &[u8]) {
        let ruled_out = self
            .drop_rule
            .as_mut()
            .is_some_and(|rule| rule(sock, to, data));
        if ruled_out || self.sim.should_drop(&mut self.rng) {
            self.stats.packets_dropped += 1;
            return;
        }

        self.stats.record_sent(data.len());
        let delay = self.sim.delay_ms(&mut self.rng);
        if delay == 0 {
            self.inner.send(sock, to, data);
            return;
        }

        self.next_order += 1;
        self.delayed.push(DelayedPacket {
            release_time: self.now + delay as u64,
            order: self.next_order,
            sock,
            to: *to,
            data: data.to_vec(),
        });
    }

    fn receive(&mut self, sock: NetSrc) -> Option<(NetAddr, Vec<u8>)> {
        self.inner.receive(sock)
    }

    fn is_local(&self, addr: &NetAddr) -> bool {
        self.inner.is_local(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LoopbackTransport;

    #[test]
    fn test_disabled_never_drops() {
        let sim = PacketLossSimulation {
            loss_percent: 100.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!sim.should_drop(&mut rng));
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        };
        let mut net = LossyTransport::new(LoopbackTransport::new(), sim).with_seed(7);
        net.send(NetSrc::Client, &NetAddr::LOOPBACK, b"x");
        assert!(net.receive(NetSrc::Server).is_none());
        assert_eq!(net.stats().packets_dropped, 1);
    }

    #[test]
    fn test_drop_rule() {
        let mut net = LossyTransport::new(LoopbackTransport::new(), Default::default())
            .with_drop_rule(|_, _, data| data[0] == 2);
        for i in 1..=3u8 {
            net.send(NetSrc::Client, &NetAddr::LOOPBACK, &[i]);
        }
        assert_eq!(net.receive(NetSrc::Server).unwrap().1, vec![1]);
        assert_eq!(net.receive(NetSrc::Server).unwrap().1, vec![3]);
    }

    #[test]
    fn test_latency_holds_until_flush() {
        let sim = PacketLossSimulation {
            enabled: true,
            min_latency_ms: 50,
            max_latency_ms: 50,
            ..Default::default()
        };
        let mut net = LossyTransport::new(LoopbackTransport::new(), sim).with_seed(3);
        net.flush(1000);
        net.send(NetSrc::Client, &NetAddr::LOOPBACK, b"late");
        assert!(net.receive(NetSrc::Server).is_none());

        net.flush(1049);
        assert!(net.receive(NetSrc::Server).is_none());
        net.flush(1050);
        assert_eq!(net.receive(NetSrc::Server).unwrap().1, b"late");
    }
}
