use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::net::NetAddr;

pub const MAX_CHALLENGES: usize = 1024;

/// Source of connection challenges.
pub trait ChallengeGenerator {
    fn next_challenge(&mut self) -> i32;
}

impl<F: FnMut() -> i32> ChallengeGenerator for F {
    fn next_challenge(&mut self) -> i32 {
        self()
    }
}

pub struct RandomChallenges(StdRng);

impl Default for RandomChallenges {
    fn default() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl ChallengeGenerator for RandomChallenges {
    fn next_challenge(&mut self) -> i32 {
        self.0.gen_range(0..i32::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
struct Challenge {
    addr: NetAddr,
    challenge: i32,
    issued: u64,
}

/// Challenges handed out to hosts that may connect next, one per host.
pub struct ChallengeTable {
    entries: Vec<Challenge>,
    capacity: usize,
    generator: Box<dyn ChallengeGenerator>,
}

impl ChallengeTable {
    pub fn new(capacity: usize, generator: Box<dyn ChallengeGenerator>) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            generator,
        }
    }

    pub fn set_generator(&mut self, generator: Box<dyn ChallengeGenerator>) {
        self.generator = generator;
    }

    /// The host's current challenge, or a fresh one. A full table gives up
    /// its oldest entry.
    pub fn issue(&mut self, addr: &NetAddr, now: u64) -> i32 {
        if let Some(entry) = self.entries.iter().find(|e| e.addr.compare_base(addr)) {
            return entry.challenge;
        }

        let entry = Challenge {
            addr: *addr,
            challenge: self.generator.next_challenge() & 0x7fff_ffff,
            issued: now,
        };

        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else if let Some(oldest) = self.entries.iter_mut().min_by_key(|e| e.issued) {
            *oldest = entry;
        }
        entry.challenge
    }

    /// `None` if the host never asked for a challenge.
    pub fn matches(&self, addr: &NetAddr, challenge: i32) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| e.addr.compare_base(addr))
            .map(|e| e.challenge == challenge)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting() -> Box<dyn ChallengeGenerator> {
        let mut next = 100;
        Box::new(move || {
            next += 1;
            next
        })
    }

    #[test]
    fn test_same_host_same_challenge() {
        let mut table = ChallengeTable::new(4, counting());
        let a = NetAddr::ip([10, 0, 0, 1], 5000);

        let first = table.issue(&a, 0);
        assert_eq!(table.issue(&a.with_port(6000), 10), first);
        assert_eq!(table.matches(&a, first), Some(true));
        assert_eq!(table.matches(&a, first + 1), Some(false));
        assert_eq!(table.matches(&NetAddr::ip([10, 0, 0, 2], 5000), first), None);
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let mut table = ChallengeTable::new(2, counting());
        let hosts: Vec<NetAddr> = (1..=3).map(|i| NetAddr::ip([10, 0, 0, i], 1)).collect();

        table.issue(&hosts[0], 5);
        table.issue(&hosts[1], 1);
        table.issue(&hosts[2], 9);

        assert_eq!(table.len(), 2);
        assert!(table.matches(&hosts[0], 101).is_some());
        assert!(table.matches(&hosts[1], 102).is_none());
        assert_eq!(table.matches(&hosts[2], 103), Some(true));
    }
}
