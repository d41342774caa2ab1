use std::collections::VecDeque;

use crate::msg::{MsgError, OverflowPolicy, SizeBuf};
use crate::net::{NetAddr, NetChan, NetSrc};
use crate::net::oob::info_value;
use crate::protocol::MAX_MSGLEN;
use crate::snapshot::{EntitySpan, FrameHistory, PlayerState, UserCmd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Connected, still signing on.
    Connected,
    /// Receiving frames.
    Spawned,
}

/// What a client was sent in one frame, kept so later frames can be
/// encoded against it.
#[derive(Debug, Clone, Copy)]
pub struct SentFrame {
    pub player: PlayerState,
    pub entities: EntitySpan,
    pub sent_time: u64,
}

pub struct ClientSlot {
    pub state: SlotState,
    pub chan: NetChan,
    pub userinfo: String,
    pub name: String,
    /// Last frame the client reported holding, -1 if none.
    pub last_frame: i32,
    pub frames: FrameHistory<SentFrame>,
    pub player: PlayerState,
    pub last_cmd: UserCmd,
    pub ping: u64,
    pub bad_packets: u32,
    /// Consecutive timeout checks this client has failed.
    pub timeout_count: u32,
    /// Unreliable extras appended to the next frame.
    pub datagram: SizeBuf,
    /// Reliable messages waiting for room in the channel.
    backlog: VecDeque<Vec<u8>>,
}

impl ClientSlot {
    pub fn new(addr: NetAddr, qport: u16, userinfo: &str, update_backup: usize, now: u64) -> Self {
        let mut slot = Self {
            state: SlotState::Connected,
            chan: NetChan::new(NetSrc::Server, addr, qport, now),
            userinfo: String::new(),
            name: String::new(),
            last_frame: -1,
            frames: FrameHistory::new(update_backup),
            player: PlayerState::default(),
            last_cmd: UserCmd::default(),
            ping: 0,
            bad_packets: 0,
            timeout_count: 0,
            datagram: SizeBuf::with_policy(MAX_MSGLEN, OverflowPolicy::Flag),
            backlog: VecDeque::new(),
        };
        slot.set_userinfo(userinfo);
        slot
    }

    pub fn addr(&self) -> NetAddr {
        self.chan.remote()
    }

    pub fn set_userinfo(&mut self, userinfo: &str) {
        self.userinfo = userinfo.to_string();
        self.name = info_value(userinfo, "name").unwrap_or("unnamed").to_string();
    }

    /// True for the client behind `from` with this qport. Loopback clients
    /// send no qport.
    pub fn matches(&self, from: &NetAddr, qport: Option<u16>) -> bool {
        let remote = self.chan.remote();
        if !remote.compare_base(from) {
            return false;
        }
        match qport {
            Some(qport) => qport == self.chan.qport(),
            None => remote.port == from.port,
        }
    }

    /// Queues one reliable message, built by `write`.
    pub fn queue_reliable(
        &mut self,
        write: impl FnOnce(&mut SizeBuf) -> Result<(), MsgError>,
    ) -> Result<(), MsgError> {
        let mut buf = SizeBuf::new(MAX_MSGLEN);
        write(&mut buf)?;
        self.backlog.push_back(buf.data().to_vec());
        Ok(())
    }

    pub fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// Moves queued reliable messages into the channel while they fit.
    pub fn flush_backlog(&mut self) -> Result<(), MsgError> {
        while let Some(next) = self.backlog.front() {
            if next.len() > self.chan.message.remaining_space() {
                break;
            }
            self.chan.message.write(next)?;
            self.backlog.pop_front();
        }
        Ok(())
    }

    /// Whether this slot owes the client a packet this frame outside of
    /// regular frames.
    pub fn wants_transmit(&self, now: u64) -> bool {
        self.has_backlog()
            || !self.chan.message.is_empty()
            || self.chan.reliable_pending()
            || now.saturating_sub(self.chan.last_sent()) >= 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ServerMessage;
    use crate::net::LoopbackTransport;

    #[test]
    fn test_qport_matching() {
        let addr = NetAddr::ip([192, 168, 1, 5], 27901);
        let slot = ClientSlot::new(addr, 777, "\\name\\bob", 16, 0);

        assert_eq!(slot.name, "bob");
        assert!(slot.matches(&addr.with_port(40000), Some(777)));
        assert!(!slot.matches(&addr, Some(778)));
        assert!(!slot.matches(&NetAddr::ip([192, 168, 1, 6], 27901), Some(777)));
    }

    #[test]
    fn test_backlog_waits_for_room() {
        let mut slot = ClientSlot::new(NetAddr::LOOPBACK, 0, "", 16, 0);
        let big = "x".repeat(1000);
        for _ in 0..2 {
            slot.queue_reliable(|msg| ServerMessage::StuffText(big.clone()).write(msg))
                .unwrap();
        }

        slot.flush_backlog().unwrap();
        assert!(slot.has_backlog());
        assert!(!slot.chan.message.overflowed());

        // Sending moves the first into the reliable slot, making room.
        let mut net = LoopbackTransport::new();
        slot.chan.transmit(&mut net, 0, &[]).unwrap();
        slot.flush_backlog().unwrap();
        assert!(!slot.has_backlog());
    }
}
