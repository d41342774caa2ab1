//! Sequenced datagram channel with a single in-flight reliable message.
//!
//! Packet header:
//!
//! ```text
//! 31 bits  sequence
//!  1 bit   this packet carries the reliable message
//! 31 bits  last sequence received from the peer
//!  1 bit   reliable bit of the last reliable message received
//! 16 bits  qport, client to server only, omitted on loopback
//! ```
//!
//! A reliable message is sent once and resent only after the peer has
//! acknowledged a later packet without flipping its reliable bit, which
//! means the packet carrying it was lost. A new reliable message is not
//! started until the previous one is acknowledged.

use super::address::NetAddr;
use super::transport::{NetSrc, Transport};
use crate::msg::{MsgError, OverflowPolicy, SizeBuf};
use crate::protocol::MAX_MSGLEN;

/// Room kept free for the header and qport when staging reliable data.
const RELIABLE_HEADROOM: usize = 16;

const RELIABLE_BIT: u32 = 1 << 31;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("outgoing reliable message overflow to {0}")]
    Overflow(NetAddr),
    #[error(transparent)]
    Msg(#[from] MsgError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub reliable: bool,
    pub ack: u32,
    pub ack_reliable: bool,
}

impl PacketHeader {
    pub fn write(&self, buf: &mut SizeBuf) -> Result<(), MsgError> {
        buf.write_long(pack(self.sequence, self.reliable) as i32)?;
        buf.write_long(pack(self.ack, self.ack_reliable) as i32)
    }

    pub fn read(buf: &mut SizeBuf) -> Result<Self, MsgError> {
        let (sequence, reliable) = unpack(buf.read_long()? as u32);
        let (ack, ack_reliable) = unpack(buf.read_long()? as u32);
        Ok(Self {
            sequence,
            reliable,
            ack,
            ack_reliable,
        })
    }
}

fn pack(sequence: u32, bit: bool) -> u32 {
    (sequence & !RELIABLE_BIT) | if bit { RELIABLE_BIT } else { 0 }
}

fn unpack(word: u32) -> (u32, bool) {
    (word & !RELIABLE_BIT, word & RELIABLE_BIT != 0)
}

#[derive(Debug)]
pub struct NetChan {
    sock: NetSrc,
    remote: NetAddr,
    qport: u16,

    /// Packets lost before the last accepted one.
    dropped: u32,
    total_dropped: u32,

    last_received: u64,
    last_sent: u64,

    incoming_sequence: u32,
    incoming_acknowledged: u32,
    incoming_reliable_acknowledged: bool,
    incoming_reliable_sequence: bool,

    outgoing_sequence: u32,
    reliable_sequence: bool,
    last_reliable_sequence: u32,

    /// Reliable data staged by the owner. Moved to `reliable_buf` once the
    /// previous reliable message is acknowledged.
    pub message: SizeBuf,
    reliable_buf: Vec<u8>,
}

impl NetChan {
    pub fn new(sock: NetSrc, remote: NetAddr, qport: u16, now: u64) -> Self {
        Self {
            sock,
            remote,
            qport,
            dropped: 0,
            total_dropped: 0,
            last_received: now,
            last_sent: now,
            incoming_sequence: 0,
            incoming_acknowledged: 0,
            incoming_reliable_acknowledged: false,
            incoming_reliable_sequence: false,
            outgoing_sequence: 1,
            reliable_sequence: false,
            last_reliable_sequence: 0,
            message: SizeBuf::with_policy(MAX_MSGLEN - RELIABLE_HEADROOM, OverflowPolicy::Flag),
            reliable_buf: Vec::new(),
        }
    }

    pub fn remote(&self) -> NetAddr {
        self.remote
    }

    /// Follows a client whose NAT mapping moved it to another port.
    pub fn set_remote_port(&mut self, port: u16) {
        self.remote.port = port;
    }

    pub fn qport(&self) -> u16 {
        self.qport
    }

    pub fn sock(&self) -> NetSrc {
        self.sock
    }

    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    pub fn incoming_sequence(&self) -> u32 {
        self.incoming_sequence
    }

    pub fn incoming_acknowledged(&self) -> u32 {
        self.incoming_acknowledged
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn total_dropped(&self) -> u32 {
        self.total_dropped
    }

    pub fn last_received(&self) -> u64 {
        self.last_received
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    fn has_qport(&self) -> bool {
        !self.remote.is_loopback()
    }

    /// True while a reliable message is waiting for its acknowledgement.
    pub fn reliable_pending(&self) -> bool {
        !self.reliable_buf.is_empty()
    }

    /// Whether the next packet has to carry the reliable message.
    pub fn need_reliable(&self) -> bool {
        // The peer acked a packet after our last reliable one but its bit
        // didn't flip, so that packet was lost.
        if self.incoming_acknowledged > self.last_reliable_sequence
            && self.incoming_reliable_acknowledged != self.reliable_sequence
        {
            return true;
        }

        self.reliable_buf.is_empty() && !self.message.is_empty()
    }

    pub fn is_timed_out(&self, now: u64, timeout_ms: u64) -> bool {
        now.saturating_sub(self.last_received) > timeout_ms
    }

    /// Sends one packet carrying the reliable message if needed, followed by
    /// `data` if it fits.
    pub fn transmit(
        &mut self,
        net: &mut impl Transport,
        now: u64,
        data: &[u8],
    ) -> Result<(), ChannelError> {
        if self.message.overflowed() {
            log::warn!("{}: outgoing message overflow", self.remote);
            return Err(ChannelError::Overflow(self.remote));
        }

        let send_reliable = self.need_reliable();

        if self.reliable_buf.is_empty() && !self.message.is_empty() {
            self.reliable_buf = self.message.data().to_vec();
            self.message.clear();
            self.reliable_sequence = !self.reliable_sequence;
        }

        let header = PacketHeader {
            sequence: self.outgoing_sequence,
            reliable: send_reliable,
            ack: self.incoming_sequence,
            ack_reliable: self.incoming_reliable_sequence,
        };
        self.outgoing_sequence += 1;
        self.last_sent = now;

        let mut send = SizeBuf::new(MAX_MSGLEN);
        header.write(&mut send)?;
        if self.sock == NetSrc::Client && self.has_qport() {
            send.write_short(self.qport as i16)?;
        }

        if send_reliable {
            send.write(&self.reliable_buf)?;
            self.last_reliable_sequence = header.sequence;
        }

        if send.remaining_space() >= data.len() {
            send.write(data)?;
        } else {
            log::debug!("{}: dumped unreliable ({} bytes)", self.remote, data.len());
        }

        log::trace!(
            "send {:4} : s={} ack={} rack={}",
            send.len(),
            header.sequence,
            header.ack,
            header.ack_reliable as u8
        );

        net.send(self.sock, &self.remote, send.data());
        Ok(())
    }

    /// Consumes the header of an in-band packet. Returns false for stale,
    /// duplicate or truncated packets, which the caller discards. On success
    /// the read cursor sits at the payload, reliable bytes first.
    pub fn process(&mut self, msg: &mut SizeBuf, now: u64) -> bool {
        msg.begin_reading();
        let header = match PacketHeader::read(msg) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("{}: short packet: {}", self.remote, e);
                return false;
            }
        };

        if self.sock == NetSrc::Server && self.has_qport() && msg.read_short().is_err() {
            log::debug!("{}: packet missing qport", self.remote);
            return false;
        }

        if header.sequence <= self.incoming_sequence {
            log::debug!(
                "{}: out of order packet {} at {}",
                self.remote,
                header.sequence,
                self.incoming_sequence
            );
            return false;
        }

        self.dropped = header.sequence - (self.incoming_sequence + 1);
        if self.dropped > 0 {
            self.total_dropped += self.dropped;
            log::debug!(
                "{}: dropped {} packets at {}",
                self.remote,
                self.dropped,
                header.sequence
            );
        }

        // The peer has our last reliable message.
        if header.ack_reliable == self.reliable_sequence {
            self.reliable_buf.clear();
        }

        self.incoming_sequence = header.sequence;
        self.incoming_acknowledged = header.ack;
        self.incoming_reliable_acknowledged = header.ack_reliable;
        if header.reliable {
            self.incoming_reliable_sequence = !self.incoming_reliable_sequence;
        }

        self.last_received = now;
        true
    }
}
