//! Server side of a session: client slots, the connectionless handshake and
//! per-client frame encoding.

mod challenge;
mod config;
mod events;
mod oob;
mod slots;
mod user;

use std::collections::VecDeque;

pub use challenge::{ChallengeGenerator, ChallengeTable, MAX_CHALLENGES, RandomChallenges};
pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use slots::{ClientSlot, SentFrame, SlotState};

use crate::configstrings::{CS_MAXCLIENTS, CS_NAME, ConfigStringError, ConfigStrings};
use crate::messages::{ServerMessage, SoundMessage};
use crate::msg::{MsgError, OverflowPolicy, SizeBuf};
use crate::net::oob::is_connectionless;
use crate::net::{ChannelError, NetAddr, NetSrc, Transport};
use crate::protocol::{MAX_EDICTS, MAX_MSGLEN, PACKET_HEADER, ProtocolError, ServerOp};
use crate::snapshot::{EntityRing, EntitySpan, EntityState, FrameView, PlayerState, write_frame};

/// Runs remote console commands that passed the password check. The
/// returned text goes back to the sender as a `print`.
pub trait RconHandler {
    fn execute(
        &mut self,
        session: &mut ServerSession,
        net: &mut dyn Transport,
        command: &str,
        now: u64,
    ) -> String;
}

impl<F> RconHandler for F
where
    F: FnMut(&mut ServerSession, &mut dyn Transport, &str, u64) -> String,
{
    fn execute(
        &mut self,
        session: &mut ServerSession,
        net: &mut dyn Transport,
        command: &str,
        now: u64,
    ) -> String {
        self(session, net, command, now)
    }
}

pub struct ServerSession {
    config: ServerConfig,
    slots: Vec<Option<ClientSlot>>,
    challenges: ChallengeTable,
    rcon: Option<Box<dyn RconHandler>>,
    configstrings: ConfigStrings,
    baselines: Vec<EntityState>,
    /// World as of the current frame, sorted by number.
    entities: Vec<EntityState>,
    ring: EntityRing,
    frame_number: i32,
    server_count: i32,
    next_frame_time: u64,
    pending_events: VecDeque<ServerEvent>,
}

impl ServerSession {
    pub fn new(config: ServerConfig) -> Self {
        let mut configstrings = ConfigStrings::new();
        // Both fit their slots.
        let _ = configstrings.set(CS_NAME, &config.map_name);
        let _ = configstrings.set(CS_MAXCLIENTS, &config.max_clients.to_string());

        Self {
            slots: (0..config.max_clients).map(|_| None).collect(),
            challenges: ChallengeTable::new(
                MAX_CHALLENGES,
                Box::new(RandomChallenges::default()),
            ),
            rcon: None,
            configstrings,
            baselines: vec![EntityState::default(); MAX_EDICTS],
            entities: Vec::new(),
            ring: EntityRing::new(config.entity_ring_size),
            frame_number: 0,
            server_count: 1,
            next_frame_time: 0,
            pending_events: VecDeque::new(),
            config,
        }
    }

    pub fn with_challenges(mut self, generator: impl ChallengeGenerator + 'static) -> Self {
        self.challenges.set_generator(Box::new(generator));
        self
    }

    pub fn set_rcon_handler(&mut self, handler: impl RconHandler + 'static) {
        self.rcon = Some(Box::new(handler));
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn frame_number(&self) -> i32 {
        self.frame_number
    }

    pub fn server_count(&self) -> i32 {
        self.server_count
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn client(&self, slot: usize) -> Option<&ClientSlot> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn clients(&self) -> impl Iterator<Item = (usize, &ClientSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    pub fn client_state(&self, slot: usize) -> Option<SlotState> {
        self.client(slot).map(|c| c.state)
    }

    pub fn connected_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn configstrings(&self) -> &ConfigStrings {
        &self.configstrings
    }

    /// Updates a configstring and sends the change to every client.
    pub fn set_configstring(&mut self, index: usize, value: &str) -> Result<(), ConfigStringError> {
        if self.configstrings.set(index, value)? {
            self.queue_for_all(&ServerMessage::ConfigString {
                index: index as u16,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    /// State new entities of this number are delta'd from by clients.
    pub fn set_baseline(&mut self, state: EntityState) {
        match self.baselines.get_mut(state.number as usize) {
            Some(slot) if state.number != 0 => *slot = state,
            _ => log::warn!("set_baseline: bad entity number {}", state.number),
        }
    }

    /// Replaces the world for the next frame.
    pub fn set_entities(&mut self, entities: impl IntoIterator<Item = EntityState>) {
        self.entities.clear();
        for state in entities {
            if state.number == 0 || state.number as usize >= MAX_EDICTS {
                log::warn!("set_entities: bad entity number {}", state.number);
                continue;
            }
            self.entities.push(state);
        }
        self.entities.sort_by_key(|e| e.number);
        self.entities.dedup_by_key(|e| e.number);
    }

    pub fn set_player_state(&mut self, slot: usize, player: PlayerState) {
        if let Some(client) = self.slots.get_mut(slot).and_then(Option::as_mut) {
            client.player = player;
        }
    }

    /// Queues a reliable message for one client.
    pub fn send_reliable(&mut self, slot: usize, message: &ServerMessage) -> Result<(), MsgError> {
        match self.slots.get_mut(slot).and_then(Option::as_mut) {
            Some(client) => client.queue_reliable(|msg| message.write(msg)),
            None => Ok(()),
        }
    }

    pub fn broadcast_print(&mut self, level: u8, text: &str) {
        self.queue_for_all(&ServerMessage::Print {
            level,
            text: text.to_string(),
        });
    }

    /// Sends a sound with the next frame to every spawned client.
    pub fn start_sound(&mut self, sound: SoundMessage) {
        let message = ServerMessage::Sound(sound);
        for client in self.slots.iter_mut().flatten() {
            if client.state == SlotState::Spawned {
                // Flag policy: an overflow just loses this frame's extras.
                let _ = message.write(&mut client.datagram);
            }
        }
    }

    fn queue_for_all(&mut self, message: &ServerMessage) {
        for client in self.slots.iter_mut().flatten() {
            if let Err(e) = client.queue_reliable(|msg| message.write(msg)) {
                log::warn!("{}: dropped reliable message: {}", client.addr(), e);
            }
        }
    }

    /// One server tick: reads everything pending and, once the frame interval
    /// has passed, checks for silent clients and sends a frame.
    pub fn run_frame(&mut self, net: &mut impl Transport, now: u64) {
        self.process_packets(net, now);

        if now >= self.next_frame_time {
            self.check_timeouts(net, now);
            self.advance_frame(net, now);
            self.next_frame_time = if now - self.next_frame_time > self.config.frame_interval_ms {
                now + self.config.frame_interval_ms
            } else {
                self.next_frame_time + self.config.frame_interval_ms
            };
        }
    }

    pub fn process_packets(&mut self, net: &mut impl Transport, now: u64) {
        while let Some((from, data)) = net.receive(NetSrc::Server) {
            if is_connectionless(&data) {
                self.connectionless_packet(net, &from, &data[4..], now);
            } else {
                self.sequenced_packet(net, &from, &data, now);
            }
        }
    }

    fn sequenced_packet(&mut self, net: &mut impl Transport, from: &NetAddr, data: &[u8], now: u64) {
        let qport = if from.is_loopback() {
            None
        } else if data.len() >= PACKET_HEADER {
            Some(u16::from_le_bytes([data[8], data[9]]))
        } else {
            log::debug!("{}: runt packet", from);
            return;
        };

        let Some(index) = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.matches(from, qport)))
        else {
            log::debug!("{}: sequenced packet without connection", from);
            return;
        };
        let Some(client) = self.slots[index].as_mut() else {
            return;
        };

        if client.addr().port != from.port {
            log::info!("{}: fixing up a translated port", from);
            client.chan.set_remote_port(from.port);
        }

        let mut msg = SizeBuf::from_bytes(data);
        if !client.chan.process(&mut msg, now) {
            return;
        }

        match self.execute_client_message(net, index, &mut msg, now) {
            Ok(()) => {}
            Err(ProtocolError::UnknownOpcode(op)) => {
                log::warn!("{}: unknown command byte {}", from, op);
                self.drop_client(net, index, DisconnectReason::BadPackets, now);
            }
            Err(e) => {
                let Some(client) = self.slots[index].as_mut() else {
                    return;
                };
                client.bad_packets += 1;
                log::warn!(
                    "{}: bad packet ({} of {}): {}",
                    from,
                    client.bad_packets,
                    self.config.bad_packet_limit,
                    e
                );
                if client.bad_packets >= self.config.bad_packet_limit {
                    self.drop_client(net, index, DisconnectReason::BadPackets, now);
                }
            }
        }
    }

    /// Drops clients that have been silent past `timeout_ms` on more than
    /// `timeout_checks` consecutive checks. Any traffic resets the count.
    pub fn check_timeouts(&mut self, net: &mut impl Transport, now: u64) {
        let mut timed_out = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(client) = slot else {
                continue;
            };
            if !client.chan.is_timed_out(now, self.config.timeout_ms) {
                client.timeout_count = 0;
                continue;
            }
            client.timeout_count += 1;
            if client.timeout_count > self.config.timeout_checks {
                timed_out.push(index);
            }
        }

        for index in timed_out {
            self.drop_client(net, index, DisconnectReason::Timeout, now);
        }
    }

    /// Captures the world as a new frame and sends it to spawned clients.
    /// Clients still signing on only get their reliable traffic.
    pub fn advance_frame(&mut self, net: &mut impl Transport, now: u64) {
        self.frame_number += 1;
        let span = self.ring.push_all(&self.entities);
        let send_frames = self.frame_number as u32 % self.config.snapshot_interval.max(1) == 0;

        for index in 0..self.slots.len() {
            let Some(client) = self.slots[index].as_mut() else {
                continue;
            };

            let result = if client.state == SlotState::Spawned && send_frames {
                self.send_client_frame(net, index, span, now)
            } else if client.wants_transmit(now) {
                send_reliables(client, net, now)
            } else {
                Ok(())
            };

            if let Err(e) = result {
                log::warn!("client {}: {}", index, e);
                self.drop_client(net, index, DisconnectReason::Overflow, now);
            }
        }
    }

    fn send_client_frame(
        &mut self,
        net: &mut impl Transport,
        index: usize,
        span: EntitySpan,
        now: u64,
    ) -> Result<(), ChannelError> {
        let Some(client) = self.slots[index].as_mut() else {
            return Ok(());
        };

        let mut msg = SizeBuf::with_policy(MAX_MSGLEN - PACKET_HEADER, OverflowPolicy::Flag);
        write_client_frame(
            client,
            &self.ring,
            &self.entities,
            self.frame_number,
            self.config.update_backup,
            &mut msg,
        )?;

        if msg.overflowed() {
            log::warn!("{}: frame {} overflowed", client.addr(), self.frame_number);
            msg.clear();
        }
        if !client.datagram.overflowed() && msg.remaining_space() >= client.datagram.len() {
            msg.write(client.datagram.data())?;
        }
        client.datagram.clear();

        client.frames.push(
            self.frame_number,
            SentFrame {
                player: client.player,
                entities: span,
                sent_time: now,
            },
        );

        client.flush_backlog()?;
        client.chan.transmit(net, now, msg.data())
    }

    pub fn kick_client(&mut self, net: &mut impl Transport, slot: usize, now: u64) {
        self.drop_client(net, slot, DisconnectReason::Kicked, now);
    }

    /// Frees a slot after telling the client, best effort.
    pub fn drop_client(
        &mut self,
        net: &mut impl Transport,
        slot: usize,
        reason: DisconnectReason,
        now: u64,
    ) {
        let Some(mut client) = self.slots.get_mut(slot).and_then(Option::take) else {
            return;
        };

        client.chan.message.clear();
        if let Err(e) = client.chan.transmit(net, now, &[ServerOp::Disconnect as u8]) {
            log::debug!("{}: final message failed: {}", client.addr(), e);
        }

        log::info!("{} ({}) {}", client.name, client.addr(), reason.as_str());
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { slot, reason });
    }

    pub fn shutdown(&mut self, net: &mut impl Transport, now: u64) {
        for slot in 0..self.slots.len() {
            self.drop_client(net, slot, DisconnectReason::Kicked, now);
        }
    }
}

fn send_reliables(
    client: &mut ClientSlot,
    net: &mut impl Transport,
    now: u64,
) -> Result<(), ChannelError> {
    client.flush_backlog()?;
    client.chan.transmit(net, now, &[])
}

/// Encodes this frame for one client against the last frame it reported,
/// falling back to a full frame when that one is unusable.
fn write_client_frame(
    client: &ClientSlot,
    ring: &EntityRing,
    entities: &[EntityState],
    frame_number: i32,
    update_backup: usize,
    msg: &mut SizeBuf,
) -> Result<(), MsgError> {
    let last = client.last_frame;
    let reference = if last <= 0 || frame_number - last >= update_backup as i32 {
        None
    } else {
        client
            .frames
            .get(last)
            .and_then(|f| ring.collect(f.entities).map(|ents| (f.player, ents)))
    };

    if reference.is_none() && last > 0 {
        log::debug!(
            "{}: delta request from out-of-date frame {} at {}",
            client.addr(),
            last,
            frame_number
        );
    }

    let to = FrameView {
        number: frame_number,
        player: &client.player,
        entities,
    };
    let from = reference.as_ref().map(|(player, ents)| FrameView {
        number: last,
        player,
        entities: ents,
    });
    write_frame(msg, to, from)
}
