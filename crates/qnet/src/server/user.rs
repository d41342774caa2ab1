use super::{DisconnectReason, ServerEvent, ServerSession, SlotState};
use crate::messages::{ClientMessage, ServerData, ServerMessage};
use crate::net::Transport;
use crate::net::oob::tokenize;
use crate::protocol::{PROTOCOL_VERSION, ProtocolError};
use crate::msg::SizeBuf;
use crate::snapshot::{EntityState, MoveCommand};

/// Lost packets beyond this many are not made up for with old commands.
const MAX_REPLAYED_DROPS: u32 = 20;

impl ServerSession {
    /// Runs every message in one accepted packet. Stops early if the client
    /// went away while handling it.
    pub(super) fn execute_client_message(
        &mut self,
        net: &mut impl Transport,
        index: usize,
        msg: &mut SizeBuf,
        now: u64,
    ) -> Result<(), ProtocolError> {
        let mut moved = false;

        while let Some(message) = ClientMessage::read(msg)? {
            let Some(client) = self.slots[index].as_mut() else {
                return Ok(());
            };

            match message {
                ClientMessage::Nop => {}
                ClientMessage::UserInfo(userinfo) => {
                    client.set_userinfo(&userinfo);
                    self.pending_events.push_back(ServerEvent::UserInfoChanged {
                        slot: index,
                        userinfo,
                    });
                }
                ClientMessage::Move(mv) => {
                    if moved {
                        log::warn!("{}: second move in one packet", client.addr());
                        return Ok(());
                    }
                    moved = true;
                    self.client_move(index, mv, now);
                }
                ClientMessage::StringCmd(text) => {
                    if !self.string_command(net, index, &text, now)? {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    fn client_move(&mut self, index: usize, mv: MoveCommand, now: u64) {
        let Some(client) = self.slots[index].as_mut() else {
            return;
        };

        if mv.last_frame != client.last_frame {
            client.last_frame = mv.last_frame;
            if let Some(frame) = client.frames.get(mv.last_frame) {
                client.ping = now.saturating_sub(frame.sent_time);
            }
        }

        if client.state != SlotState::Spawned {
            return;
        }

        let [oldest, older, newest] = mv.cmds;
        let dropped = client.chan.dropped();
        let mut cmds = Vec::new();
        if dropped < MAX_REPLAYED_DROPS {
            for _ in 2..dropped {
                cmds.push(client.last_cmd);
            }
            if dropped > 1 {
                cmds.push(oldest);
            }
            if dropped > 0 {
                cmds.push(older);
            }
        }
        cmds.push(newest);
        client.last_cmd = newest;

        self.pending_events.extend(
            cmds.into_iter()
                .map(|cmd| ServerEvent::UserCommand { slot: index, cmd }),
        );
    }

    /// Returns false if the client was dropped.
    fn string_command(
        &mut self,
        net: &mut impl Transport,
        index: usize,
        text: &str,
        now: u64,
    ) -> Result<bool, ProtocolError> {
        let argv = tokenize(text);
        match argv.first().map(String::as_str) {
            Some("new") => self.send_sign_on(index)?,
            Some("begin") => {
                let count = argv.get(1).and_then(|c| c.parse::<i32>().ok());
                self.begin(index, count)?;
            }
            Some("disconnect") => {
                self.drop_client(net, index, DisconnectReason::Graceful, now);
                return Ok(false);
            }
            Some(_) => self.pending_events.push_back(ServerEvent::ClientCommand {
                slot: index,
                text: text.to_string(),
            }),
            None => {}
        }
        Ok(true)
    }

    /// Queues everything a client needs before its first frame, ending with
    /// the `precache` command it answers with `begin`.
    fn send_sign_on(&mut self, index: usize) -> Result<(), ProtocolError> {
        let Some(client) = self.slots[index].as_mut() else {
            return Ok(());
        };
        if client.state != SlotState::Connected {
            log::debug!("{}: new not valid, already spawned", client.addr());
            return Ok(());
        }
        log::debug!("{}: sign-on for slot {}", client.addr(), index);

        let data = ServerMessage::ServerData(ServerData {
            protocol: PROTOCOL_VERSION,
            server_count: self.server_count,
            attract_loop: false,
            game_dir: self.config.game_dir.clone(),
            player_num: index as i16,
            level_name: self.config.map_name.clone(),
        });
        client.queue_reliable(|msg| data.write(msg))?;

        for (i, value) in self.configstrings.iter() {
            let message = ServerMessage::ConfigString {
                index: i as u16,
                value: value.to_string(),
            };
            client.queue_reliable(|msg| message.write(msg))?;
        }

        for baseline in self.baselines.iter().filter(|b| **b != EntityState::new(b.number)) {
            let message = ServerMessage::SpawnBaseline(*baseline);
            client.queue_reliable(|msg| message.write(msg))?;
        }

        let precache = ServerMessage::StuffText(format!("precache {}\n", self.server_count));
        client.queue_reliable(|msg| precache.write(msg))?;
        Ok(())
    }

    fn begin(&mut self, index: usize, count: Option<i32>) -> Result<(), ProtocolError> {
        let Some(client) = self.slots[index].as_mut() else {
            return Ok(());
        };

        if count != Some(self.server_count) {
            log::info!("{}: begin from a different level", client.addr());
            return self.send_sign_on(index);
        }
        if client.state == SlotState::Spawned {
            return Ok(());
        }

        client.state = SlotState::Spawned;
        client.last_frame = -1;
        log::info!("{} ({}) entered the game", client.name, client.addr());
        self.pending_events
            .push_back(ServerEvent::ClientBegin { slot: index });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{LoopbackTransport, NetAddr, NetSrc};
    use crate::protocol::ServerOp;
    use crate::server::ServerConfig;

    fn connected() -> (ServerSession, LoopbackTransport) {
        let mut server = ServerSession::new(ServerConfig::default());
        let mut net = LoopbackTransport::new();
        server.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"connect 34 1 0 \"\"", 0);
        net.receive(NetSrc::Client).unwrap();
        server.drain_events().count();
        (server, net)
    }

    fn run(server: &mut ServerSession, net: &mut LoopbackTransport, messages: &[ClientMessage]) {
        let mut msg = SizeBuf::new(1400);
        for m in messages {
            m.write(&mut msg).unwrap();
        }
        server.execute_client_message(net, 0, &mut msg, 0).unwrap();
    }

    #[test]
    fn test_sign_on_then_begin() {
        let (mut server, mut net) = connected();
        server.set_baseline(EntityState {
            model_index: [2, 0, 0, 0],
            ..EntityState::new(5)
        });

        run(&mut server, &mut net, &[ClientMessage::StringCmd("new".into())]);
        let client = server.slots[0].as_mut().unwrap();
        client.flush_backlog().unwrap();
        let mut staged = SizeBuf::from_bytes(client.chan.message.data());
        assert_eq!(staged.read_byte().unwrap(), ServerOp::ServerData as u8);

        run(&mut server, &mut net, &[ClientMessage::StringCmd("begin 7".into())]);
        assert_eq!(server.client_state(0), Some(SlotState::Connected));

        run(&mut server, &mut net, &[ClientMessage::StringCmd("begin 1".into())]);
        assert_eq!(server.client_state(0), Some(SlotState::Spawned));
        assert!(matches!(
            server.drain_events().last(),
            Some(ServerEvent::ClientBegin { slot: 0 })
        ));
    }

    #[test]
    fn test_move_records_ack_and_emits_command() {
        let (mut server, mut net) = connected();
        run(&mut server, &mut net, &[ClientMessage::StringCmd("begin 1".into())]);
        server.drain_events().count();

        let mut mv = MoveCommand {
            last_frame: 12,
            ..Default::default()
        };
        mv.cmds[2].forward_move = 400;
        run(&mut server, &mut net, &[ClientMessage::Move(mv), ClientMessage::Move(mv)]);

        assert_eq!(server.client(0).unwrap().last_frame, 12);
        let events: Vec<_> = server.drain_events().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ServerEvent::UserCommand { slot: 0, cmd } if cmd.forward_move == 400
        ));
    }

    #[test]
    fn test_disconnect_frees_slot() {
        let (mut server, mut net) = connected();
        run(&mut server, &mut net, &[
            ClientMessage::StringCmd("disconnect".into()),
            ClientMessage::StringCmd("say hi".into()),
        ]);
        assert_eq!(server.connected_count(), 0);
        assert!(matches!(
            server.drain_events().next(),
            Some(ServerEvent::ClientDisconnected {
                slot: 0,
                reason: DisconnectReason::Graceful
            })
        ));

        let (_, data) = net.receive(NetSrc::Client).unwrap();
        assert_eq!(data[8..], [ServerOp::Disconnect as u8]);
    }
}
