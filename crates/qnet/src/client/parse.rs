use std::io::Write;

use super::{ClientEvent, ClientSession, ClientState};
use crate::configstrings::{ConfigRange, ConfigStringError};
use crate::demo::{DemoError, DemoWriter};
use crate::messages::{ClientMessage, ServerData, ServerMessage};
use crate::msg::SizeBuf;
use crate::net::oob::tokenize;
use crate::protocol::{MAX_MSGLEN, PROTOCOL_VERSION, ProtocolError, ServerOp};
use crate::snapshot::{
    EntitySpan, EntityState, FrameHeader, PlayerState, read_frame_body, read_frame_header,
};

/// A decoded frame. Its entities live in the session's entity ring.
#[derive(Debug, Clone, Copy)]
pub struct ClientFrame {
    pub number: i32,
    pub delta_frame: i32,
    pub player: PlayerState,
    pub entities: EntitySpan,
    /// Local time the frame arrived.
    pub received: u64,
}

impl ClientSession {
    /// Runs every message in one packet. Returns false if the server said
    /// goodbye.
    pub(super) fn parse_server_message(
        &mut self,
        msg: &mut SizeBuf,
        now: u64,
    ) -> Result<bool, ProtocolError> {
        while !msg.is_exhausted() {
            let byte = msg.read_byte()?;
            let op = ServerOp::from_u8(byte).ok_or(ProtocolError::UnknownOpcode(byte))?;
            if op == ServerOp::Frame {
                self.parse_frame(msg, now)?;
                continue;
            }

            match ServerMessage::read(op, msg)? {
                ServerMessage::Nop => {}
                ServerMessage::Disconnect => return Ok(false),
                ServerMessage::Reconnect => {
                    self.server_reconnect();
                    return Ok(true);
                }
                ServerMessage::Sound(sound) => {
                    self.pending_events.push_back(ClientEvent::Sound(sound))
                }
                ServerMessage::Print { level, text } => {
                    log::info!("{}", text.trim_end());
                    self.pending_events
                        .push_back(ClientEvent::Print { level, text });
                }
                ServerMessage::CenterPrint(text) => {
                    self.pending_events.push_back(ClientEvent::CenterPrint(text))
                }
                ServerMessage::StuffText(text) => self.stuff_text(&text)?,
                ServerMessage::ServerData(data) => self.parse_server_data(data)?,
                ServerMessage::ConfigString { index, value } => {
                    self.parse_configstring(index as usize, value)?
                }
                ServerMessage::SpawnBaseline(state) => {
                    let number = state.number;
                    match self.baselines.get_mut(number as usize) {
                        Some(baseline) if number != 0 => *baseline = state,
                        _ => return Err(ProtocolError::BadEntityNumber(number as i32)),
                    }
                }
            }
        }
        Ok(true)
    }

    fn parse_server_data(&mut self, data: ServerData) -> Result<(), ProtocolError> {
        if data.protocol != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                server: data.protocol,
                client: PROTOCOL_VERSION,
            });
        }

        log::info!("{} ({})", data.level_name, data.game_dir);
        self.configstrings.clear();
        self.baselines.fill(EntityState::default());
        self.clear_frames();
        if self.state == ClientState::Active {
            self.state = ClientState::Connected;
        }

        self.server_data = Some(data.clone());
        self.pending_events.push_back(ClientEvent::ServerData(data));
        Ok(())
    }

    fn parse_configstring(&mut self, index: usize, value: String) -> Result<(), ProtocolError> {
        let range = ConfigRange::of(index).ok_or(ConfigStringError::OutOfRange(index))?;
        self.configstrings.set(index, &value)?;
        self.pending_events.push_back(ClientEvent::ConfigString {
            index,
            range,
            value,
        });
        Ok(())
    }

    /// `precache` ends the sign-on and is answered with `begin`. Other
    /// lines go to the console.
    fn stuff_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let argv = tokenize(line);
            if argv.first().map(String::as_str) != Some("precache") {
                self.pending_events
                    .push_back(ClientEvent::StuffText(line.to_string()));
                continue;
            }

            let count = match argv.get(1).and_then(|c| c.parse::<i32>().ok()) {
                Some(count) => count,
                None => self.server_data.as_ref().map_or(0, |d| d.server_count),
            };
            if let Some(chan) = self.chan.as_mut() {
                ClientMessage::StringCmd(format!("begin {}", count)).write(&mut chan.message)?;
            }
        }
        Ok(())
    }

    fn server_reconnect(&mut self) {
        log::info!("Server disconnected, reconnecting");
        self.chan = None;
        self.clear_frames();
        if self.server.is_some() {
            self.state = ClientState::Challenging;
            self.last_resend = None;
        } else {
            self.state = ClientState::Disconnected;
        }
        self.pending_events.push_back(ClientEvent::Reconnect);
    }

    /// Decodes a frame against the reference it names. A frame whose
    /// reference is gone is read and thrown away. The last good frame stays
    /// current and the next move asks for an uncompressed one.
    fn parse_frame(&mut self, msg: &mut SizeBuf, now: u64) -> Result<(), ProtocolError> {
        let header = read_frame_header(msg)?;

        if self.demo_waiting && header.is_full() {
            self.demo_waiting = false;
        }

        let reference = self.reference(&header);
        let (from_player, from_entities) = reference.clone().unwrap_or_default();
        let (player, entities) =
            read_frame_body(msg, &from_player, &from_entities)?;

        if reference.is_none() {
            log::debug!(
                "frame {}: delta from invalid frame {}",
                header.number,
                header.delta_frame
            );
            self.need_full_frame = true;
            return Ok(());
        }
        self.need_full_frame = false;

        let span = self.ring.push_all(&entities);
        self.frames.push(
            header.number,
            ClientFrame {
                number: header.number,
                delta_frame: header.delta_frame,
                player,
                entities: span,
                received: now,
            },
        );
        if self.frame.is_some() {
            self.old_frame = self.frame;
        }
        self.frame = Some(header.number);

        if self.state == ClientState::Connected {
            self.state = ClientState::Active;
            log::info!("entered the game at frame {}", header.number);
            self.pending_events.push_back(ClientEvent::Active);
        }
        self.pending_events.push_back(ClientEvent::Frame {
            number: header.number,
            delta_frame: header.delta_frame,
        });
        Ok(())
    }

    fn reference(&self, header: &FrameHeader) -> Option<(PlayerState, Vec<EntityState>)> {
        if header.is_full() {
            return Some((PlayerState::default(), Vec::new()));
        }
        let old = self.frames.get(header.delta_frame)?;
        let entities = self.ring.collect(old.entities)?;
        Some((old.player, entities))
    }

    pub fn current_frame(&self) -> Option<&ClientFrame> {
        self.frame.and_then(|n| self.frames.get(n))
    }

    pub(super) fn previous_frame(&self) -> Option<&ClientFrame> {
        self.old_frame.and_then(|n| self.frames.get(n))
    }

    /// Entities of a retained frame, if they haven't been overwritten.
    pub fn frame_entities(&self, frame: &ClientFrame) -> Option<Vec<EntityState>> {
        self.ring.collect(frame.entities)
    }

    pub fn is_recording(&self) -> bool {
        self.demo.is_some()
    }

    /// Starts recording everything the server sends. The recording opens
    /// with a sign-on built from what we already know and picks up at the
    /// next uncompressed frame.
    pub fn start_recording(&mut self, out: impl Write + 'static) -> Result<(), DemoError> {
        if self.demo.is_some() {
            return Err(DemoError::AlreadyRecording);
        }
        let Some(data) = self.server_data.clone() else {
            return Err(DemoError::NotActive);
        };
        if self.state != ClientState::Active {
            return Err(DemoError::NotActive);
        }

        let mut demo = DemoWriter::new(Box::new(out) as Box<dyn Write>);
        let mut buf = SizeBuf::new(MAX_MSGLEN);

        let mut sign_on = vec![ServerMessage::ServerData(data.clone())];
        sign_on.extend(self.configstrings.iter().map(|(index, value)| {
            ServerMessage::ConfigString {
                index: index as u16,
                value: value.to_string(),
            }
        }));
        sign_on.extend(
            self.baselines
                .iter()
                .filter(|b| b.number != 0)
                .map(|b| ServerMessage::SpawnBaseline(*b)),
        );
        sign_on.push(ServerMessage::StuffText(format!("precache {}\n", data.server_count)));

        for message in &sign_on {
            let mut one = SizeBuf::new(MAX_MSGLEN);
            if message.write(&mut one).is_err() {
                log::warn!("demo: sign-on message too large, skipped");
                continue;
            }
            if one.len() > buf.remaining_space() {
                demo.write_message(buf.data())?;
                buf.clear();
            }
            if buf.write(one.data()).is_err() {
                log::warn!("demo: sign-on message too large, skipped");
            }
        }
        demo.write_message(buf.data())?;

        log::info!("recording demo");
        self.demo = Some(demo);
        self.demo_waiting = true;
        Ok(())
    }

    /// Ends the recording, returning how many messages it holds.
    pub fn stop_recording(&mut self) -> Result<usize, DemoError> {
        let Some(demo) = self.demo.take() else {
            return Ok(0);
        };
        self.demo_waiting = false;
        let messages = demo.messages();
        demo.finish()?;
        log::info!("stopped demo, {} messages", messages);
        Ok(messages)
    }

    pub(super) fn record_message(&mut self, payload: &[u8]) {
        if self.demo_waiting {
            return;
        }
        let Some(demo) = self.demo.as_mut() else {
            return;
        };
        if let Err(e) = demo.write_message(payload) {
            log::warn!("demo: {}, recording stopped", e);
            self.demo = None;
        }
    }

    /// Feeds one recorded message through the parser as if the server had
    /// just sent it. Returns false when the recording ends the session.
    pub fn play_demo_message(&mut self, data: &[u8], now: u64) -> Result<bool, ProtocolError> {
        if self.state == ClientState::Disconnected {
            self.state = ClientState::Connected;
        }
        let mut msg = SizeBuf::from_bytes(data);
        let more = self.parse_server_message(&mut msg, now)?;
        if !more {
            self.reset();
        }
        Ok(more)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use glam::Vec3;

    use super::*;
    use crate::client::ClientConfig;
    use crate::configstrings::CS_MODELS;
    use crate::demo::DemoReader;
    use crate::snapshot::{FrameView, write_frame};

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn server_data() -> ServerMessage {
        ServerMessage::ServerData(ServerData {
            protocol: PROTOCOL_VERSION,
            server_count: 3,
            attract_loop: false,
            game_dir: "baseq2".into(),
            player_num: 0,
            level_name: "base1".into(),
        })
    }

    fn frame(number: i32, from: Option<i32>, entities: &[EntityState]) -> Vec<u8> {
        let player = PlayerState::default();
        let mut msg = SizeBuf::new(MAX_MSGLEN);
        let to = FrameView {
            number,
            player: &player,
            entities,
        };
        let from = from.map(|number| FrameView {
            number,
            player: &player,
            entities,
        });
        write_frame(&mut msg, to, from).unwrap();
        msg.data().to_vec()
    }

    fn feed(client: &mut ClientSession, data: &[u8]) -> Result<bool, ProtocolError> {
        let mut msg = SizeBuf::from_bytes(data);
        client.parse_server_message(&mut msg, 0)
    }

    fn signed_on() -> ClientSession {
        let mut client = ClientSession::new(ClientConfig::default());
        client.state = ClientState::Connected;
        let mut msg = SizeBuf::new(MAX_MSGLEN);
        server_data().write(&mut msg).unwrap();
        feed(&mut client, msg.data()).unwrap();
        client
    }

    #[test]
    fn test_version_mismatch() {
        let mut client = ClientSession::new(ClientConfig::default());
        let mut msg = SizeBuf::new(MAX_MSGLEN);
        ServerMessage::ServerData(ServerData {
            protocol: 33,
            server_count: 1,
            attract_loop: false,
            game_dir: String::new(),
            player_num: 0,
            level_name: String::new(),
        })
        .write(&mut msg)
        .unwrap();

        let err = feed(&mut client, msg.data()).unwrap_err();
        assert_eq!(err.to_string(), "Server returned version 33, not 34");
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let mut client = signed_on();
        assert!(matches!(
            feed(&mut client, &[99]),
            Err(ProtocolError::UnknownOpcode(99))
        ));
    }

    #[test]
    fn test_configstring_event_carries_range() {
        let mut client = signed_on();
        let mut msg = SizeBuf::new(MAX_MSGLEN);
        ServerMessage::ConfigString {
            index: (CS_MODELS + 2) as u16,
            value: "models/box.md2".into(),
        }
        .write(&mut msg)
        .unwrap();
        feed(&mut client, msg.data()).unwrap();

        assert_eq!(client.configstrings().get(CS_MODELS + 2), Some("models/box.md2"));
        assert!(client.drain_events().any(|e| matches!(
            e,
            ClientEvent::ConfigString {
                range: ConfigRange::Model(2),
                ..
            }
        )));
    }

    #[test]
    fn test_delta_from_missing_frame_is_discarded() {
        let mut client = signed_on();
        let ents = [EntityState {
            origin: Vec3::new(8.0, 0.0, 0.0),
            ..EntityState::new(3)
        }];

        // Delta against a frame we never saw: parsed, then dropped.
        let mut data = frame(5, Some(4), &ents);
        data.extend(frame(6, None, &ents));
        feed(&mut client, &data).unwrap();

        let current = client.current_frame().unwrap();
        assert_eq!(current.number, 6);
        assert_eq!(client.frame_entities(current).unwrap(), ents);
        assert_eq!(client.state(), ClientState::Active);
    }

    #[test]
    fn test_invalid_delta_keeps_last_good_frame() {
        let mut client = signed_on();
        let ents = [EntityState {
            origin: Vec3::new(8.0, 0.0, 0.0),
            ..EntityState::new(3)
        }];
        feed(&mut client, &frame(6, None, &ents)).unwrap();
        assert!(!client.need_full_frame);

        feed(&mut client, &frame(9, Some(8), &ents)).unwrap();
        let current = client.current_frame().unwrap();
        assert_eq!(current.number, 6);
        assert_eq!(client.frame_entities(current).unwrap(), ents);
        assert!(client.frames.get(9).is_none());
        assert!(client.need_full_frame);

        feed(&mut client, &frame(10, Some(6), &ents)).unwrap();
        assert_eq!(client.current_frame().unwrap().number, 10);
        assert_eq!(client.previous_frame().unwrap().number, 6);
        assert!(!client.need_full_frame);
    }

    #[test]
    fn test_precache_answers_begin() {
        let mut client = signed_on();
        client.chan = Some(crate::net::NetChan::new(
            crate::net::NetSrc::Client,
            crate::net::NetAddr::LOOPBACK,
            0,
            0,
        ));
        let mut msg = SizeBuf::new(MAX_MSGLEN);
        ServerMessage::StuffText("precache 3\n".into())
            .write(&mut msg)
            .unwrap();
        feed(&mut client, msg.data()).unwrap();

        let chan = client.chan().unwrap();
        let mut staged = SizeBuf::from_bytes(chan.message.data());
        assert_eq!(
            ClientMessage::read(&mut staged).unwrap(),
            Some(ClientMessage::StringCmd("begin 3".into()))
        );
    }

    #[test]
    fn test_demo_starts_with_sign_on_and_waits_for_full_frame() {
        let mut client = signed_on();
        let ents = [EntityState::new(7)];
        feed(&mut client, &frame(1, None, &ents)).unwrap();

        let sink = SharedSink::default();
        client.start_recording(sink.clone()).unwrap();

        client.record_message(&frame(2, Some(1), &ents));
        let full = frame(3, None, &ents);
        feed(&mut client, &full).unwrap();
        client.record_message(&full);
        assert_eq!(client.stop_recording().unwrap(), 2);

        let bytes = sink.0.borrow().clone();
        let messages: Vec<_> = DemoReader::new(&bytes[..])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0][0], ServerOp::ServerData as u8);
        assert_eq!(messages[1], full);

        let mut replay = ClientSession::new(ClientConfig::default());
        for message in &messages {
            assert!(replay.play_demo_message(message, 0).unwrap());
        }
        assert_eq!(replay.state(), ClientState::Active);
        assert_eq!(replay.current_frame().unwrap().number, 3);
    }
}
