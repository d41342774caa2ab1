//! Client side of a session: the connectionless handshake, the channel to
//! the server and the frames decoded from what it sends.

mod config;
mod events;
mod oob;
mod parse;
mod view;

use std::collections::VecDeque;
use std::io::Write;

pub use config::ClientConfig;
pub use events::ClientEvent;
pub use parse::ClientFrame;
pub use view::ViewState;

use crate::configstrings::ConfigStrings;
use crate::demo::DemoWriter;
use crate::messages::{ClientMessage, ServerData};
use crate::msg::{MsgError, SizeBuf};
use crate::net::oob::{is_connectionless, out_of_band};
use crate::net::{NetAddr, NetChan, NetSrc, Transport};
use crate::protocol::{CMD_BACKUP, MAX_EDICTS, MAX_MSGLEN, PACKET_HEADER, PROTOCOL_VERSION, ProtocolError};
use crate::snapshot::{EntityRing, EntityState, FrameHistory, MoveCommand, UserCmd};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    Disconnected,
    /// Asking the server for a challenge.
    Challenging,
    /// Challenge in hand, sending `connect`.
    Connecting,
    /// Channel open, signing on.
    Connected,
    /// Receiving frames.
    Active,
}

pub struct ClientSession {
    config: ClientConfig,
    state: ClientState,
    server: Option<NetAddr>,
    chan: Option<NetChan>,
    qport: u16,
    challenge: i32,
    /// When the handshake was last (re)sent, `None` to send at once.
    last_resend: Option<u64>,
    timeout_count: u32,
    last_command: u64,

    /// Sent commands by outgoing sequence, so every move can repeat the
    /// previous two.
    cmds: Vec<UserCmd>,
    current_cmd: UserCmd,

    server_data: Option<ServerData>,
    configstrings: ConfigStrings,
    /// Spawn baselines, replayed when a demo starts. Frames never decode
    /// against them.
    baselines: Vec<EntityState>,
    frames: FrameHistory<ClientFrame>,
    ring: EntityRing,
    frame: Option<i32>,
    old_frame: Option<i32>,
    /// A frame arrived whose reference we no longer hold.
    need_full_frame: bool,

    demo: Option<DemoWriter<Box<dyn Write>>>,
    /// Recording waits for an uncompressed frame.
    demo_waiting: bool,

    last_error: Option<String>,
    pending_events: VecDeque<ClientEvent>,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        let qport = config.qport.unwrap_or_else(rand::random);
        Self {
            state: ClientState::Disconnected,
            server: None,
            chan: None,
            qport,
            challenge: 0,
            last_resend: None,
            timeout_count: 0,
            last_command: 0,
            cmds: vec![UserCmd::default(); CMD_BACKUP],
            current_cmd: UserCmd::default(),
            server_data: None,
            configstrings: ConfigStrings::new(),
            baselines: vec![EntityState::default(); MAX_EDICTS],
            frames: FrameHistory::new(config.update_backup),
            ring: EntityRing::new(config.parse_entities),
            frame: None,
            old_frame: None,
            need_full_frame: false,
            demo: None,
            demo_waiting: false,
            last_error: None,
            pending_events: VecDeque::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn qport(&self) -> u16 {
        self.qport
    }

    pub fn server_addr(&self) -> Option<NetAddr> {
        self.server
    }

    pub fn chan(&self) -> Option<&NetChan> {
        self.chan.as_ref()
    }

    pub fn server_data(&self) -> Option<&ServerData> {
        self.server_data.as_ref()
    }

    pub fn configstrings(&self) -> &ConfigStrings {
        &self.configstrings
    }

    pub fn baseline(&self, number: u16) -> Option<&EntityState> {
        self.baselines.get(number as usize)
    }

    /// Why the last connection ended or was refused.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn connect(&mut self, net: &mut impl Transport, server: NetAddr, now: u64) {
        if self.state != ClientState::Disconnected {
            self.disconnect(net, now);
        }

        log::info!("Connecting to {}...", server);
        self.server = Some(server);
        self.state = ClientState::Challenging;
        self.last_error = None;
        self.last_resend = None;
        self.check_for_resend(net, now);
    }

    /// One client tick: reads everything pending, keeps the handshake going,
    /// watches for a dead server and sends input.
    pub fn run_frame(&mut self, net: &mut impl Transport, now: u64) {
        self.read_packets(net, now);
        self.check_for_resend(net, now);
        self.check_timeout(net, now);
        self.send_command(net, now);
    }

    pub fn read_packets(&mut self, net: &mut impl Transport, now: u64) {
        while let Some((from, data)) = net.receive(NetSrc::Client) {
            if is_connectionless(&data) {
                self.connectionless_packet(net, &from, &data[4..], now);
                continue;
            }

            if self.chan.is_none() {
                continue;
            }
            if data.len() < PACKET_HEADER - 2 {
                log::warn!("{}: runt packet", from);
                continue;
            }
            if self.server != Some(from) {
                log::debug!("{}: sequenced packet without connection", from);
                continue;
            }

            let mut msg = SizeBuf::from_bytes(&data);
            let accepted = self.chan.as_mut().is_some_and(|c| c.process(&mut msg, now));
            if accepted {
                self.server_packet(net, &mut msg, now);
            }
        }
    }

    fn server_packet(&mut self, net: &mut impl Transport, msg: &mut SizeBuf, now: u64) {
        let payload = msg.unread().to_vec();

        match self.parse_server_message(msg, now) {
            Ok(true) => self.record_message(&payload),
            Ok(false) => self.drop_connection(net, now, "Server disconnected".to_string()),
            Err(e @ ProtocolError::VersionMismatch { .. }) => {
                self.drop_connection(net, now, e.to_string())
            }
            Err(e) => self.drop_connection(net, now, format!("Bad server message: {}", e)),
        }
    }

    fn check_for_resend(&mut self, net: &mut impl Transport, now: u64) {
        if !matches!(self.state, ClientState::Challenging | ClientState::Connecting) {
            return;
        }
        if self
            .last_resend
            .is_some_and(|t| now.saturating_sub(t) < self.config.resend_interval_ms)
        {
            return;
        }
        let Some(server) = self.server else {
            return;
        };

        self.last_resend = Some(now);
        if self.state == ClientState::Challenging {
            log::debug!("getchallenge to {}", server);
            out_of_band(net, NetSrc::Client, &server, "getchallenge\n");
        } else {
            self.send_connect(net, server);
        }
    }

    fn send_connect(&mut self, net: &mut impl Transport, server: NetAddr) {
        let text = format!(
            "connect {} {} {} \"{}\"\n",
            PROTOCOL_VERSION, self.qport, self.challenge, self.config.userinfo
        );
        out_of_band(net, NetSrc::Client, &server, &text);
    }

    fn check_timeout(&mut self, net: &mut impl Transport, now: u64) {
        let Some(chan) = &self.chan else {
            return;
        };
        if !chan.is_timed_out(now, self.config.timeout_ms) {
            self.timeout_count = 0;
            return;
        }

        self.timeout_count += 1;
        if self.timeout_count > self.config.timeout_checks {
            log::info!("Server connection timed out.");
            self.drop_connection(net, now, "Server connection timed out.".to_string());
        }
    }

    /// Input for the next command packet.
    pub fn set_user_cmd(&mut self, cmd: UserCmd) {
        self.current_cmd = cmd;
    }

    /// Changes the userinfo, telling the server if connected.
    pub fn set_userinfo(&mut self, userinfo: &str) -> Result<(), MsgError> {
        self.config.userinfo = userinfo.to_string();
        match self.chan.as_mut() {
            Some(chan) => ClientMessage::UserInfo(userinfo.to_string()).write(&mut chan.message),
            None => Ok(()),
        }
    }

    /// Queues a reliable console command for the server.
    pub fn send_string_command(&mut self, text: &str) -> Result<(), MsgError> {
        match self.chan.as_mut() {
            Some(chan) => ClientMessage::StringCmd(text.to_string()).write(&mut chan.message),
            None => Ok(()),
        }
    }

    /// While signing on only reliable traffic goes out. Once active every
    /// packet carries a move with the last frame we hold.
    pub fn send_command(&mut self, net: &mut impl Transport, now: u64) {
        let Some(chan) = self.chan.as_mut() else {
            return;
        };

        let result = match self.state {
            ClientState::Connected => {
                if chan.message.is_empty() && now.saturating_sub(chan.last_sent()) < 1000 {
                    return;
                }
                chan.transmit(net, now, &[])
            }
            ClientState::Active => {
                if now.saturating_sub(self.last_command) < self.config.command_interval_ms {
                    return;
                }
                self.last_command = now;

                let sequence = chan.outgoing_sequence() as usize;
                self.cmds[sequence % CMD_BACKUP] = self.current_cmd;
                let at = |back: usize| self.cmds[(sequence + CMD_BACKUP - back) % CMD_BACKUP];

                let last_frame = match self.frame {
                    Some(frame) if !self.need_full_frame && !self.demo_waiting => frame,
                    _ => -1,
                };
                let mv = MoveCommand {
                    last_frame,
                    cmds: [at(2), at(1), at(0)],
                };

                let mut buf = SizeBuf::new(MAX_MSGLEN);
                match ClientMessage::Move(mv).write(&mut buf) {
                    Ok(()) => chan.transmit(net, now, buf.data()),
                    Err(e) => Err(e.into()),
                }
            }
            _ => return,
        };

        if let Err(e) = result {
            log::warn!("{}", e);
            self.drop_connection(net, now, e.to_string());
        }
    }

    /// Leaves the server, repeating the goodbye in case some are lost.
    pub fn disconnect(&mut self, net: &mut impl Transport, now: u64) {
        if self.state == ClientState::Disconnected {
            return;
        }

        if let Some(chan) = self.chan.as_mut() {
            let mut buf = SizeBuf::new(MAX_MSGLEN);
            if ClientMessage::StringCmd("disconnect".to_string())
                .write(&mut buf)
                .is_ok()
            {
                chan.message.clear();
                for _ in 0..3 {
                    if let Err(e) = chan.transmit(net, now, buf.data()) {
                        log::debug!("disconnect: {}", e);
                    }
                }
            }
        }

        if let Err(e) = self.stop_recording() {
            log::warn!("demo: {}", e);
        }

        let reason = self
            .last_error
            .clone()
            .unwrap_or_else(|| "disconnected".to_string());
        self.reset();
        self.pending_events
            .push_back(ClientEvent::Disconnected { reason });
    }

    /// Disconnects, remembering why.
    fn drop_connection(&mut self, net: &mut impl Transport, now: u64, error: String) {
        log::warn!("{}", error);
        self.last_error = Some(error);
        self.disconnect(net, now);
    }

    fn reset(&mut self) {
        self.state = ClientState::Disconnected;
        self.server = None;
        self.chan = None;
        self.timeout_count = 0;
        self.cmds.fill(UserCmd::default());
        self.server_data = None;
        self.configstrings.clear();
        self.baselines.fill(EntityState::default());
        self.clear_frames();
        self.demo_waiting = false;
    }

    fn clear_frames(&mut self) {
        self.frames.clear();
        self.ring.clear();
        self.frame = None;
        self.old_frame = None;
        self.need_full_frame = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LoopbackTransport;

    fn config() -> ClientConfig {
        ClientConfig {
            qport: Some(1234),
            ..Default::default()
        }
    }

    fn sent(net: &mut LoopbackTransport) -> Vec<String> {
        std::iter::from_fn(|| net.receive(NetSrc::Server))
            .map(|(_, data)| String::from_utf8_lossy(&data[4..]).into_owned())
            .collect()
    }

    #[test]
    fn test_handshake_resends() {
        let mut client = ClientSession::new(config());
        let mut net = LoopbackTransport::new();

        client.connect(&mut net, NetAddr::LOOPBACK, 0);
        assert_eq!(client.state(), ClientState::Challenging);
        assert_eq!(sent(&mut net), ["getchallenge\n"]);

        client.run_frame(&mut net, 2_999);
        assert!(sent(&mut net).is_empty());
        client.run_frame(&mut net, 3_000);
        assert_eq!(sent(&mut net), ["getchallenge\n"]);

        out_of_band(&mut net, NetSrc::Server, &NetAddr::LOOPBACK, "challenge 99");
        client.run_frame(&mut net, 3_100);
        assert_eq!(client.state(), ClientState::Connecting);
        assert_eq!(sent(&mut net), ["connect 34 1234 99 \"\\name\\unnamed\"\n"]);
    }

    #[test]
    fn test_refusal_leaves_disconnected() {
        let mut client = ClientSession::new(config());
        let mut net = LoopbackTransport::new();
        client.connect(&mut net, NetAddr::LOOPBACK, 0);

        out_of_band(
            &mut net,
            NetSrc::Server,
            &NetAddr::LOOPBACK,
            "print\nServer is protocol version 34, not 33\n",
        );
        client.run_frame(&mut net, 10);

        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.chan().is_none());
        assert_eq!(client.last_error(), Some("Server is protocol version 34, not 33"));
    }

    #[test]
    fn test_timeout_needs_repeated_checks() {
        let mut client = ClientSession::new(ClientConfig {
            timeout_ms: 1000,
            ..config()
        });
        let mut net = LoopbackTransport::new();
        client.connect(&mut net, NetAddr::LOOPBACK, 0);
        out_of_band(&mut net, NetSrc::Server, &NetAddr::LOOPBACK, "challenge 1");
        out_of_band(&mut net, NetSrc::Server, &NetAddr::LOOPBACK, "client_connect");
        client.run_frame(&mut net, 0);
        assert_eq!(client.state(), ClientState::Connected);

        for t in 0..5 {
            client.run_frame(&mut net, 1001 + t);
            assert_eq!(client.state(), ClientState::Connected);
        }
        client.run_frame(&mut net, 1010);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.last_error(), Some("Server connection timed out."));
    }

    fn acked_frame(client: &mut ClientSession, net: &mut LoopbackTransport, now: u64) -> i32 {
        client.send_command(net, now);
        let (_, data) = net.receive(NetSrc::Server).unwrap();
        let mut server = NetChan::new(NetSrc::Server, NetAddr::LOOPBACK, 0, 0);
        let mut msg = SizeBuf::from_bytes(&data);
        assert!(server.process(&mut msg, now));
        match ClientMessage::read(&mut msg).unwrap() {
            Some(ClientMessage::Move(mv)) => mv.last_frame,
            other => panic!("expected a move, got {:?}", other),
        }
    }

    #[test]
    fn test_move_asks_for_full_frame_after_invalid_delta() {
        let mut client = ClientSession::new(config());
        let mut net = LoopbackTransport::new();
        client.chan = Some(NetChan::new(NetSrc::Client, NetAddr::LOOPBACK, 1234, 0));
        client.state = ClientState::Active;
        client.frame = Some(6);

        assert_eq!(acked_frame(&mut client, &mut net, 1000), 6);
        client.need_full_frame = true;
        assert_eq!(acked_frame(&mut client, &mut net, 2000), -1);
    }

    #[test]
    fn test_disconnect_says_goodbye_three_times() {
        let mut client = ClientSession::new(config());
        let mut net = LoopbackTransport::new();
        client.connect(&mut net, NetAddr::LOOPBACK, 0);
        out_of_band(&mut net, NetSrc::Server, &NetAddr::LOOPBACK, "challenge 1");
        out_of_band(&mut net, NetSrc::Server, &NetAddr::LOOPBACK, "client_connect");
        client.read_packets(&mut net, 0);
        while net.receive(NetSrc::Server).is_some() {}

        client.disconnect(&mut net, 5);
        assert_eq!(net.pending(NetSrc::Server), 3);
        assert!(matches!(
            client.drain_events().last(),
            Some(ClientEvent::Disconnected { .. })
        ));
    }
}
