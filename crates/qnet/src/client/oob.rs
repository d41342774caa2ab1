use super::{ClientEvent, ClientSession, ClientState};
use crate::messages::ClientMessage;
use crate::msg::SizeBuf;
use crate::net::oob::{args, out_of_band, tokenize};
use crate::net::{NetAddr, NetChan, NetSrc, Transport};
use crate::protocol::PRINT_HIGH;

impl ClientSession {
    pub(super) fn connectionless_packet(
        &mut self,
        net: &mut impl Transport,
        from: &NetAddr,
        payload: &[u8],
        now: u64,
    ) {
        let mut msg = SizeBuf::from_bytes(payload);
        let line = msg.read_string_line();
        let argv = tokenize(&line);
        let Some(command) = argv.first() else {
            return;
        };
        log::debug!("{}: {}", from, command);

        let from_server = self.server == Some(*from);
        match command.as_str() {
            "challenge" if from_server => {
                if self.state != ClientState::Challenging {
                    return;
                }
                self.challenge = argv.get(1).and_then(|c| c.parse().ok()).unwrap_or(0);
                self.state = ClientState::Connecting;
                self.last_resend = Some(now);
                self.send_connect(net, *from);
            }
            "client_connect" if from_server => self.client_connect(*from, now),
            "challenge" | "client_connect" => {
                log::debug!("{}: {} from a server we aren't joining", from, command)
            }
            "info" => {
                let text = msg.read_string();
                self.pending_events.push_back(ClientEvent::ServerInfo {
                    addr: *from,
                    text,
                });
            }
            "print" => {
                let text = msg.read_string();
                if from_server
                    && matches!(self.state, ClientState::Challenging | ClientState::Connecting)
                {
                    self.refused(text.trim_end());
                } else {
                    log::info!("{}", text.trim_end());
                    self.pending_events.push_back(ClientEvent::Print {
                        level: PRINT_HIGH,
                        text,
                    });
                }
            }
            "ping" => out_of_band(net, NetSrc::Client, from, "ack"),
            "echo" => out_of_band(net, NetSrc::Client, from, args(&line)),
            "cmd" => {
                if !net.is_local(from) {
                    log::warn!("Command packet from remote host {}. Ignored.", from);
                    return;
                }
                self.pending_events
                    .push_back(ClientEvent::Command(args(&line).to_string()));
            }
            _ => log::warn!("{}: unknown connectionless command: {}", from, line),
        }
    }

    fn client_connect(&mut self, server: NetAddr, now: u64) {
        if self.state != ClientState::Connecting {
            if self.chan.is_some() {
                log::debug!("Dup connect received. Ignored.");
            }
            return;
        }

        let mut chan = NetChan::new(NetSrc::Client, server, self.qport, now);
        if let Err(e) = ClientMessage::StringCmd("new".to_string()).write(&mut chan.message) {
            log::warn!("{}: {}", server, e);
            return;
        }
        self.chan = Some(chan);
        self.state = ClientState::Connected;
        self.timeout_count = 0;

        log::info!("{}: client_connect", server);
        self.pending_events.push_back(ClientEvent::Connected);
    }

    /// A `print` during the handshake is the server turning us away.
    fn refused(&mut self, reason: &str) {
        log::warn!("connection refused: {}", reason);
        self.last_error = Some(reason.to_string());
        self.reset();
        self.pending_events.push_back(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::net::{LoopbackTransport, MemoryNetwork};

    #[test]
    fn test_client_connect_opens_channel_once() {
        let mut client = ClientSession::new(ClientConfig::default());
        let mut net = LoopbackTransport::new();
        client.connect(&mut net, NetAddr::LOOPBACK, 0);

        client.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"client_connect", 0);
        assert_eq!(client.state(), ClientState::Challenging);

        client.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"challenge 5", 0);
        client.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"client_connect", 0);
        assert_eq!(client.state(), ClientState::Connected);
        assert!(!client.chan().unwrap().message.is_empty());

        client.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"client_connect", 0);
        let connected = client
            .drain_events()
            .filter(|e| matches!(e, ClientEvent::Connected))
            .count();
        assert_eq!(connected, 1);
    }

    #[test]
    fn test_remote_cmd_ignored() {
        let shared = MemoryNetwork::shared();
        let mut sock = MemoryNetwork::bind(&shared, NetAddr::ip([10, 0, 0, 2], 27901));
        let mut client = ClientSession::new(ClientConfig::default());

        let remote = NetAddr::ip([10, 0, 0, 9], 27910);
        client.connectionless_packet(&mut sock, &remote, b"cmd quit", 0);
        assert_eq!(client.drain_events().count(), 0);

        let local = NetAddr::ip([10, 0, 0, 2], 5555);
        client.connectionless_packet(&mut sock, &local, b"cmd echo hi", 0);
        assert!(matches!(
            client.drain_events().next(),
            Some(ClientEvent::Command(text)) if text == "echo hi"
        ));
    }

    #[test]
    fn test_info_and_ping_replies() {
        let mut client = ClientSession::new(ClientConfig::default());
        let mut net = LoopbackTransport::new();

        client.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"info\nnoname base1 0/32\n", 0);
        assert!(matches!(
            client.drain_events().next(),
            Some(ClientEvent::ServerInfo { text, .. }) if text == "noname base1 0/32\n"
        ));

        client.connectionless_packet(&mut net, &NetAddr::LOOPBACK, b"ping", 0);
        let (_, data) = net.receive(NetSrc::Server).unwrap();
        assert_eq!(&data[4..], b"ack");
    }
}
