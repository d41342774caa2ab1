use super::{ClientSlot, ServerEvent, ServerSession};
use crate::msg::SizeBuf;
use crate::net::oob::{args, out_of_band, tokenize};
use crate::net::{NetAddr, NetSrc, Transport};
use crate::protocol::PROTOCOL_VERSION;

impl ServerSession {
    pub(super) fn connectionless_packet(
        &mut self,
        net: &mut impl Transport,
        from: &NetAddr,
        payload: &[u8],
        now: u64,
    ) {
        let line = SizeBuf::from_bytes(payload).read_string_line();
        let argv = tokenize(&line);
        let Some(command) = argv.first() else {
            return;
        };
        log::debug!("packet {} : {}", from, command);

        match command.as_str() {
            "ping" => out_of_band(net, NetSrc::Server, from, "ack"),
            "ack" => log::info!("Ping acknowledge from {}", from),
            "status" => {
                let status = self.status_string();
                out_of_band(net, NetSrc::Server, from, &format!("print\n{}", status));
            }
            "info" => self.info_reply(net, from, &argv),
            "getchallenge" => {
                let challenge = self.challenges.issue(from, now);
                out_of_band(net, NetSrc::Server, from, &format!("challenge {}", challenge));
            }
            "connect" => self.direct_connect(net, from, &argv, now),
            "rcon" => self.remote_command(net, from, &argv, &line, now),
            _ => log::warn!("bad connectionless packet from {}: {}", from, line),
        }
    }

    fn status_string(&self) -> String {
        let mut status = format!(
            "\\hostname\\{}\\mapname\\{}\\maxclients\\{}\\protocol\\{}\n",
            self.config.hostname, self.config.map_name, self.config.max_clients, PROTOCOL_VERSION
        );
        for (_, client) in self.clients() {
            status.push_str(&format!("0 {} \"{}\"\n", client.ping, client.name));
        }
        status
    }

    fn info_reply(&mut self, net: &mut impl Transport, from: &NetAddr, argv: &[String]) {
        let version = argv.get(1).and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
        let text = if version != PROTOCOL_VERSION {
            format!("{}: wrong version\n", self.config.hostname)
        } else {
            format!(
                "{} {} {}/{}\n",
                self.config.hostname,
                self.config.map_name,
                self.connected_count(),
                self.config.max_clients
            )
        };
        out_of_band(net, NetSrc::Server, from, &format!("info\n{}", text));
    }

    fn reject(&mut self, net: &mut impl Transport, from: &NetAddr, reason: String) {
        log::warn!("{}: connection refused: {}", from, reason);
        out_of_band(net, NetSrc::Server, from, &format!("print\n{}\n", reason));
        self.pending_events.push_back(ServerEvent::ConnectionDenied {
            addr: *from,
            reason,
        });
    }

    /// `connect <protocol> <qport> <challenge> "<userinfo>"`
    fn direct_connect(&mut self, net: &mut impl Transport, from: &NetAddr, argv: &[String], now: u64) {
        let number = |i: usize| argv.get(i).and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
        let version = number(1);
        let qport = number(2) as u16;
        let challenge = number(3);
        let userinfo = argv.get(4).map(String::as_str).unwrap_or("");

        if version != PROTOCOL_VERSION {
            let reason = format!("Server is protocol version {}, not {}", PROTOCOL_VERSION, version);
            self.reject(net, from, reason);
            return;
        }

        if !net.is_local(from) {
            match self.challenges.matches(from, challenge) {
                Some(true) => {}
                Some(false) => return self.reject(net, from, "Bad challenge.".to_string()),
                None => return self.reject(net, from, "No challenge for address.".to_string()),
            }
        }

        let existing = self.slots.iter().position(|s| {
            s.as_ref().is_some_and(|c| {
                c.addr().compare_base(from) && (c.chan.qport() == qport || c.addr().port == from.port)
            })
        });
        let index = match existing {
            Some(index) => {
                log::info!("{}: reconnect", from);
                index
            }
            None => match self.slots.iter().position(Option::is_none) {
                Some(index) => index,
                None => return self.reject(net, from, "Server is full.".to_string()),
            },
        };

        self.slots[index] = Some(ClientSlot::new(
            *from,
            qport,
            userinfo,
            self.config.update_backup,
            now,
        ));
        out_of_band(net, NetSrc::Server, from, "client_connect");

        log::info!("{}: client_connect in slot {}", from, index);
        self.pending_events.push_back(ServerEvent::ClientConnected {
            slot: index,
            addr: *from,
            userinfo: userinfo.to_string(),
        });
    }

    /// `rcon <password> <command...>`, answered with the command's output.
    fn remote_command(
        &mut self,
        net: &mut impl Transport,
        from: &NetAddr,
        argv: &[String],
        line: &str,
        now: u64,
    ) {
        let authorized = match (&self.config.rcon_password, argv.get(1)) {
            (Some(password), Some(given)) => !password.is_empty() && password == given,
            _ => false,
        };

        if !authorized {
            log::warn!("Bad rcon from {}: {}", from, line);
            out_of_band(net, NetSrc::Server, from, "print\nBad rcon_password.\n");
            return;
        }

        let command = args(args(line));
        log::info!("Rcon from {}: {}", from, command);
        // The handler gets the whole session, so it is out of its slot while
        // it runs.
        let output = match self.rcon.take() {
            Some(mut handler) => {
                let output = handler.execute(self, &mut *net, command, now);
                if self.rcon.is_none() {
                    self.rcon = Some(handler);
                }
                output
            }
            None => String::new(),
        };
        out_of_band(net, NetSrc::Server, from, &format!("print\n{}", output));
    }
}
