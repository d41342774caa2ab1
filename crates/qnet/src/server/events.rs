use crate::net::NetAddr;
use crate::snapshot::UserCmd;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        slot: usize,
        addr: NetAddr,
        userinfo: String,
    },
    /// The client finished signing on and now receives frames.
    ClientBegin {
        slot: usize,
    },
    ClientDisconnected {
        slot: usize,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: NetAddr,
        reason: String,
    },
    UserCommand {
        slot: usize,
        cmd: UserCmd,
    },
    /// A string command the session doesn't handle itself.
    ClientCommand {
        slot: usize,
        text: String,
    },
    UserInfoChanged {
        slot: usize,
        userinfo: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    BadPackets,
    Overflow,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::BadPackets => "sent illegible messages",
            DisconnectReason::Overflow => "overflowed",
        }
    }
}
