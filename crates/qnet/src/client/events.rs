use crate::configstrings::ConfigRange;
use crate::messages::{ServerData, SoundMessage};
use crate::net::NetAddr;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server accepted the connection; sign-on follows.
    Connected,
    /// First valid frame received.
    Active,
    Disconnected {
        reason: String,
    },
    Print {
        level: u8,
        text: String,
    },
    CenterPrint(String),
    /// Console text from the server the session doesn't act on itself.
    StuffText(String),
    ServerData(ServerData),
    ConfigString {
        index: usize,
        range: ConfigRange,
        value: String,
    },
    Sound(SoundMessage),
    Frame {
        number: i32,
        delta_frame: i32,
    },
    /// Reply to an `info` query.
    ServerInfo {
        addr: NetAddr,
        text: String,
    },
    /// Remote command from a local source.
    Command(String),
    /// The server changed level and is signing us on again.
    Reconnect,
}
