use crate::configstrings::ConfigStringError;
use crate::msg::MsgError;

pub const PROTOCOL_VERSION: i32 = 34;

pub const PORT_SERVER: u16 = 27910;
pub const PORT_CLIENT: u16 = 27901;

/// Largest datagram either side will send.
pub const MAX_MSGLEN: usize = 1400;
/// Two sequence words plus the qport.
pub const PACKET_HEADER: usize = 10;

pub const MAX_EDICTS: usize = 1024;
pub const MAX_STATS: usize = 32;
pub const MAX_CLIENTS: usize = 256;
pub const MAX_QPATH: usize = 64;

pub const DEFAULT_UPDATE_BACKUP: usize = 16;
/// Client-side ring of outgoing user commands.
pub const CMD_BACKUP: usize = 64;

pub const PRINT_LOW: u8 = 0;
pub const PRINT_MEDIUM: u8 = 1;
pub const PRINT_HIGH: u8 = 2;
pub const PRINT_CHAT: u8 = 3;

/// Server-to-client opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOp {
    Nop = 6,
    Disconnect = 7,
    Reconnect = 8,
    Sound = 9,
    Print = 10,
    StuffText = 11,
    ServerData = 12,
    ConfigString = 13,
    SpawnBaseline = 14,
    CenterPrint = 15,
    PlayerInfo = 17,
    PacketEntities = 18,
    Frame = 20,
}

impl ServerOp {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            6 => Self::Nop,
            7 => Self::Disconnect,
            8 => Self::Reconnect,
            9 => Self::Sound,
            10 => Self::Print,
            11 => Self::StuffText,
            12 => Self::ServerData,
            13 => Self::ConfigString,
            14 => Self::SpawnBaseline,
            15 => Self::CenterPrint,
            17 => Self::PlayerInfo,
            18 => Self::PacketEntities,
            20 => Self::Frame,
            _ => return None,
        })
    }
}

/// Client-to-server opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientOp {
    Nop = 1,
    Move = 2,
    UserInfo = 3,
    StringCmd = 4,
}

impl ClientOp {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            1 => Self::Nop,
            2 => Self::Move,
            3 => Self::UserInfo,
            4 => Self::StringCmd,
            _ => return None,
        })
    }
}

/// Anything that makes a single in-band message unusable. Caught at the
/// per-packet boundary and turned into a drop or a disconnect.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Msg(#[from] MsgError),
    #[error("illegible message: unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("bad entity number {0}")]
    BadEntityNumber(i32),
    #[error("bad field mask {0:#x}")]
    BadFieldMask(u32),
    #[error("entity {next} follows {previous} out of order")]
    EntityOrder { previous: u16, next: u16 },
    #[error(transparent)]
    ConfigString(#[from] ConfigStringError),
    #[error("Server returned version {server}, not {client}")]
    VersionMismatch { server: i32, client: i32 },
    #[error("frame interrupted by opcode {0}")]
    IncompleteFrame(u8),
    #[error("frame data opcode {0} outside of a frame")]
    OutOfPlaceFrameData(u8),
}
