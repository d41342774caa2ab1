//! In-band messages other than frames, in both directions.

use glam::Vec3;

use crate::msg::{MsgError, SizeBuf};
use crate::protocol::{ClientOp, ProtocolError, ServerOp};
use crate::snapshot::{
    EntityHeader, EntityState, MoveCommand, read_delta_entity, read_entity_header,
    write_delta_entity,
};

const SND_VOLUME: u8 = 1 << 0;
const SND_ATTENUATION: u8 = 1 << 1;
const SND_POS: u8 = 1 << 2;
const SND_ENT: u8 = 1 << 3;
const SND_OFFSET: u8 = 1 << 4;

pub const DEFAULT_SOUND_VOLUME: f32 = 1.0;
pub const DEFAULT_SOUND_ATTENUATION: f32 = 1.0;

/// First message of the sign-on, telling the client what it joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerData {
    pub protocol: i32,
    /// Bumped on every map change so stale `begin` commands can be told apart.
    pub server_count: i32,
    pub attract_loop: bool,
    pub game_dir: String,
    pub player_num: i16,
    pub level_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundMessage {
    pub sound_index: u8,
    pub volume: f32,
    pub attenuation: f32,
    /// Seconds into the frame, up to a quarter second.
    pub time_offset: f32,
    /// Entity number and channel.
    pub entity: Option<(u16, u8)>,
    pub origin: Option<Vec3>,
}

impl SoundMessage {
    pub fn new(sound_index: u8) -> Self {
        Self {
            sound_index,
            volume: DEFAULT_SOUND_VOLUME,
            attenuation: DEFAULT_SOUND_ATTENUATION,
            time_offset: 0.0,
            entity: None,
            origin: None,
        }
    }

    fn write(&self, msg: &mut SizeBuf) -> Result<(), MsgError> {
        let mut flags = 0;
        if self.volume != DEFAULT_SOUND_VOLUME {
            flags |= SND_VOLUME;
        }
        if self.attenuation != DEFAULT_SOUND_ATTENUATION {
            flags |= SND_ATTENUATION;
        }
        if self.time_offset != 0.0 {
            flags |= SND_OFFSET;
        }
        if self.entity.is_some() {
            flags |= SND_ENT;
        }
        if self.origin.is_some() {
            flags |= SND_POS;
        }

        msg.write_byte(flags)?;
        msg.write_byte(self.sound_index)?;
        if flags & SND_VOLUME != 0 {
            msg.write_byte((self.volume.clamp(0.0, 1.0) * 255.0).round() as u8)?;
        }
        if flags & SND_ATTENUATION != 0 {
            msg.write_byte((self.attenuation.clamp(0.0, 3.98) * 64.0) as u8)?;
        }
        if flags & SND_OFFSET != 0 {
            msg.write_byte((self.time_offset.clamp(0.0, 0.255) * 1000.0).round() as u8)?;
        }
        if let Some((entity, channel)) = self.entity {
            msg.write_short(((entity << 3) | (channel as u16 & 7)) as i16)?;
        }
        if let Some(origin) = self.origin {
            msg.write_pos(origin)?;
        }
        Ok(())
    }

    fn read(msg: &mut SizeBuf) -> Result<Self, MsgError> {
        let flags = msg.read_byte()?;
        let mut sound = SoundMessage::new(msg.read_byte()?);
        if flags & SND_VOLUME != 0 {
            sound.volume = msg.read_byte()? as f32 / 255.0;
        }
        if flags & SND_ATTENUATION != 0 {
            sound.attenuation = msg.read_byte()? as f32 / 64.0;
        }
        if flags & SND_OFFSET != 0 {
            sound.time_offset = msg.read_byte()? as f32 / 1000.0;
        }
        if flags & SND_ENT != 0 {
            let packed = msg.read_short()? as u16;
            sound.entity = Some((packed >> 3, (packed & 7) as u8));
        }
        if flags & SND_POS != 0 {
            sound.origin = Some(msg.read_pos()?);
        }
        Ok(sound)
    }
}

/// Everything the server sends in-band except frame data.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Nop,
    Disconnect,
    Reconnect,
    Sound(SoundMessage),
    Print { level: u8, text: String },
    StuffText(String),
    ServerData(ServerData),
    ConfigString { index: u16, value: String },
    SpawnBaseline(EntityState),
    CenterPrint(String),
}

impl ServerMessage {
    pub fn write(&self, msg: &mut SizeBuf) -> Result<(), MsgError> {
        match self {
            ServerMessage::Nop => msg.write_byte(ServerOp::Nop as u8),
            ServerMessage::Disconnect => msg.write_byte(ServerOp::Disconnect as u8),
            ServerMessage::Reconnect => msg.write_byte(ServerOp::Reconnect as u8),
            ServerMessage::Sound(sound) => {
                msg.write_byte(ServerOp::Sound as u8)?;
                sound.write(msg)
            }
            ServerMessage::Print { level, text } => {
                msg.write_byte(ServerOp::Print as u8)?;
                msg.write_byte(*level)?;
                msg.write_string(text)
            }
            ServerMessage::StuffText(text) => {
                msg.write_byte(ServerOp::StuffText as u8)?;
                msg.write_string(text)
            }
            ServerMessage::ServerData(data) => {
                msg.write_byte(ServerOp::ServerData as u8)?;
                msg.write_long(data.protocol)?;
                msg.write_long(data.server_count)?;
                msg.write_byte(data.attract_loop as u8)?;
                msg.write_string(&data.game_dir)?;
                msg.write_short(data.player_num)?;
                msg.write_string(&data.level_name)
            }
            ServerMessage::ConfigString { index, value } => {
                msg.write_byte(ServerOp::ConfigString as u8)?;
                msg.write_short(*index as i16)?;
                msg.write_string(value)
            }
            ServerMessage::SpawnBaseline(state) => {
                msg.write_byte(ServerOp::SpawnBaseline as u8)?;
                write_delta_entity(&EntityState::default(), state, msg, true).map(|_| ())
            }
            ServerMessage::CenterPrint(text) => {
                msg.write_byte(ServerOp::CenterPrint as u8)?;
                msg.write_string(text)
            }
        }
    }

    /// Reads the body of a non-frame message whose opcode was `op`.
    pub fn read(op: ServerOp, msg: &mut SizeBuf) -> Result<Self, ProtocolError> {
        Ok(match op {
            ServerOp::Nop => ServerMessage::Nop,
            ServerOp::Disconnect => ServerMessage::Disconnect,
            ServerOp::Reconnect => ServerMessage::Reconnect,
            ServerOp::Sound => ServerMessage::Sound(SoundMessage::read(msg)?),
            ServerOp::Print => ServerMessage::Print {
                level: msg.read_byte()?,
                text: msg.read_string(),
            },
            ServerOp::StuffText => ServerMessage::StuffText(msg.read_string()),
            ServerOp::ServerData => ServerMessage::ServerData(ServerData {
                protocol: msg.read_long()?,
                server_count: msg.read_long()?,
                attract_loop: msg.read_byte()? != 0,
                game_dir: msg.read_string(),
                player_num: msg.read_short()?,
                level_name: msg.read_string(),
            }),
            ServerOp::ConfigString => ServerMessage::ConfigString {
                index: msg.read_short()? as u16,
                value: msg.read_string(),
            },
            ServerOp::SpawnBaseline => match read_entity_header(msg)? {
                EntityHeader::Update(number, bits) => ServerMessage::SpawnBaseline(
                    read_delta_entity(&EntityState::default(), number, bits, msg)?,
                ),
                EntityHeader::End => return Err(ProtocolError::BadEntityNumber(0)),
                EntityHeader::Remove(number) => {
                    return Err(ProtocolError::BadEntityNumber(number as i32));
                }
            },
            ServerOp::CenterPrint => ServerMessage::CenterPrint(msg.read_string()),
            ServerOp::Frame | ServerOp::PlayerInfo | ServerOp::PacketEntities => {
                return Err(ProtocolError::OutOfPlaceFrameData(op as u8));
            }
        })
    }
}

/// Everything a client sends in-band.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Nop,
    Move(MoveCommand),
    UserInfo(String),
    StringCmd(String),
}

impl ClientMessage {
    pub fn write(&self, msg: &mut SizeBuf) -> Result<(), MsgError> {
        match self {
            ClientMessage::Nop => msg.write_byte(ClientOp::Nop as u8),
            ClientMessage::Move(mv) => mv.write(msg),
            ClientMessage::UserInfo(info) => {
                msg.write_byte(ClientOp::UserInfo as u8)?;
                msg.write_string(info)
            }
            ClientMessage::StringCmd(text) => {
                msg.write_byte(ClientOp::StringCmd as u8)?;
                msg.write_string(text)
            }
        }
    }

    /// Next message, or `None` once the payload is used up.
    pub fn read(msg: &mut SizeBuf) -> Result<Option<Self>, ProtocolError> {
        if msg.is_exhausted() {
            return Ok(None);
        }
        let byte = msg.read_byte()?;
        let op = ClientOp::from_u8(byte).ok_or(ProtocolError::UnknownOpcode(byte))?;
        Ok(Some(match op {
            ClientOp::Nop => ClientMessage::Nop,
            ClientOp::Move => ClientMessage::Move(MoveCommand::read(msg)?),
            ClientOp::UserInfo => ClientMessage::UserInfo(msg.read_string()),
            ClientOp::StringCmd => ClientMessage::StringCmd(msg.read_string()),
        }))
    }
}
