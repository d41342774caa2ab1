use crate::protocol::{MAX_CLIENTS, MAX_QPATH};

pub const MAX_MODELS: usize = 256;
pub const MAX_SOUNDS: usize = 256;
pub const MAX_IMAGES: usize = 256;
pub const MAX_LIGHTSTYLES: usize = 256;
pub const MAX_ITEMS: usize = 256;
pub const MAX_GENERAL: usize = MAX_CLIENTS * 2;

pub const CS_NAME: usize = 0;
pub const CS_CDTRACK: usize = 1;
pub const CS_SKY: usize = 2;
pub const CS_SKYAXIS: usize = 3;
pub const CS_SKYROTATE: usize = 4;
pub const CS_STATUSBAR: usize = 5;
pub const CS_AIRACCEL: usize = 29;
pub const CS_MAXCLIENTS: usize = 30;
pub const CS_MAPCHECKSUM: usize = 31;
pub const CS_MODELS: usize = 32;
pub const CS_SOUNDS: usize = CS_MODELS + MAX_MODELS;
pub const CS_IMAGES: usize = CS_SOUNDS + MAX_SOUNDS;
pub const CS_LIGHTS: usize = CS_IMAGES + MAX_IMAGES;
pub const CS_ITEMS: usize = CS_LIGHTS + MAX_LIGHTSTYLES;
pub const CS_PLAYERSKINS: usize = CS_ITEMS + MAX_ITEMS;
pub const CS_GENERAL: usize = CS_PLAYERSKINS + MAX_CLIENTS;
pub const MAX_CONFIGSTRINGS: usize = CS_GENERAL + MAX_GENERAL;

/// The status bar layout may spill into the slots after it.
const MAX_STATUSBAR_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigStringError {
    #[error("configstring index {0} out of range")]
    OutOfRange(usize),
    #[error("configstring {index} too long ({len} bytes)")]
    TooLong { index: usize, len: usize },
}

/// Named partition an index falls into, with the offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigRange {
    Name,
    CdTrack,
    Sky,
    SkyAxis,
    SkyRotate,
    StatusBar,
    AirAccel,
    MaxClients,
    MapChecksum,
    Model(usize),
    Sound(usize),
    Image(usize),
    Light(usize),
    Item(usize),
    PlayerSkin(usize),
    General(usize),
}

impl ConfigRange {
    pub fn of(index: usize) -> Option<Self> {
        Some(match index {
            CS_NAME => Self::Name,
            CS_CDTRACK => Self::CdTrack,
            CS_SKY => Self::Sky,
            CS_SKYAXIS => Self::SkyAxis,
            CS_SKYROTATE => Self::SkyRotate,
            CS_STATUSBAR..CS_AIRACCEL => Self::StatusBar,
            CS_AIRACCEL => Self::AirAccel,
            CS_MAXCLIENTS => Self::MaxClients,
            CS_MAPCHECKSUM => Self::MapChecksum,
            CS_MODELS..CS_SOUNDS => Self::Model(index - CS_MODELS),
            CS_SOUNDS..CS_IMAGES => Self::Sound(index - CS_SOUNDS),
            CS_IMAGES..CS_LIGHTS => Self::Image(index - CS_IMAGES),
            CS_LIGHTS..CS_ITEMS => Self::Light(index - CS_LIGHTS),
            CS_ITEMS..CS_PLAYERSKINS => Self::Item(index - CS_ITEMS),
            CS_PLAYERSKINS..CS_GENERAL => Self::PlayerSkin(index - CS_PLAYERSKINS),
            CS_GENERAL..MAX_CONFIGSTRINGS => Self::General(index - CS_GENERAL),
            _ => return None,
        })
    }
}

/// Replicated string table. The server owns the authoritative copy and
/// every client mirrors it.
#[derive(Debug, Clone)]
pub struct ConfigStrings {
    strings: Vec<String>,
}

impl Default for ConfigStrings {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStrings {
    pub fn new() -> Self {
        Self {
            strings: vec![String::new(); MAX_CONFIGSTRINGS],
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    /// Stores `value`, returning true if it differs from what was there.
    pub fn set(&mut self, index: usize, value: &str) -> Result<bool, ConfigStringError> {
        let max_len = Self::max_len(index)?;
        if value.len() > max_len {
            return Err(ConfigStringError::TooLong {
                index,
                len: value.len(),
            });
        }

        let slot = &mut self.strings[index];
        if slot == value {
            return Ok(false);
        }
        slot.clear();
        slot.push_str(value);
        Ok(true)
    }

    pub fn max_len(index: usize) -> Result<usize, ConfigStringError> {
        match ConfigRange::of(index) {
            None => Err(ConfigStringError::OutOfRange(index)),
            Some(ConfigRange::StatusBar) => Ok(MAX_STATUSBAR_LEN),
            Some(_) => Ok(MAX_QPATH - 1),
        }
    }

    /// Non-empty entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.strings
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_empty())
            .map(|(i, s)| (i, s.as_str()))
    }

    pub fn clear(&mut self) {
        for s in &mut self.strings {
            s.clear();
        }
    }
}
