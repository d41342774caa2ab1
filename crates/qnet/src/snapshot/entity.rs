use bitflags::bitflags;
use glam::Vec3;

use crate::msg::{MsgError, SizeBuf};
use crate::protocol::{MAX_EDICTS, ProtocolError};

bitflags! {
    /// Fields present in an entity record. The mask goes on the wire seven
    /// bits per byte, so the fields that change most often sit lowest.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntityBits: u32 {
        const ORIGIN1 = 1 << 0;
        const ORIGIN2 = 1 << 1;
        const ANGLE2 = 1 << 2;
        const ORIGIN3 = 1 << 3;
        const FRAME8 = 1 << 4;
        const EVENT = 1 << 5;
        const REMOVE = 1 << 6;

        const NUMBER16 = 1 << 7;
        const ANGLE1 = 1 << 8;
        const ANGLE3 = 1 << 9;
        const MODEL = 1 << 10;
        const SKIN8 = 1 << 11;
        const EFFECTS8 = 1 << 12;
        const RENDERFX8 = 1 << 13;

        const SOLID = 1 << 14;
        const FRAME16 = 1 << 15;
        const SOUND = 1 << 16;
        const SKIN16 = 1 << 17;
        const EFFECTS16 = 1 << 18;
        const RENDERFX16 = 1 << 19;
        const MODEL2 = 1 << 20;

        const MODEL3 = 1 << 21;
        const MODEL4 = 1 << 22;
    }
}

const MAX_MASK_BYTES: usize = 4;

/// What the server tells clients about one entity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityState {
    pub number: u16,
    pub origin: Vec3,
    pub angles: Vec3,
    /// Main model followed by up to three attached ones.
    pub model_index: [u8; 4],
    pub frame: u16,
    pub skin: u32,
    pub effects: u32,
    pub render_fx: u32,
    pub solid: u16,
    pub sound: u8,
    /// One-shot; cleared on every frame it isn't sent.
    pub event: u8,
}

impl EntityState {
    pub fn new(number: u16) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Origin(usize),
    Angle(usize),
    Model(usize),
    Skin,
    Effects,
    RenderFx,
    Solid,
    Frame,
    Event,
    Sound,
}

/// Wire order of entity fields, shared by encoder and decoder.
const FIELDS: [Field; 17] = [
    Field::Origin(0),
    Field::Origin(1),
    Field::Origin(2),
    Field::Angle(0),
    Field::Angle(1),
    Field::Angle(2),
    Field::Model(0),
    Field::Model(1),
    Field::Model(2),
    Field::Model(3),
    Field::Skin,
    Field::Effects,
    Field::RenderFx,
    Field::Solid,
    Field::Frame,
    Field::Event,
    Field::Sound,
];

const ORIGIN_BITS: [EntityBits; 3] = [EntityBits::ORIGIN1, EntityBits::ORIGIN2, EntityBits::ORIGIN3];
const ANGLE_BITS: [EntityBits; 3] = [EntityBits::ANGLE1, EntityBits::ANGLE2, EntityBits::ANGLE3];
const MODEL_BITS: [EntityBits; 4] = [
    EntityBits::MODEL,
    EntityBits::MODEL2,
    EntityBits::MODEL3,
    EntityBits::MODEL4,
];

/// Narrow bit alone is a byte, wide alone a short, both a long.
fn sized(value: u32, narrow: EntityBits, wide: EntityBits) -> EntityBits {
    if value > 0xffff {
        narrow | wide
    } else if value > 0xff {
        wide
    } else {
        narrow
    }
}

fn write_sized(
    msg: &mut SizeBuf,
    value: u32,
    bits: EntityBits,
    narrow: EntityBits,
    wide: EntityBits,
) -> Result<(), MsgError> {
    match (bits.contains(narrow), bits.contains(wide)) {
        (true, true) => msg.write_long(value as i32),
        (false, true) => msg.write_short(value as u16 as i16),
        _ => msg.write_byte(value as u8),
    }
}

fn read_sized(
    msg: &mut SizeBuf,
    bits: EntityBits,
    narrow: EntityBits,
    wide: EntityBits,
) -> Result<u32, MsgError> {
    Ok(match (bits.contains(narrow), bits.contains(wide)) {
        (true, true) => msg.read_long()? as u32,
        (false, true) => msg.read_short()? as u16 as u32,
        _ => msg.read_byte()? as u32,
    })
}

impl Field {
    /// Every bit that can announce this field.
    fn mask(self) -> EntityBits {
        match self {
            Field::Origin(i) => ORIGIN_BITS[i],
            Field::Angle(i) => ANGLE_BITS[i],
            Field::Model(i) => MODEL_BITS[i],
            Field::Skin => EntityBits::SKIN8 | EntityBits::SKIN16,
            Field::Effects => EntityBits::EFFECTS8 | EntityBits::EFFECTS16,
            Field::RenderFx => EntityBits::RENDERFX8 | EntityBits::RENDERFX16,
            Field::Solid => EntityBits::SOLID,
            Field::Frame => EntityBits::FRAME8 | EntityBits::FRAME16,
            Field::Event => EntityBits::EVENT,
            Field::Sound => EntityBits::SOUND,
        }
    }

    /// The bits needed to carry `to`'s value of this field.
    fn bits_for(self, to: &EntityState) -> EntityBits {
        match self {
            Field::Skin => sized(to.skin, EntityBits::SKIN8, EntityBits::SKIN16),
            Field::Effects => sized(to.effects, EntityBits::EFFECTS8, EntityBits::EFFECTS16),
            Field::RenderFx => {
                sized(to.render_fx, EntityBits::RENDERFX8, EntityBits::RENDERFX16)
            }
            Field::Frame if to.frame > 0xff => EntityBits::FRAME16,
            Field::Frame => EntityBits::FRAME8,
            _ => self.mask(),
        }
    }

    fn changed(self, from: &EntityState, to: &EntityState) -> bool {
        match self {
            Field::Origin(i) => from.origin[i] != to.origin[i],
            Field::Angle(i) => from.angles[i] != to.angles[i],
            Field::Model(i) => from.model_index[i] != to.model_index[i],
            Field::Skin => from.skin != to.skin,
            Field::Effects => from.effects != to.effects,
            Field::RenderFx => from.render_fx != to.render_fx,
            Field::Solid => from.solid != to.solid,
            Field::Frame => from.frame != to.frame,
            Field::Event => to.event != 0,
            Field::Sound => from.sound != to.sound,
        }
    }

    fn write(self, msg: &mut SizeBuf, to: &EntityState, bits: EntityBits) -> Result<(), MsgError> {
        match self {
            Field::Origin(i) => msg.write_coord(to.origin[i]),
            Field::Angle(i) => msg.write_angle(to.angles[i]),
            Field::Model(i) => msg.write_byte(to.model_index[i]),
            Field::Skin => write_sized(msg, to.skin, bits, EntityBits::SKIN8, EntityBits::SKIN16),
            Field::Effects => write_sized(
                msg,
                to.effects,
                bits,
                EntityBits::EFFECTS8,
                EntityBits::EFFECTS16,
            ),
            Field::RenderFx => write_sized(
                msg,
                to.render_fx,
                bits,
                EntityBits::RENDERFX8,
                EntityBits::RENDERFX16,
            ),
            Field::Solid => msg.write_short(to.solid as i16),
            Field::Frame if bits.contains(EntityBits::FRAME16) => {
                msg.write_short(to.frame as i16)
            }
            Field::Frame => msg.write_byte(to.frame as u8),
            Field::Event => msg.write_byte(to.event),
            Field::Sound => msg.write_byte(to.sound),
        }
    }

    fn read(self, msg: &mut SizeBuf, to: &mut EntityState, bits: EntityBits) -> Result<(), MsgError> {
        if !bits.intersects(self.mask()) {
            if self == Field::Event {
                to.event = 0;
            }
            return Ok(());
        }

        match self {
            Field::Origin(i) => to.origin[i] = msg.read_coord()?,
            Field::Angle(i) => to.angles[i] = msg.read_angle()?,
            Field::Model(i) => to.model_index[i] = msg.read_byte()?,
            Field::Skin => {
                to.skin = read_sized(msg, bits, EntityBits::SKIN8, EntityBits::SKIN16)?
            }
            Field::Effects => {
                to.effects = read_sized(msg, bits, EntityBits::EFFECTS8, EntityBits::EFFECTS16)?
            }
            Field::RenderFx => {
                to.render_fx =
                    read_sized(msg, bits, EntityBits::RENDERFX8, EntityBits::RENDERFX16)?
            }
            Field::Solid => to.solid = msg.read_short()? as u16,
            Field::Frame if bits.contains(EntityBits::FRAME16) => {
                to.frame = msg.read_short()? as u16
            }
            Field::Frame => to.frame = msg.read_byte()? as u16,
            Field::Event => to.event = msg.read_byte()?,
            Field::Sound => to.sound = msg.read_byte()?,
        }
        Ok(())
    }
}

/// Field bits for a delta from `from` to `to`, or for a complete record.
pub fn entity_bits(from: &EntityState, to: &EntityState, full: bool) -> EntityBits {
    FIELDS
        .iter()
        .filter(|f| match f {
            Field::Event => to.event != 0,
            _ => full || f.changed(from, to),
        })
        .fold(EntityBits::empty(), |bits, f| bits | f.bits_for(to))
}

fn write_header(msg: &mut SizeBuf, mut bits: EntityBits, number: u16) -> Result<(), MsgError> {
    if number > 0xff {
        bits |= EntityBits::NUMBER16;
    }

    let mut raw = bits.bits();
    loop {
        let byte = (raw & 0x7f) as u8;
        raw >>= 7;
        if raw == 0 {
            msg.write_byte(byte)?;
            break;
        }
        msg.write_byte(byte | 0x80)?;
    }

    if bits.contains(EntityBits::NUMBER16) {
        msg.write_short(number as i16)
    } else {
        msg.write_byte(number as u8)
    }
}

/// Writes `to` as a delta against `from`. With `full` every field is sent.
/// Returns false without writing anything if nothing changed.
pub fn write_delta_entity(
    from: &EntityState,
    to: &EntityState,
    msg: &mut SizeBuf,
    full: bool,
) -> Result<bool, MsgError> {
    let bits = entity_bits(from, to, full);
    if bits.is_empty() {
        return Ok(false);
    }

    write_header(msg, bits, to.number)?;
    for field in FIELDS {
        if bits.intersects(field.mask()) {
            field.write(msg, to, bits)?;
        }
    }
    Ok(true)
}

pub fn write_remove_entity(number: u16, msg: &mut SizeBuf) -> Result<(), MsgError> {
    write_header(msg, EntityBits::REMOVE, number)
}

/// Empty mask and entity number zero.
pub fn write_entity_terminator(msg: &mut SizeBuf) -> Result<(), MsgError> {
    write_header(msg, EntityBits::empty(), 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityHeader {
    End,
    Remove(u16),
    Update(u16, EntityBits),
}

pub fn read_entity_header(msg: &mut SizeBuf) -> Result<EntityHeader, ProtocolError> {
    let mut raw = 0u32;
    let mut done = false;
    for i in 0..MAX_MASK_BYTES {
        let byte = msg.read_byte()?;
        raw |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            done = true;
            break;
        }
    }
    let bits = match EntityBits::from_bits(raw) {
        Some(bits) if done => bits,
        _ => return Err(ProtocolError::BadFieldMask(raw)),
    };

    let number = if bits.contains(EntityBits::NUMBER16) {
        msg.read_short()? as u16
    } else {
        msg.read_byte()? as u16
    };

    if number == 0 && bits.is_empty() {
        return Ok(EntityHeader::End);
    }
    if number == 0 || number as usize >= MAX_EDICTS {
        return Err(ProtocolError::BadEntityNumber(number as i32));
    }
    if bits.contains(EntityBits::REMOVE) {
        return Ok(EntityHeader::Remove(number));
    }
    Ok(EntityHeader::Update(number, bits))
}

/// Applies the fields announced by `bits` on top of `from`.
pub fn read_delta_entity(
    from: &EntityState,
    number: u16,
    bits: EntityBits,
    msg: &mut SizeBuf,
) -> Result<EntityState, MsgError> {
    let mut to = *from;
    to.number = number;
    for field in FIELDS {
        field.read(msg, &mut to, bits)?;
    }
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(number: u16) -> EntityState {
        EntityState {
            number,
            origin: Vec3::new(100.0, -50.5, 24.125),
            angles: Vec3::new(0.0, 90.0, 0.0),
            model_index: [3, 0, 0, 0],
            frame: 12,
            skin: 1,
            effects: 0x10,
            render_fx: 0,
            solid: 31,
            sound: 0,
            event: 0,
        }
    }

    fn decode(msg: &mut SizeBuf, from: &EntityState) -> EntityState {
        match read_entity_header(msg).unwrap() {
            EntityHeader::Update(number, bits) => {
                read_delta_entity(from, number, bits, msg).unwrap()
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_unchanged_writes_nothing() {
        let state = sample(5);
        let mut msg = SizeBuf::new(64);
        assert!(!write_delta_entity(&state, &state, &mut msg, false).unwrap());
        assert!(msg.is_empty());
    }

    #[test]
    fn test_single_field_delta() {
        let from = sample(5);
        let mut to = from;
        to.origin.x += 8.0;

        let mut msg = SizeBuf::new(64);
        write_delta_entity(&from, &to, &mut msg, false).unwrap();
        // mask byte, number byte, one coord
        assert_eq!(msg.len(), 4);

        let decoded = decode(&mut msg, &from);
        assert_eq!(decoded, to);
    }

    #[test]
    fn test_full_record_from_nothing() {
        let to = sample(7);
        let mut msg = SizeBuf::new(64);
        write_delta_entity(&EntityState::default(), &to, &mut msg, true).unwrap();

        // A full record decodes the same whatever the reference.
        let mut garbage = sample(7);
        garbage.origin = Vec3::splat(999.0);
        garbage.model_index = [9, 9, 9, 9];
        assert_eq!(decode(&mut msg, &garbage), to);
    }

    #[test]
    fn test_event_is_never_suppressed_and_resets() {
        let mut from = sample(9);
        from.event = 2;
        let to = from;

        let mut msg = SizeBuf::new(64);
        assert!(write_delta_entity(&from, &to, &mut msg, false).unwrap());
        assert_eq!(decode(&mut msg, &EntityState::default()).event, 2);

        let mut quiet = to;
        quiet.event = 0;
        quiet.frame += 1;
        let mut msg = SizeBuf::new(64);
        write_delta_entity(&to, &quiet, &mut msg, false).unwrap();
        assert_eq!(decode(&mut msg, &to).event, 0);
    }

    #[test]
    fn test_sized_fields() {
        let from = EntityState::new(300);
        let mut to = from;
        to.skin = 300;
        to.effects = 70_000;
        to.frame = 500;

        let bits = entity_bits(&from, &to, false);
        assert!(bits.contains(EntityBits::SKIN16) && !bits.contains(EntityBits::SKIN8));
        assert!(bits.contains(EntityBits::EFFECTS8 | EntityBits::EFFECTS16));
        assert!(bits.contains(EntityBits::FRAME16));

        let mut msg = SizeBuf::new(64);
        write_delta_entity(&from, &to, &mut msg, false).unwrap();
        assert_eq!(decode(&mut msg, &from), to);
    }

    #[test]
    fn test_remove_and_terminator() {
        let mut msg = SizeBuf::new(16);
        write_remove_entity(600, &mut msg).unwrap();
        write_entity_terminator(&mut msg).unwrap();
        assert_eq!(&msg.data()[msg.len() - 2..], &[0, 0]);

        assert_eq!(read_entity_header(&mut msg).unwrap(), EntityHeader::Remove(600));
        assert_eq!(read_entity_header(&mut msg).unwrap(), EntityHeader::End);
    }

    #[test]
    fn test_bad_numbers() {
        let mut msg = SizeBuf::new(16);
        write_header(&mut msg, EntityBits::ORIGIN1, MAX_EDICTS as u16).unwrap();
        assert!(matches!(
            read_entity_header(&mut msg),
            Err(ProtocolError::BadEntityNumber(_))
        ));

        let mut msg = SizeBuf::from_bytes(&[0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(
            read_entity_header(&mut msg),
            Err(ProtocolError::BadFieldMask(_))
        ));
    }
}
