use super::entity::{
    EntityState, write_delta_entity, write_entity_terminator, write_remove_entity,
};
use super::player::{PlayerState, write_delta_player};
use crate::msg::{MsgError, SizeBuf};
use crate::protocol::ServerOp;

/// One side of a frame diff.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub number: i32,
    pub player: &'a PlayerState,
    /// Sorted by entity number.
    pub entities: &'a [EntityState],
}

/// Writes the entity list of `to` as changes against `from`. With no
/// reference every entity goes out as a complete record and nothing is
/// removed. Entities missing from `from` are complete records as well.
pub fn write_packet_entities(
    from: Option<&[EntityState]>,
    to: &[EntityState],
    msg: &mut SizeBuf,
) -> Result<(), MsgError> {
    msg.write_byte(ServerOp::PacketEntities as u8)?;

    let from = from.unwrap_or(&[]);
    let mut old = from.iter().peekable();
    let mut new = to.iter().peekable();

    loop {
        match (old.peek(), new.peek()) {
            (None, None) => break,
            (Some(o), Some(n)) if o.number == n.number => {
                write_delta_entity(o, n, msg, false)?;
                old.next();
                new.next();
            }
            (Some(o), Some(n)) if n.number < o.number => {
                write_delta_entity(&EntityState::default(), n, msg, true)?;
                new.next();
            }
            (None, Some(n)) => {
                write_delta_entity(&EntityState::default(), n, msg, true)?;
                new.next();
            }
            (Some(o), _) => {
                write_remove_entity(o.number, msg)?;
                old.next();
            }
        }
    }

    write_entity_terminator(msg)
}

/// Writes a complete `svc_frame`: header, player state and entities. A
/// missing reference produces a full frame with delta number -1.
pub fn write_frame(
    msg: &mut SizeBuf,
    to: FrameView<'_>,
    from: Option<FrameView<'_>>,
) -> Result<(), MsgError> {
    msg.write_byte(ServerOp::Frame as u8)?;
    msg.write_long(to.number)?;
    msg.write_long(from.map_or(-1, |f| f.number))?;

    let default_player = PlayerState::default();
    msg.write_byte(ServerOp::PlayerInfo as u8)?;
    write_delta_player(from.map_or(&default_player, |f| f.player), to.player, msg)?;

    write_packet_entities(from.map(|f| f.entities), to.entities, msg)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::snapshot::entity::EntityBits;

    fn moving(number: u16, x: f32) -> EntityState {
        EntityState {
            number,
            origin: Vec3::new(x, 0.0, 0.0),
            model_index: [1, 0, 0, 0],
            ..Default::default()
        }
    }

    fn first_mask(msg: &SizeBuf) -> u8 {
        // opcode, then the first record's mask byte
        msg.data()[1]
    }

    #[test]
    fn test_new_entity_is_a_full_record() {
        let old = [moving(1, 0.0)];
        let new = [moving(1, 0.0), EntityState::new(2)];

        let mut msg = SizeBuf::new(256);
        write_packet_entities(Some(&old[..]), &new, &mut msg).unwrap();

        // Entity 1 is unchanged, so the only record is the new entity and
        // it carries every origin bit despite its zero origin.
        let mask = first_mask(&msg) as u32;
        let wanted = (EntityBits::ORIGIN1 | EntityBits::ORIGIN2 | EntityBits::ORIGIN3).bits();
        assert_eq!(mask & wanted, wanted);
    }

    #[test]
    fn test_unchanged_delta_is_just_terminator() {
        let frame = [moving(1, 5.0), moving(3, 6.0)];
        let mut msg = SizeBuf::new(64);
        write_packet_entities(Some(&frame[..]), &frame, &mut msg).unwrap();
        assert_eq!(msg.data(), &[ServerOp::PacketEntities as u8, 0, 0]);
    }

    #[test]
    fn test_removal_record() {
        let old = [moving(1, 5.0), moving(3, 6.0)];
        let new = [moving(1, 5.0)];
        let mut msg = SizeBuf::new(64);
        write_packet_entities(Some(&old[..]), &new, &mut msg).unwrap();
        assert_eq!(
            msg.data(),
            &[ServerOp::PacketEntities as u8, EntityBits::REMOVE.bits() as u8, 3, 0, 0]
        );
    }
}
