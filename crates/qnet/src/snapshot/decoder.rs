use super::entity::{EntityHeader, EntityState, read_delta_entity, read_entity_header};
use super::player::{PlayerState, read_delta_player};
use crate::msg::SizeBuf;
use crate::protocol::{ProtocolError, ServerOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub number: i32,
    /// -1 for a full frame.
    pub delta_frame: i32,
}

impl FrameHeader {
    pub fn is_full(&self) -> bool {
        self.delta_frame <= 0
    }
}

/// Reads the numbers following an `svc_frame` opcode.
pub fn read_frame_header(msg: &mut SizeBuf) -> Result<FrameHeader, ProtocolError> {
    Ok(FrameHeader {
        number: msg.read_long()?,
        delta_frame: msg.read_long()?,
    })
}

fn expect_op(msg: &mut SizeBuf, op: ServerOp) -> Result<(), ProtocolError> {
    let found = msg.read_byte()?;
    if found != op as u8 {
        return Err(ProtocolError::IncompleteFrame(found));
    }
    Ok(())
}

/// Reads the player state and entity list of a frame against a reference.
pub fn read_frame_body(
    msg: &mut SizeBuf,
    from_player: &PlayerState,
    from_entities: &[EntityState],
) -> Result<(PlayerState, Vec<EntityState>), ProtocolError> {
    expect_op(msg, ServerOp::PlayerInfo)?;
    let player = read_delta_player(from_player, msg)?;

    expect_op(msg, ServerOp::PacketEntities)?;
    let entities = read_packet_entities(msg, from_entities)?;

    Ok((player, entities))
}

/// Merges the entity records that follow against `old`. Entities not
/// mentioned carry over unchanged. An entity missing from `old` arrives as a
/// full record, so it is read over an empty state and never a spawn baseline.
pub fn read_packet_entities(
    msg: &mut SizeBuf,
    old: &[EntityState],
) -> Result<Vec<EntityState>, ProtocolError> {
    let mut out = Vec::with_capacity(old.len());
    let mut old = old.iter().peekable();
    let mut previous = 0u16;

    loop {
        let header = read_entity_header(msg)?;
        let number = match header {
            EntityHeader::End => break,
            EntityHeader::Remove(number) | EntityHeader::Update(number, _) => number,
        };

        if number <= previous {
            return Err(ProtocolError::EntityOrder {
                previous,
                next: number,
            });
        }
        previous = number;

        while let Some(state) = old.next_if(|s| s.number < number) {
            out.push(carried(state));
        }
        let existing = old.next_if(|s| s.number == number);

        match header {
            EntityHeader::Update(_, bits) => {
                let from = existing.copied().unwrap_or_else(|| EntityState::new(number));
                out.push(read_delta_entity(&from, number, bits, msg)?);
            }
            EntityHeader::Remove(_) if existing.is_none() => {
                log::debug!("remove of entity {} not in reference", number);
            }
            _ => {}
        }
    }

    out.extend(old.map(carried));
    Ok(out)
}

/// An entity with no record this frame keeps its fields but not its event.
fn carried(state: &EntityState) -> EntityState {
    EntityState { event: 0, ..*state }
}
