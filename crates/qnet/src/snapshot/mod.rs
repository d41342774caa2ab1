//! Delta-compressed world state: entity and player records, the client's
//! input commands, and the frame histories both sides diff against.

pub mod decoder;
pub mod encoder;
mod entity;
mod history;
mod player;
mod usercmd;

pub use decoder::{FrameHeader, read_frame_body, read_frame_header, read_packet_entities};
pub use encoder::{FrameView, write_frame, write_packet_entities};
pub use entity::{
    EntityBits, EntityHeader, EntityState, entity_bits, read_delta_entity, read_entity_header,
    write_delta_entity, write_entity_terminator, write_remove_entity,
};
pub use history::{EntitySpan, EntityRing, FrameHistory};
pub use player::{PlayerBits, PlayerState, player_bits, read_delta_player, write_delta_player};
pub use usercmd::{
    BUTTON_ANY, BUTTON_ATTACK, BUTTON_USE, CmdBits, MoveCommand, UserCmd, read_delta_usercmd,
    write_delta_usercmd,
};
