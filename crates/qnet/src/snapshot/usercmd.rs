use bitflags::bitflags;
use glam::Vec3;

use crate::msg::{MsgError, SizeBuf};
use crate::protocol::ClientOp;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CmdBits: u8 {
        const ANGLE1 = 1 << 0;
        const ANGLE2 = 1 << 1;
        const ANGLE3 = 1 << 2;
        const FORWARD = 1 << 3;
        const SIDE = 1 << 4;
        const UP = 1 << 5;
        const BUTTONS = 1 << 6;
        const IMPULSE = 1 << 7;
    }
}

pub const BUTTON_ATTACK: u8 = 1;
pub const BUTTON_USE: u8 = 2;
pub const BUTTON_ANY: u8 = 128;

/// One frame of player input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UserCmd {
    pub msec: u8,
    pub buttons: u8,
    pub angles: Vec3,
    pub forward_move: i16,
    pub side_move: i16,
    pub up_move: i16,
    pub impulse: u8,
    pub light_level: u8,
}

const ANGLE_BITS: [CmdBits; 3] = [CmdBits::ANGLE1, CmdBits::ANGLE2, CmdBits::ANGLE3];

/// Movement deltas against `from`. Duration and light level always go.
pub fn write_delta_usercmd(from: &UserCmd, to: &UserCmd, msg: &mut SizeBuf) -> Result<(), MsgError> {
    let mut bits = CmdBits::empty();
    for i in 0..3 {
        if from.angles[i] != to.angles[i] {
            bits |= ANGLE_BITS[i];
        }
    }
    bits.set(CmdBits::FORWARD, from.forward_move != to.forward_move);
    bits.set(CmdBits::SIDE, from.side_move != to.side_move);
    bits.set(CmdBits::UP, from.up_move != to.up_move);
    bits.set(CmdBits::BUTTONS, from.buttons != to.buttons);
    bits.set(CmdBits::IMPULSE, from.impulse != to.impulse);

    msg.write_byte(bits.bits())?;
    for i in 0..3 {
        if bits.contains(ANGLE_BITS[i]) {
            msg.write_angle16(to.angles[i])?;
        }
    }
    if bits.contains(CmdBits::FORWARD) {
        msg.write_short(to.forward_move)?;
    }
    if bits.contains(CmdBits::SIDE) {
        msg.write_short(to.side_move)?;
    }
    if bits.contains(CmdBits::UP) {
        msg.write_short(to.up_move)?;
    }
    if bits.contains(CmdBits::BUTTONS) {
        msg.write_byte(to.buttons)?;
    }
    if bits.contains(CmdBits::IMPULSE) {
        msg.write_byte(to.impulse)?;
    }
    msg.write_byte(to.msec)?;
    msg.write_byte(to.light_level)
}

pub fn read_delta_usercmd(from: &UserCmd, msg: &mut SizeBuf) -> Result<UserCmd, MsgError> {
    let mut to = *from;
    let bits = CmdBits::from_bits_retain(msg.read_byte()?);

    for i in 0..3 {
        if bits.contains(ANGLE_BITS[i]) {
            to.angles[i] = msg.read_angle16()?;
        }
    }
    if bits.contains(CmdBits::FORWARD) {
        to.forward_move = msg.read_short()?;
    }
    if bits.contains(CmdBits::SIDE) {
        to.side_move = msg.read_short()?;
    }
    if bits.contains(CmdBits::UP) {
        to.up_move = msg.read_short()?;
    }
    if bits.contains(CmdBits::BUTTONS) {
        to.buttons = msg.read_byte()?;
    }
    if bits.contains(CmdBits::IMPULSE) {
        to.impulse = msg.read_byte()?;
    }
    to.msec = msg.read_byte()?;
    to.light_level = msg.read_byte()?;
    Ok(to)
}

/// Contents of a `clc_move`: the last frame the client holds and its three
/// newest commands, oldest first. Sending three lets the server recover
/// input lost with the previous two packets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveCommand {
    /// -1 asks for an uncompressed frame.
    pub last_frame: i32,
    pub cmds: [UserCmd; 3],
}

impl MoveCommand {
    pub fn write(&self, msg: &mut SizeBuf) -> Result<(), MsgError> {
        msg.write_byte(ClientOp::Move as u8)?;
        msg.write_long(self.last_frame)?;

        let mut from = UserCmd::default();
        for cmd in &self.cmds {
            write_delta_usercmd(&from, cmd, msg)?;
            from = *cmd;
        }
        Ok(())
    }

    /// Reads the body following the opcode.
    pub fn read(msg: &mut SizeBuf) -> Result<Self, MsgError> {
        let last_frame = msg.read_long()?;

        let mut cmds = [UserCmd::default(); 3];
        let mut from = UserCmd::default();
        for cmd in &mut cmds {
            *cmd = read_delta_usercmd(&from, msg)?;
            from = *cmd;
        }
        Ok(Self { last_frame, cmds })
    }

    pub fn newest(&self) -> &UserCmd {
        &self.cmds[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walking(msec: u8) -> UserCmd {
        UserCmd {
            msec,
            angles: Vec3::new(0.0, 45.0, 0.0),
            forward_move: 200,
            light_level: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_unchanged_cmd_is_three_bytes() {
        let cmd = walking(16);
        let mut msg = SizeBuf::new(32);
        write_delta_usercmd(&cmd, &cmd, &mut msg).unwrap();
        assert_eq!(msg.data(), &[0, 16, 64]);
    }

    #[test]
    fn test_move_command() {
        let mut fire = walking(17);
        fire.buttons = BUTTON_ATTACK;
        let mv = MoveCommand {
            last_frame: 41,
            cmds: [walking(16), walking(16), fire],
        };

        let mut msg = SizeBuf::new(128);
        mv.write(&mut msg).unwrap();
        assert_eq!(msg.read_byte().unwrap(), ClientOp::Move as u8);
        let decoded = MoveCommand::read(&mut msg).unwrap();
        assert_eq!(decoded, mv);
        assert_eq!(decoded.newest().buttons, BUTTON_ATTACK);
        assert!(msg.is_exhausted());
    }
}
