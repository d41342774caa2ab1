use bitflags::bitflags;
use glam::Vec3;

use crate::msg::{MsgError, SizeBuf};
use crate::protocol::MAX_STATS;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PlayerBits: u16 {
        const M_TYPE = 1 << 0;
        const M_ORIGIN = 1 << 1;
        const M_VELOCITY = 1 << 2;
        const M_TIME = 1 << 3;
        const M_FLAGS = 1 << 4;
        const M_GRAVITY = 1 << 5;
        const M_DELTA_ANGLES = 1 << 6;
        const VIEWOFFSET = 1 << 7;
        const VIEWANGLES = 1 << 8;
        const KICKANGLES = 1 << 9;
        const BLEND = 1 << 10;
        const FOV = 1 << 11;
        const WEAPONINDEX = 1 << 12;
        const WEAPONFRAME = 1 << 13;
        const RDFLAGS = 1 << 14;
    }
}

/// The viewing client's own state. Sent every frame as a delta against the
/// player state of the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerState {
    pub pm_type: u8,
    pub origin: Vec3,
    pub velocity: Vec3,
    pub pm_flags: u8,
    pub pm_time: u8,
    pub gravity: i16,
    pub delta_angles: Vec3,

    pub view_angles: Vec3,
    /// Quarter unit precision, as are kick, gun offset and gun angles.
    pub view_offset: Vec3,
    pub kick_angles: Vec3,
    pub gun_angles: Vec3,
    pub gun_offset: Vec3,
    pub gun_index: u8,
    pub gun_frame: u8,
    /// RGBA, 0..1 each.
    pub blend: [f32; 4],
    pub fov: f32,
    pub rdflags: u8,
    pub stats: [i16; MAX_STATS],
}

fn write_quarter(msg: &mut SizeBuf, v: Vec3) -> Result<(), MsgError> {
    for i in 0..3 {
        msg.write_char((v[i] * 4.0).round().clamp(-128.0, 127.0) as i8)?;
    }
    Ok(())
}

fn read_quarter(msg: &mut SizeBuf) -> Result<Vec3, MsgError> {
    Ok(Vec3::new(
        msg.read_char()? as f32 * 0.25,
        msg.read_char()? as f32 * 0.25,
        msg.read_char()? as f32 * 0.25,
    ))
}

fn write_angles16(msg: &mut SizeBuf, v: Vec3) -> Result<(), MsgError> {
    for i in 0..3 {
        msg.write_angle16(v[i])?;
    }
    Ok(())
}

fn read_angles16(msg: &mut SizeBuf) -> Result<Vec3, MsgError> {
    Ok(Vec3::new(
        msg.read_angle16()?,
        msg.read_angle16()?,
        msg.read_angle16()?,
    ))
}

pub fn player_bits(from: &PlayerState, to: &PlayerState) -> PlayerBits {
    let checks = [
        (from.pm_type != to.pm_type, PlayerBits::M_TYPE),
        (from.origin != to.origin, PlayerBits::M_ORIGIN),
        (from.velocity != to.velocity, PlayerBits::M_VELOCITY),
        (from.pm_time != to.pm_time, PlayerBits::M_TIME),
        (from.pm_flags != to.pm_flags, PlayerBits::M_FLAGS),
        (from.gravity != to.gravity, PlayerBits::M_GRAVITY),
        (from.delta_angles != to.delta_angles, PlayerBits::M_DELTA_ANGLES),
        (from.view_offset != to.view_offset, PlayerBits::VIEWOFFSET),
        (from.view_angles != to.view_angles, PlayerBits::VIEWANGLES),
        (from.kick_angles != to.kick_angles, PlayerBits::KICKANGLES),
        (from.blend != to.blend, PlayerBits::BLEND),
        (from.fov != to.fov, PlayerBits::FOV),
        (from.gun_index != to.gun_index, PlayerBits::WEAPONINDEX),
        (
            from.gun_frame != to.gun_frame
                || from.gun_offset != to.gun_offset
                || from.gun_angles != to.gun_angles,
            PlayerBits::WEAPONFRAME,
        ),
        (from.rdflags != to.rdflags, PlayerBits::RDFLAGS),
    ];

    checks
        .into_iter()
        .filter(|(changed, _)| *changed)
        .fold(PlayerBits::empty(), |bits, (_, bit)| bits | bit)
}

/// Writes the changed fields of `to`, then the changed stats. A full frame
/// passes the default state as `from`.
pub fn write_delta_player(
    from: &PlayerState,
    to: &PlayerState,
    msg: &mut SizeBuf,
) -> Result<(), MsgError> {
    let bits = player_bits(from, to);
    msg.write_short(bits.bits() as i16)?;

    if bits.contains(PlayerBits::M_TYPE) {
        msg.write_byte(to.pm_type)?;
    }
    if bits.contains(PlayerBits::M_ORIGIN) {
        msg.write_pos(to.origin)?;
    }
    if bits.contains(PlayerBits::M_VELOCITY) {
        msg.write_pos(to.velocity)?;
    }
    if bits.contains(PlayerBits::M_TIME) {
        msg.write_byte(to.pm_time)?;
    }
    if bits.contains(PlayerBits::M_FLAGS) {
        msg.write_byte(to.pm_flags)?;
    }
    if bits.contains(PlayerBits::M_GRAVITY) {
        msg.write_short(to.gravity)?;
    }
    if bits.contains(PlayerBits::M_DELTA_ANGLES) {
        write_angles16(msg, to.delta_angles)?;
    }

    if bits.contains(PlayerBits::VIEWOFFSET) {
        write_quarter(msg, to.view_offset)?;
    }
    if bits.contains(PlayerBits::VIEWANGLES) {
        write_angles16(msg, to.view_angles)?;
    }
    if bits.contains(PlayerBits::KICKANGLES) {
        write_quarter(msg, to.kick_angles)?;
    }
    if bits.contains(PlayerBits::WEAPONINDEX) {
        msg.write_byte(to.gun_index)?;
    }
    if bits.contains(PlayerBits::WEAPONFRAME) {
        msg.write_byte(to.gun_frame)?;
        write_quarter(msg, to.gun_offset)?;
        write_quarter(msg, to.gun_angles)?;
    }
    if bits.contains(PlayerBits::BLEND) {
        for c in to.blend {
            msg.write_byte((c.clamp(0.0, 1.0) * 255.0).round() as u8)?;
        }
    }
    if bits.contains(PlayerBits::FOV) {
        msg.write_byte(to.fov.clamp(0.0, 255.0) as u8)?;
    }
    if bits.contains(PlayerBits::RDFLAGS) {
        msg.write_byte(to.rdflags)?;
    }

    let stat_bits = (0..MAX_STATS)
        .filter(|&i| from.stats[i] != to.stats[i])
        .fold(0u32, |mask, i| mask | 1 << i);
    msg.write_long(stat_bits as i32)?;
    for i in (0..MAX_STATS).filter(|&i| stat_bits & 1 << i != 0) {
        msg.write_short(to.stats[i])?;
    }

    Ok(())
}

pub fn read_delta_player(from: &PlayerState, msg: &mut SizeBuf) -> Result<PlayerState, MsgError> {
    let mut to = *from;
    let bits = PlayerBits::from_bits_truncate(msg.read_short()? as u16);

    if bits.contains(PlayerBits::M_TYPE) {
        to.pm_type = msg.read_byte()?;
    }
    if bits.contains(PlayerBits::M_ORIGIN) {
        to.origin = msg.read_pos()?;
    }
    if bits.contains(PlayerBits::M_VELOCITY) {
        to.velocity = msg.read_pos()?;
    }
    if bits.contains(PlayerBits::M_TIME) {
        to.pm_time = msg.read_byte()?;
    }
    if bits.contains(PlayerBits::M_FLAGS) {
        to.pm_flags = msg.read_byte()?;
    }
    if bits.contains(PlayerBits::M_GRAVITY) {
        to.gravity = msg.read_short()?;
    }
    if bits.contains(PlayerBits::M_DELTA_ANGLES) {
        to.delta_angles = read_angles16(msg)?;
    }

    if bits.contains(PlayerBits::VIEWOFFSET) {
        to.view_offset = read_quarter(msg)?;
    }
    if bits.contains(PlayerBits::VIEWANGLES) {
        to.view_angles = read_angles16(msg)?;
    }
    if bits.contains(PlayerBits::KICKANGLES) {
        to.kick_angles = read_quarter(msg)?;
    }
    if bits.contains(PlayerBits::WEAPONINDEX) {
        to.gun_index = msg.read_byte()?;
    }
    if bits.contains(PlayerBits::WEAPONFRAME) {
        to.gun_frame = msg.read_byte()?;
        to.gun_offset = read_quarter(msg)?;
        to.gun_angles = read_quarter(msg)?;
    }
    if bits.contains(PlayerBits::BLEND) {
        for c in &mut to.blend {
            *c = msg.read_byte()? as f32 / 255.0;
        }
    }
    if bits.contains(PlayerBits::FOV) {
        to.fov = msg.read_byte()? as f32;
    }
    if bits.contains(PlayerBits::RDFLAGS) {
        to.rdflags = msg.read_byte()?;
    }

    let stat_bits = msg.read_long()? as u32;
    for i in 0..MAX_STATS {
        if stat_bits & 1 << i != 0 {
            to.stats[i] = msg.read_short()?;
        }
    }

    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PlayerState {
        let mut ps = PlayerState {
            pm_type: 1,
            origin: Vec3::new(64.0, -32.5, 8.125),
            velocity: Vec3::new(0.0, 320.0, -10.0),
            gravity: 800,
            view_angles: Vec3::new(0.0, 90.0, 0.0),
            view_offset: Vec3::new(0.0, 0.0, 22.0),
            gun_index: 4,
            gun_frame: 7,
            gun_offset: Vec3::new(0.25, -0.5, 1.0),
            blend: [1.0, 0.0, 0.0, 1.0],
            fov: 90.0,
            ..Default::default()
        };
        ps.stats[1] = 100;
        ps.stats[13] = -3;
        ps
    }

    #[test]
    fn test_full_player_state() {
        let to = sample();
        let mut msg = SizeBuf::new(256);
        write_delta_player(&PlayerState::default(), &to, &mut msg).unwrap();

        let decoded = read_delta_player(&PlayerState::default(), &mut msg).unwrap();
        assert_eq!(decoded, to);
        assert!(msg.is_exhausted());
    }

    #[test]
    fn test_unchanged_is_six_bytes() {
        let ps = sample();
        let mut msg = SizeBuf::new(64);
        write_delta_player(&ps, &ps, &mut msg).unwrap();
        assert_eq!(msg.data(), &[0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_single_stat_update() {
        let from = sample();
        let mut to = from;
        to.stats[5] = 42;

        let mut msg = SizeBuf::new(64);
        write_delta_player(&from, &to, &mut msg).unwrap();
        // empty field mask, stat mask, one short
        assert_eq!(msg.len(), 2 + 4 + 2);
        assert_eq!(&msg.data()[2..6], &(1u32 << 5).to_le_bytes());

        assert_eq!(read_delta_player(&from, &mut msg).unwrap(), to);
    }

    #[test]
    fn test_weapon_frame_carries_gun_offset() {
        let from = sample();
        let mut to = from;
        to.gun_angles.x = 2.0;
        assert_eq!(player_bits(&from, &to), PlayerBits::WEAPONFRAME);
    }
}
