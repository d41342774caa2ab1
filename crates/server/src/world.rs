use glam::Vec3;

use qnet::{EntityState, PlayerState, UserCmd};

const PLAYER_MODEL: u8 = 255;
const PROP_MODEL: u8 = 1;
const PROP_COUNT: u16 = 8;
const RUN_SPEED: f32 = 300.0;
const WALK_SPEED: f32 = 150.0;
const BUTTON_RUN: u8 = 1 << 1;

/// Stand-in game: players walk around on their commands while a ring of
/// props orbits the origin.
pub struct World {
    time: f32,
    players: Vec<Option<PlayerState>>,
    first_prop: u16,
}

impl World {
    pub fn new(max_clients: usize) -> Self {
        Self {
            time: 0.0,
            players: vec![None; max_clients],
            first_prop: max_clients as u16 + 1,
        }
    }

    pub fn spawn_player(&mut self, slot: usize) {
        if let Some(player) = self.players.get_mut(slot) {
            *player = Some(PlayerState {
                origin: Vec3::new(0.0, 0.0, 24.0),
                fov: 90.0,
                ..Default::default()
            });
        }
    }

    pub fn remove_player(&mut self, slot: usize) {
        if let Some(player) = self.players.get_mut(slot) {
            *player = None;
        }
    }

    pub fn player(&self, slot: usize) -> Option<&PlayerState> {
        self.players.get(slot)?.as_ref()
    }

    pub fn apply_command(&mut self, slot: usize, cmd: &UserCmd) {
        let Some(Some(player)) = self.players.get_mut(slot) else {
            return;
        };
        let dt = cmd.msec as f32 / 1000.0;
        let speed = if cmd.buttons & BUTTON_RUN != 0 {
            RUN_SPEED
        } else {
            WALK_SPEED
        };

        let wish = Vec3::new(cmd.forward_move as f32, cmd.side_move as f32, cmd.up_move as f32);
        if wish.length_squared() > 0.001 {
            let (sin_yaw, cos_yaw) = cmd.angles.y.to_radians().sin_cos();
            let dir = wish.normalize();
            let world_move = Vec3::new(
                dir.x * cos_yaw + dir.y * sin_yaw,
                dir.x * sin_yaw - dir.y * cos_yaw,
                dir.z,
            );
            player.velocity = world_move * speed;
            player.origin += player.velocity * dt;
        } else {
            player.velocity = Vec3::ZERO;
        }
        player.view_angles = cmd.angles;
    }

    pub fn step(&mut self, dt: f32) {
        self.time += dt;
    }

    pub fn baselines(&self) -> impl Iterator<Item = EntityState> + '_ {
        (0..PROP_COUNT).map(|i| self.prop(i))
    }

    pub fn entities(&self) -> Vec<EntityState> {
        let players = self.players.iter().enumerate().filter_map(|(slot, p)| {
            let player = p.as_ref()?;
            Some(EntityState {
                origin: player.origin,
                angles: Vec3::new(0.0, player.view_angles.y, 0.0),
                model_index: [PLAYER_MODEL, 0, 0, 0],
                ..EntityState::new(slot as u16 + 1)
            })
        });
        players.chain(self.baselines()).collect()
    }

    fn prop(&self, i: u16) -> EntityState {
        let phase = self.time * 0.5 + i as f32 * std::f32::consts::TAU / PROP_COUNT as f32;
        let (sin, cos) = phase.sin_cos();
        EntityState {
            origin: Vec3::new(cos * 256.0, sin * 256.0, 32.0),
            angles: Vec3::new(0.0, phase.to_degrees().rem_euclid(360.0), 0.0),
            model_index: [PROP_MODEL, 0, 0, 0],
            frame: (self.time * 10.0) as u16 % 40,
            ..EntityState::new(self.first_prop + i)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_players_come_before_props() {
        let mut world = World::new(4);
        world.spawn_player(2);
        let numbers: Vec<u16> = world.entities().iter().map(|e| e.number).collect();
        assert_eq!(numbers[0], 3);
        assert_eq!(numbers[1..], (5u16..13).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_forward_move_follows_yaw() {
        let mut world = World::new(1);
        world.spawn_player(0);
        let cmd = UserCmd {
            msec: 100,
            angles: Vec3::new(0.0, 90.0, 0.0),
            forward_move: 200,
            ..Default::default()
        };
        world.apply_command(0, &cmd);
        let origin = world.player(0).unwrap().origin;
        assert!(origin.x.abs() < 0.01);
        assert!((origin.y - 15.0).abs() < 0.01);
    }

    #[test]
    fn test_commands_for_empty_slot_ignored() {
        let mut world = World::new(2);
        world.apply_command(1, &UserCmd::default());
        assert!(world.player(1).is_none());
        world.remove_player(5);
    }
}
