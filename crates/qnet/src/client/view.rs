use glam::Vec3;

use super::ClientSession;
use crate::snapshot::{EntityState, PlayerState};

/// Movement over this many units between frames is a teleport and is not
/// smoothed.
const MAX_LERP_DISTANCE: f32 = 512.0;

/// What the renderer needs for one local frame: the newest decoded frame,
/// the one before it and how far between them to draw.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub frame: i32,
    /// Same as `frame` until a second frame arrives.
    pub old_frame: i32,
    /// 0 draws the old frame, 1 the current one.
    pub lerp: f32,
    pub player: PlayerState,
    pub old_player: PlayerState,
    pub entities: Vec<EntityState>,
    pub old_entities: Vec<EntityState>,
}

impl ViewState {
    pub fn entity(&self, number: u16) -> Option<&EntityState> {
        find(&self.entities, number)
    }

    pub fn entity_origin(&self, number: u16) -> Option<Vec3> {
        let current = self.entity(number)?;
        let origin = match find(&self.old_entities, number) {
            Some(old) => lerp_origin(old.origin, current.origin, self.lerp),
            None => current.origin,
        };
        Some(origin)
    }

    pub fn view_origin(&self) -> Vec3 {
        lerp_origin(self.old_player.origin, self.player.origin, self.lerp)
    }
}

fn find(entities: &[EntityState], number: u16) -> Option<&EntityState> {
    entities
        .binary_search_by_key(&number, |e| e.number)
        .ok()
        .map(|i| &entities[i])
}

fn lerp_origin(old: Vec3, new: Vec3, t: f32) -> Vec3 {
    if (new - old).abs().max_element() > MAX_LERP_DISTANCE {
        new
    } else {
        old.lerp(new, t)
    }
}

impl ClientSession {
    /// `None` until the first frame has been decoded.
    pub fn view(&self, now: u64) -> Option<ViewState> {
        let current = self.current_frame()?;
        let entities = self.frame_entities(current)?;

        let interval = self.config.frame_interval_ms.max(1) as f32;
        let lerp = (now.saturating_sub(current.received) as f32 / interval).clamp(0.0, 1.0);

        let old = self
            .previous_frame()
            .and_then(|f| self.frame_entities(f).map(|ents| (f, ents)));
        let (old_frame, old_player, old_entities) = match old {
            Some((frame, ents)) => (frame.number, frame.player, ents),
            None => (current.number, current.player, entities.clone()),
        };

        Some(ViewState {
            frame: current.number,
            old_frame,
            lerp,
            player: current.player,
            old_player,
            entities,
            old_entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(old: Vec3, new: Vec3) -> ViewState {
        ViewState {
            frame: 2,
            old_frame: 1,
            lerp: 0.25,
            player: PlayerState::default(),
            old_player: PlayerState::default(),
            entities: vec![EntityState {
                origin: new,
                ..EntityState::new(4)
            }],
            old_entities: vec![EntityState {
                origin: old,
                ..EntityState::new(4)
            }],
        }
    }

    #[test]
    fn test_entity_origin_lerps() {
        let v = view(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0));
        assert_eq!(v.entity_origin(4), Some(Vec3::new(25.0, 0.0, 0.0)));
        assert_eq!(v.entity_origin(5), None);
    }

    #[test]
    fn test_teleport_snaps() {
        let v = view(Vec3::ZERO, Vec3::new(0.0, 2000.0, 0.0));
        assert_eq!(v.entity_origin(4), Some(Vec3::new(0.0, 2000.0, 0.0)));
    }
}
