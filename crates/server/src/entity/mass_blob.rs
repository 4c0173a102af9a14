//! Ejected mass blobs.

use super::cell::{mass_to_radius, CellId};
use super::registry::{Entity, EntityId, Registry};
use crate::world::WorldBorder;
use glam::Vec2;

/// Mass fired from a player cell. Drifts with decaying speed.
#[derive(Debug, Clone)]
pub struct MassBlob {
    pub id: EntityId,
    pub position: Vec2,
    /// Unit travel direction.
    pub direction: Vec2,
    pub speed: f32,
    pub mass: f32,
    /// Player that fired it.
    pub owner: u32,
    /// Cell that fired it.
    pub origin: CellId,
    pub hue: u16,
    radius: f32,
}

impl MassBlob {
    pub fn new(
        id: EntityId,
        position: Vec2,
        direction: Vec2,
        speed: f32,
        mass: f32,
        owner: u32,
        origin: CellId,
        hue: u16,
    ) -> Self {
        Self {
            id,
            position,
            direction: direction.normalize_or_zero(),
            speed,
            mass,
            owner,
            origin,
            hue,
            radius: mass_to_radius(mass),
        }
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.speed > 0.0
    }

    /// Whether `cell` of `player` is still shielded from eating this blob.
    #[inline]
    pub fn shields(&self, player: u32, cell: CellId) -> bool {
        self.owner == player && self.origin == cell && self.is_moving()
    }
}

impl Entity for MassBlob {
    fn id(&self) -> EntityId {
        self.id
    }
    fn position(&self) -> Vec2 {
        self.position
    }
    fn radius(&self) -> f32 {
        self.radius
    }
    fn mass(&self) -> f32 {
        self.mass
    }
}

/// Extra inset keeping blobs off the world edge.
const EDGE_INSET: f32 = 5.0;

impl Registry<MassBlob> {
    /// Advance every blob by one step.
    pub fn move_all(&mut self, border: &WorldBorder, decay: f32) {
        for blob in self.iter_mut() {
            if blob.speed <= 0.0 {
                continue;
            }
            blob.position += blob.direction * blob.speed;
            blob.speed = (blob.speed - decay).max(0.0);
            blob.position = border.clamp(blob.position, blob.radius + EDGE_INSET);
        }
    }
}
