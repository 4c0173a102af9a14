//! Food pellets.

use super::cell::mass_to_radius;
use super::placement::choose_position;
use super::registry::{Entity, EntityId, Registry};
use crate::config::Placement;
use crate::world::WorldBorder;
use glam::Vec2;
use rand::Rng;

/// A food pellet. Always eaten on contact.
#[derive(Debug, Clone)]
pub struct Food {
    pub id: EntityId,
    pub position: Vec2,
    pub mass: f32,
    pub hue: u16,
    radius: f32,
}

impl Food {
    pub fn new(id: EntityId, position: Vec2, mass: f32, hue: u16) -> Self {
        Self {
            id,
            position,
            mass,
            hue,
            radius: mass_to_radius(mass),
        }
    }
}

impl Entity for Food {
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

impl Registry<Food> {
    /// Create `n` pellets of `unit_mass` using the given placement policy.
    pub fn add_new(&mut self, n: usize, unit_mass: f32, placement: Placement, border: &WorldBorder) {
        let mut rng = rand::rng();
        let margin = mass_to_radius(unit_mass);
        let mut existing = self.positions();
        for _ in 0..n {
            let position = choose_position(placement, border, margin, &existing, &mut rng);
            let id = self.next_id();
            let hue = rng.random_range(0..360u16);
            self.insert(Food::new(id, position, unit_mass, hue));
            existing.push(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_new_inside_world() {
        let border = WorldBorder::new(200.0, 100.0);
        let mut food = Registry::<Food>::new();
        food.add_new(40, 1.0, Placement::Spread, &border);
        assert_eq!(food.len(), 40);
        for pellet in food.iter() {
            assert_eq!(pellet.mass, 1.0);
            assert!(pellet.hue < 360);
            assert!(pellet.position.x >= 0.0 && pellet.position.x <= 200.0);
            assert!(pellet.position.y >= 0.0 && pellet.position.y <= 100.0);
        }
    }
}
