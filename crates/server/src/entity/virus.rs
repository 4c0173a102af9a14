//! Viruses: forced-split hazards.

use super::cell::mass_to_radius;
use super::placement::choose_position;
use super::registry::{Entity, EntityId, Registry};
use crate::config::VirusConfig;
use crate::world::WorldBorder;
use glam::Vec2;
use rand::Rng;

/// Hue shared by every virus.
pub const VIRUS_HUE: u16 = 120;

/// A virus. Only a strictly heavier cell can eat it, and doing so splits the cell.
#[derive(Debug, Clone)]
pub struct Virus {
    pub id: EntityId,
    pub position: Vec2,
    pub mass: f32,
    radius: f32,
}

impl Virus {
    pub fn new(id: EntityId, position: Vec2, mass: f32) -> Self {
        Self {
            id,
            position,
            mass,
            radius: mass_to_radius(mass),
        }
    }
}

impl Entity for Virus {
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

impl Registry<Virus> {
    /// Create `n` viruses with masses drawn from the configured range.
    pub fn add_new(&mut self, n: usize, config: &VirusConfig, border: &WorldBorder) {
        let mut rng = rand::rng();
        let mut existing = self.positions();
        for _ in 0..n {
            let mass = if config.max_mass > config.min_mass {
                rng.random_range(config.min_mass..=config.max_mass)
            } else {
                config.min_mass
            };
            let position =
                choose_position(config.placement, border, mass_to_radius(mass), &existing, &mut rng);
            let id = self.next_id();
            self.insert(Virus::new(id, position, mass));
            existing.push(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mass_in_configured_range() {
        let border = WorldBorder::new(5000.0, 5000.0);
        let config = VirusConfig::default();
        let mut viruses = Registry::<Virus>::new();
        viruses.add_new(50, &config, &border);
        assert_eq!(viruses.len(), 50);
        assert!(viruses
            .iter()
            .all(|v| v.mass >= config.min_mass && v.mass <= config.max_mass));
    }
}
