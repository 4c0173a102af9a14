//! Player cell body and shared mass/radius math.

use glam::Vec2;

/// Cell masses never drop below this.
pub const MASS_FLOOR: f32 = 1.0;

/// Radius for a mass. Strictly increasing, which containment tests rely on.
#[inline]
pub fn mass_to_radius(mass: f32) -> f32 {
    4.0 + mass.max(0.0).sqrt() * 6.0
}

/// Stable id of a cell within its player; survives slot shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(pub u32);

/// Boost movement data.
#[derive(Debug, Clone, Copy)]
pub struct Boost {
    /// Remaining distance to travel.
    pub distance: f32,
    /// Direction vector (normalized).
    pub direction: Vec2,
}

/// One mass-bearing body of a player.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: CellId,
    pub position: Vec2,
    mass: f32,
    radius: f32,
    /// Outward travel after a split; steering resumes once spent.
    pub boost: Option<Boost>,
}

impl Cell {
    pub fn new(id: CellId, position: Vec2, mass: f32) -> Self {
        let mass = mass.max(MASS_FLOOR);
        Self {
            id,
            position,
            mass,
            radius: mass_to_radius(mass),
            boost: None,
        }
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Set the mass (floored) and return the delta actually applied.
    #[inline]
    pub fn set_mass(&mut self, mass: f32) -> f32 {
        let old = self.mass;
        self.mass = mass.max(MASS_FLOOR);
        self.radius = mass_to_radius(self.mass);
        self.mass - old
    }

    #[inline]
    pub fn add_mass(&mut self, delta: f32) -> f32 {
        self.set_mass(self.mass + delta)
    }

    /// Circle-contains-point test.
    #[inline]
    pub fn contains_point(&self, point: Vec2) -> bool {
        self.position.distance_squared(point) <= self.radius * self.radius
    }

    /// Whether the two circles overlap at all.
    #[inline]
    pub fn overlaps(&self, other: &Cell) -> bool {
        let r = self.radius + other.radius;
        self.position.distance_squared(other.position) < r * r
    }

    /// Set boost with a direction vector; zero directions are ignored.
    #[inline]
    pub fn set_boost(&mut self, distance: f32, direction: Vec2) {
        let direction = direction.normalize_or_zero();
        self.boost = if direction == Vec2::ZERO || distance < 1.0 {
            None
        } else {
            Some(Boost { distance, direction })
        };
    }

    /// Advance boost movement by one tick.
    /// Returns true if the cell is still boosting.
    pub fn update_boost(&mut self) -> bool {
        if let Some(ref mut boost) = self.boost {
            if boost.distance < 1.0 {
                self.boost = None;
                return false;
            }

            // Exponential decay: move 1/10 of remaining distance each tick
            let move_dist = boost.distance / 10.0;
            boost.distance -= move_dist;
            self.position += boost.direction * move_dist;
            true
        } else {
            false
        }
    }
}
