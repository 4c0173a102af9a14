//! Player state and cell mechanics.

use crate::config::Config;
use crate::entity::{Cell, CellId};
use crate::lobby::LobbyKey;
use crate::world::WorldBorder;
use glam::Vec2;
use rand::Rng;
use std::time::Instant;

/// Top steering speed of a cell at the default mass, per fast tick.
const BASE_SPEED: f32 = 6.25;
/// Distance added to the radius inside which steering slows down.
const SLOWDOWN_RANGE: f32 = 50.0;
/// How far overlapping own cells are pushed apart per tick before they may merge.
const PUSH_APART: f32 = 1.1;

/// Constants the cell mechanics need, resolved once from the config.
#[derive(Debug, Clone, Copy)]
pub struct CellRules {
    /// Spawn mass and minimum mass of a split piece.
    pub default_mass: f32,
    pub split_limit: usize,
    /// Fast ticks after a split before own cells merge.
    pub merge_ticks: u64,
    pub slow_base: f32,
    pub split_distance: f32,
}

impl CellRules {
    pub fn from_config(config: &Config) -> Self {
        let merge_ticks =
            (config.player.merge_time_secs.max(0.0) * config.server.fast_tick_hz as f32).round() as u64;
        Self {
            default_mass: config.player.default_mass,
            split_limit: config.player.split_limit.max(1),
            merge_ticks,
            slow_base: config.player.slow_base,
            split_distance: config.player.split_distance,
        }
    }

    /// Steering speed of a cell of `mass`.
    fn speed_for(&self, mass: f32) -> f32 {
        let base = self.slow_base.ln();
        let slow_down = mass.ln() / base - self.default_mass.ln() / base + 1.0;
        BASE_SPEED / slow_down.max(1.0)
    }
}

/// A mass blob a cell wants to fire; the world turns it into a registry entity.
#[derive(Debug, Clone, Copy)]
pub struct BlobSpawn {
    pub position: Vec2,
    pub direction: Vec2,
    pub mass: f32,
    pub origin: CellId,
}

/// A player inside a lobby.
#[derive(Debug)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub hue: u16,
    pub admin: bool,
    pub lobby: LobbyKey,
    pub cells: Vec<Cell>,
    mass_total: f32,
    pub last_heartbeat: Instant,
    /// Steering target as an offset from the centroid.
    pub target: Vec2,
    /// Staked value currently at risk in the arena.
    pub escrow_balance: u64,
    /// Winnings confirmed by custody during this session.
    pub wallet_balance: u64,
    pub wallet_address: String,
    pub screen_width: f32,
    pub screen_height: f32,
    /// Fast tick from which own cells may merge again.
    pub merge_at_tick: u64,
    pub centroid: Vec2,
    next_cell_id: u32,
}

impl Player {
    pub fn new(id: u32, name: String, lobby: LobbyKey, wallet_address: String) -> Self {
        Self {
            id,
            name,
            hue: rand::rng().random_range(0..360u16),
            admin: false,
            lobby,
            cells: Vec::new(),
            mass_total: 0.0,
            last_heartbeat: Instant::now(),
            target: Vec2::ZERO,
            escrow_balance: 0,
            wallet_balance: 0,
            wallet_address,
            screen_width: 1920.0,
            screen_height: 1080.0,
            merge_at_tick: 0,
            centroid: Vec2::ZERO,
            next_cell_id: 1,
        }
    }

    /// Replace every cell with a single cell at `spawn`.
    pub fn init(&mut self, spawn: Vec2, initial_mass: f32) {
        self.cells.clear();
        let id = self.new_cell_id();
        let cell = Cell::new(id, spawn, initial_mass);
        self.mass_total = cell.mass();
        self.cells.push(cell);
        self.centroid = spawn;
        self.target = Vec2::ZERO;
        self.merge_at_tick = 0;
    }

    fn new_cell_id(&mut self) -> CellId {
        let id = CellId(self.next_cell_id);
        self.next_cell_id = self.next_cell_id.wrapping_add(1);
        id
    }

    #[inline]
    pub fn mass_total(&self) -> f32 {
        self.mass_total
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.cells.is_empty()
    }

    pub fn slot_of(&self, id: CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id == id)
    }

    pub fn total_radius(&self) -> f32 {
        self.cells.iter().map(Cell::radius).sum()
    }

    /// Zoom factor; shrinks the view as the player grows.
    pub fn view_scale(&self) -> f32 {
        let total = self.total_radius();
        if total <= 0.0 {
            return 1.0;
        }
        (64.0 / total).min(1.0).powf(0.4)
    }

    /// Absolute point the cells steer toward.
    #[inline]
    pub fn target_point(&self) -> Vec2 {
        self.centroid + self.target
    }

    /// Change one cell's mass, floored; returns the applied delta.
    pub fn change_cell_mass(&mut self, slot: usize, delta: f32) -> f32 {
        match self.cells.get_mut(slot) {
            Some(cell) => {
                let applied = cell.add_mass(delta);
                self.mass_total += applied;
                applied
            }
            None => 0.0,
        }
    }

    /// Remove a cell; true when it was the player's last one.
    pub fn remove_cell(&mut self, slot: usize) -> bool {
        if slot < self.cells.len() {
            let cell = self.cells.remove(slot);
            self.mass_total -= cell.mass();
            if self.cells.is_empty() {
                self.mass_total = 0.0;
            }
        }
        self.cells.is_empty()
    }

    /// One fast tick of movement: steering or boost, own-cell push or merge,
    /// border clamp, centroid.
    pub fn move_cells(&mut self, border: &WorldBorder, rules: &CellRules, tick: u64) {
        if self.cells.is_empty() {
            return;
        }
        let goal = self.target_point();
        for cell in &mut self.cells {
            if cell.update_boost() {
                continue;
            }
            let to_goal = goal - cell.position;
            let dist = to_goal.length();
            if dist <= f32::EPSILON {
                continue;
            }
            let mut step = rules.speed_for(cell.mass());
            let slow_range = SLOWDOWN_RANGE + cell.radius();
            if dist < slow_range {
                step *= dist / slow_range;
            }
            cell.position += to_goal / dist * step.min(dist);
        }

        if self.cells.len() > 1 {
            self.resolve_own_overlaps(tick >= self.merge_at_tick);
        }

        for cell in &mut self.cells {
            cell.position = border.clamp(cell.position, cell.radius() / 3.0);
        }
        self.update_centroid();
    }

    fn resolve_own_overlaps(&mut self, can_merge: bool) {
        let mut i = 0;
        while i < self.cells.len() {
            let mut j = i + 1;
            while j < self.cells.len() {
                if self.cells[i].overlaps(&self.cells[j]) {
                    if can_merge {
                        let absorbed = self.cells.remove(j);
                        self.cells[i].add_mass(absorbed.mass());
                        continue;
                    }
                    let away = (self.cells[j].position - self.cells[i].position).normalize_or(Vec2::X);
                    self.cells[i].position -= away * PUSH_APART;
                    self.cells[j].position += away * PUSH_APART;
                }
                j += 1;
            }
            i += 1;
        }
    }

    pub fn update_centroid(&mut self) {
        if self.cells.is_empty() {
            return;
        }
        let sum: Vec2 = self.cells.iter().map(|c| c.position).sum();
        self.centroid = sum / self.cells.len() as f32;
    }

    /// Split every large enough cell in two, heaviest first, without exceeding
    /// the split limit. Returns how many cells were split.
    pub fn user_split(&mut self, rules: &CellRules, tick: u64) -> usize {
        let mut order: Vec<usize> = (0..self.cells.len()).collect();
        order.sort_by(|&a, &b| self.cells[b].mass().total_cmp(&self.cells[a].mass()));

        let goal = self.target_point();
        let mut splits = 0;
        for slot in order {
            if self.cells.len() >= rules.split_limit {
                break;
            }
            let mass = self.cells[slot].mass();
            if mass < rules.default_mass * 2.0 {
                continue;
            }
            let half = mass / 2.0;
            self.cells[slot].set_mass(half);
            let position = self.cells[slot].position;
            let mut direction = goal - position;
            if direction.length_squared() <= f32::EPSILON {
                direction = random_direction();
            }
            let id = self.new_cell_id();
            let mut piece = Cell::new(id, position, half);
            piece.set_boost(rules.split_distance, direction);
            self.cells.push(piece);
            splits += 1;
        }
        if splits > 0 {
            self.merge_at_tick = tick + rules.merge_ticks;
        }
        splits
    }

    /// Fragment the listed cells into equal pieces fanned out evenly.
    pub fn virus_split(&mut self, slots: &[usize], rules: &CellRules, tick: u64) {
        let mut split_any = false;
        for &slot in slots {
            let Some(cell) = self.cells.get(slot) else {
                continue;
            };
            let room = (rules.split_limit + 1).saturating_sub(self.cells.len());
            let by_mass = (cell.mass() / rules.default_mass).floor().max(0.0) as usize;
            let pieces = by_mass.min(room);
            if pieces < 2 {
                continue;
            }

            let piece_mass = cell.mass() / pieces as f32;
            let position = cell.position;
            let offset = rand::rng().random_range(0.0..std::f32::consts::TAU);
            self.cells[slot].set_mass(piece_mass);
            for k in 1..pieces {
                let angle = offset + std::f32::consts::TAU * k as f32 / pieces as f32;
                let id = self.new_cell_id();
                let mut piece = Cell::new(id, position, piece_mass);
                piece.set_boost(rules.split_distance, Vec2::from_angle(angle));
                self.cells.push(piece);
            }
            split_any = true;
        }
        if split_any {
            self.merge_at_tick = tick + rules.merge_ticks;
        }
    }

    /// Periodic per-mille mass decay for large players.
    pub fn shrink_cells(&mut self, loss_rate: f32, min_mass: f32, min_loss_threshold: f32) {
        let keep = 1.0 - loss_rate / 1000.0;
        for slot in 0..self.cells.len() {
            let mass = self.cells[slot].mass();
            if mass * keep > min_mass && self.mass_total > min_loss_threshold {
                self.change_cell_mass(slot, -mass * loss_rate / 1000.0);
            }
        }
    }

    /// Take `fire_food` from every cell that can spare it; returns the blobs to spawn.
    pub fn eject_mass(&mut self, fire_food: f32, min_mass: f32) -> Vec<BlobSpawn> {
        if fire_food <= 0.0 {
            return Vec::new();
        }
        let goal = self.target_point();
        let mut spawns = Vec::new();
        for slot in 0..self.cells.len() {
            if self.cells[slot].mass() < min_mass + fire_food {
                continue;
            }
            self.change_cell_mass(slot, -fire_food);
            let cell = &self.cells[slot];
            let mut direction = goal - cell.position;
            if direction.length_squared() <= f32::EPSILON {
                direction = random_direction();
            }
            spawns.push(BlobSpawn {
                position: cell.position,
                direction: direction.normalize(),
                mass: fire_food,
                origin: cell.id,
            });
        }
        spawns
    }
}

fn random_direction() -> Vec2 {
    Vec2::from_angle(rand::rng().random_range(0.0..std::f32::consts::TAU))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> CellRules {
        CellRules {
            default_mass: 10.0,
            split_limit: 16,
            merge_ticks: 900,
            slow_base: 4.5,
            split_distance: 300.0,
        }
    }

    fn player(mass: f32) -> Player {
        let mut p = Player::new(1, "p".into(), LobbyKey::from("1"), "w".into());
        p.init(Vec2::new(2500.0, 2500.0), mass);
        p
    }

    fn assert_mass_consistent(p: &Player) {
        let sum: f32 = p.cells.iter().map(Cell::mass).sum();
        assert!((sum - p.mass_total()).abs() < 1e-2, "sum={sum} total={}", p.mass_total());
    }

    #[test]
    fn test_mass_total_tracks_every_operation() {
        let border = WorldBorder::new(5000.0, 5000.0);
        let rules = rules();
        let mut p = player(400.0);
        assert_mass_consistent(&p);

        p.change_cell_mass(0, 35.0);
        assert_mass_consistent(&p);
        p.change_cell_mass(0, -10_000.0);
        assert_mass_consistent(&p);
        p.change_cell_mass(0, 500.0);

        p.user_split(&rules, 0);
        assert_mass_consistent(&p);
        p.virus_split(&[0], &rules, 0);
        assert_mass_consistent(&p);
        p.shrink_cells(1.0, 10.0, 50.0);
        assert_mass_consistent(&p);
        p.eject_mass(20.0, 10.0);
        assert_mass_consistent(&p);

        for tick in 0..20 {
            p.move_cells(&border, &rules, tick);
            assert_mass_consistent(&p);
        }
        // Past the merge timer everything overlapping folds back together.
        for tick in 2000..4000 {
            p.move_cells(&border, &rules, tick);
        }
        assert_mass_consistent(&p);

        while p.cells.len() > 1 {
            assert!(!p.remove_cell(0));
            assert_mass_consistent(&p);
        }
        assert!(p.remove_cell(0));
        assert_eq!(p.mass_total(), 0.0);
    }

    #[test]
    fn test_user_split_respects_limit() {
        let rules = rules();
        let mut p = player(10_000.0);
        for _ in 0..10 {
            p.user_split(&rules, 0);
            assert!(p.cells.len() <= rules.split_limit);
        }
        assert_eq!(p.cells.len(), rules.split_limit);
        assert_eq!(p.merge_at_tick, rules.merge_ticks);
    }

    #[test]
    fn test_user_split_skips_small_cells() {
        let rules = rules();
        let mut p = player(19.0);
        assert_eq!(p.user_split(&rules, 5), 0);
        assert_eq!(p.cells.len(), 1);
        assert_eq!(p.merge_at_tick, 0);
    }

    #[test]
    fn test_virus_split_piece_count() {
        let rules = rules();
        let mut p = player(45.0);
        p.virus_split(&[0], &rules, 0);
        // floor(45 / 10) pieces.
        assert_eq!(p.cells.len(), 4);
        assert!(p.cells.iter().all(|c| (c.mass() - 11.25).abs() < 1e-4));

        let mut big = player(1000.0);
        big.virus_split(&[0], &rules, 0);
        assert_eq!(big.cells.len(), rules.split_limit);
    }

    #[test]
    fn test_shrink_thresholds() {
        let mut small = player(40.0);
        small.shrink_cells(1.0, 10.0, 50.0);
        assert_eq!(small.mass_total(), 40.0);

        let mut big = player(1000.0);
        big.shrink_cells(1.0, 10.0, 50.0);
        assert!((big.mass_total() - 999.0).abs() < 1e-3);
    }

    #[test]
    fn test_steering_moves_toward_target() {
        let border = WorldBorder::new(5000.0, 5000.0);
        let rules = rules();
        let mut p = player(10.0);
        p.target = Vec2::new(500.0, 0.0);
        p.move_cells(&border, &rules, 0);
        assert!((p.cells[0].position.x - 2506.25).abs() < 1e-3);
        assert_eq!(p.centroid, p.cells[0].position);
    }

    #[test]
    fn test_eject_keeps_minimum() {
        let mut p = player(35.0);
        p.target = Vec2::new(0.0, 100.0);
        let blobs = p.eject_mass(20.0, 10.0);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].origin, p.cells[0].id);
        assert!((blobs[0].direction - Vec2::Y).length() < 1e-5);
        assert!(p.eject_mass(20.0, 10.0).is_empty());
        assert_eq!(p.mass_total(), 15.0);
    }
}
