//! Lobby world state.
//!
//! Owns a lobby's registries, players and leaderboard, and runs the per-tick
//! simulation steps on them.

use crate::collision::{self, Consumption};
use crate::config::{Config, Placement};
use crate::entity::{choose_position, mass_to_radius, Food, MassBlob, Registry, Virus};
use crate::leaderboard::Leaderboard;
use crate::lobby::LobbyKey;
use crate::player::{CellRules, Player};
use glam::Vec2;
use rand::Rng;
use std::collections::HashMap;

/// World border bounds: `[0, width] x [0, height]`.
#[derive(Debug, Clone, Copy)]
pub struct WorldBorder {
    pub width: f32,
    pub height: f32,
}

impl WorldBorder {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width / 2.0, self.height / 2.0)
    }

    /// Clamp a point so a circle of radius `margin` stays inside.
    #[inline]
    pub fn clamp(&self, position: Vec2, margin: f32) -> Vec2 {
        Vec2::new(
            clamp_axis(position.x, margin, self.width),
            clamp_axis(position.y, margin, self.height),
        )
    }

    /// Get a random position inset by `margin`.
    #[inline]
    pub fn random_position<R: Rng + ?Sized>(&self, margin: f32, rng: &mut R) -> Vec2 {
        Vec2::new(
            random_axis(margin, self.width, rng),
            random_axis(margin, self.height, rng),
        )
    }
}

fn clamp_axis(v: f32, margin: f32, extent: f32) -> f32 {
    let (lo, hi) = (margin, extent - margin);
    if lo >= hi { extent / 2.0 } else { v.clamp(lo, hi) }
}

fn random_axis<R: Rng + ?Sized>(margin: f32, extent: f32, rng: &mut R) -> f32 {
    let (lo, hi) = (margin, extent - margin);
    if lo >= hi { extent / 2.0 } else { rng.random_range(lo..hi) }
}

/// A player lost their last cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elimination {
    pub victim: u32,
    /// Player whose cell ate the last one.
    pub eliminator: Option<u32>,
}

/// What one balancing pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BalanceReport {
    pub food_added: usize,
    pub food_removed: usize,
    pub viruses_added: usize,
}

/// One lobby's world.
#[derive(Debug)]
pub struct World {
    pub key: LobbyKey,
    pub border: WorldBorder,
    pub food: Registry<Food>,
    pub viruses: Registry<Virus>,
    pub blobs: Registry<MassBlob>,
    pub players: Vec<Player>,
    /// Position tracking for O(1) removal.
    player_pos: HashMap<u32, usize>,
    pub leaderboard: Leaderboard,
}

impl World {
    pub fn new(key: LobbyKey, config: &Config) -> Self {
        Self {
            key,
            border: WorldBorder::new(config.world.width, config.world.height),
            food: Registry::new(),
            viruses: Registry::new(),
            blobs: Registry::new(),
            players: Vec::new(),
            player_pos: HashMap::new(),
            leaderboard: Leaderboard::new(),
        }
    }

    pub fn add_player(&mut self, player: Player) {
        if let Some(&pos) = self.player_pos.get(&player.id) {
            self.players[pos] = player;
            return;
        }
        self.player_pos.insert(player.id, self.players.len());
        self.players.push(player);
    }

    pub fn remove_player(&mut self, id: u32) -> Option<Player> {
        let pos = self.player_pos.remove(&id)?;
        let last_pos = self.players.len() - 1;
        if pos != last_pos {
            let swapped_id = self.players[last_pos].id;
            self.players.swap(pos, last_pos);
            self.player_pos.insert(swapped_id, pos);
        }
        self.players.pop()
    }

    #[inline]
    pub fn player(&self, id: u32) -> Option<&Player> {
        self.player_pos.get(&id).map(|&pos| &self.players[pos])
    }

    #[inline]
    pub fn player_mut(&mut self, id: u32) -> Option<&mut Player> {
        self.player_pos.get(&id).map(|&pos| &mut self.players[pos])
    }

    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    /// Players with at least one cell in play.
    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_alive()).count()
    }

    /// Food mass plus every player's mass; blobs and viruses are not counted.
    pub fn total_mass(&self, food_mass: f32) -> f32 {
        self.food.len() as f32 * food_mass + self.players.iter().map(Player::mass_total).sum::<f32>()
    }

    /// Pick a spawn point for a new cell of `mass`.
    pub fn spawn_position(&self, policy: Placement, mass: f32) -> Vec2 {
        let existing: Vec<Vec2> = self
            .players
            .iter()
            .filter(|p| p.is_alive())
            .map(|p| p.centroid)
            .collect();
        choose_position(policy, &self.border, mass_to_radius(mass), &existing, &mut rand::rng())
    }

    /// Move every player, then let each one eat what lies under its cells.
    pub fn tick_players(&mut self, rules: &CellRules, ratio: f32, tick: u64) {
        let border = self.border;
        for player in &mut self.players {
            if !player.is_alive() {
                continue;
            }
            player.move_cells(&border, rules, tick);

            let picked = collision::collect_pickups(player, &self.food, &self.blobs, &self.viruses, ratio);
            if picked.is_empty() {
                continue;
            }
            self.food.remove(&picked.food);
            self.blobs.remove(&picked.blobs);
            self.viruses.remove(&picked.viruses);
            for &(slot, gain) in &picked.gains {
                player.change_cell_mass(slot, gain);
            }
            if !picked.virus_slots.is_empty() {
                player.virus_split(&picked.virus_slots, rules, tick);
            }
        }
    }

    pub fn move_mass(&mut self, decay: f32) {
        let border = self.border;
        self.blobs.move_all(&border, decay);
    }

    /// Resolve cell-vs-cell predation and report players who lost their last cell.
    pub fn resolve_predation(&mut self, ratio: f32) -> Vec<Elimination> {
        let events = collision::find_predation(&self.players, ratio);
        let mut eliminations = Vec::new();
        for event in events {
            if let Some(elimination) = self.apply_consumption(event) {
                eliminations.push(elimination);
            }
        }
        eliminations
    }

    fn apply_consumption(&mut self, event: Consumption) -> Option<Elimination> {
        let victim_pos = *self.player_pos.get(&event.victim)?;
        let eater_pos = *self.player_pos.get(&event.eater)?;
        let victim_slot = self.players[victim_pos].slot_of(event.victim_cell)?;
        let eater_slot = self.players[eater_pos].slot_of(event.eater_cell)?;

        let gained = self.players[victim_pos].cells[victim_slot].mass();
        self.players[eater_pos].change_cell_mass(eater_slot, gained);
        let last = self.players[victim_pos].remove_cell(victim_slot);
        last.then_some(Elimination {
            victim: event.victim,
            eliminator: Some(event.eater),
        })
    }

    /// Steer total mass toward the target with food, and top viruses up.
    pub fn balance_mass(&mut self, config: &Config) -> BalanceReport {
        let food_mass = config.food.unit_mass;
        let mut report = BalanceReport::default();
        if food_mass > 0.0 {
            let food_count = self.food.len();
            let diff = ((config.world.target_mass - self.total_mass(food_mass)) / food_mass).trunc() as i64;
            let free = config.food.max_count as i64 - food_count as i64;
            let n = diff.min(free);
            if n > 0 {
                self.food.add_new(n as usize, food_mass, config.food.placement, &self.border);
                report.food_added = n as usize;
            } else if n < 0 && food_count > 0 {
                report.food_removed = self.food.remove_excess(n.unsigned_abs() as usize);
            }
        }

        let missing = config.virus.max_count.saturating_sub(self.viruses.len());
        if missing > 0 {
            self.viruses.add_new(missing, &config.virus, &self.border);
            report.viruses_added = missing;
        }
        report
    }

    /// Periodic mass decay for every player.
    pub fn shrink(&mut self, config: &Config) {
        for player in &mut self.players {
            player.shrink_cells(
                config.player.mass_loss_rate,
                config.player.default_mass,
                config.player.min_mass_loss,
            );
        }
    }

    pub fn update_leaderboard(&mut self, size: usize) {
        self.leaderboard.update(&self.players, size);
    }

    /// Fire mass from every eligible cell of a player; returns blobs spawned.
    pub fn eject(&mut self, player_id: u32, config: &Config) -> usize {
        let Some(&pos) = self.player_pos.get(&player_id) else {
            return 0;
        };
        let player = &mut self.players[pos];
        let spawns = player.eject_mass(config.eject.fire_food, config.player.default_mass);
        let hue = player.hue;
        for spawn in &spawns {
            let id = self.blobs.next_id();
            self.blobs.insert(MassBlob::new(
                id,
                spawn.position,
                spawn.direction,
                config.eject.speed,
                spawn.mass,
                player_id,
                spawn.origin,
                hue,
            ));
        }
        spawns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: f32, food_mass: f32) -> Config {
        let mut config = Config::default();
        config.world.target_mass = target;
        config.food.unit_mass = food_mass;
        config.virus.max_count = 0;
        config
    }

    fn world_with_player(config: &Config, id: u32, at: Vec2, mass: f32) -> World {
        let mut world = World::new(LobbyKey::from("1"), config);
        let mut p = Player::new(id, format!("p{id}"), world.key.clone(), String::new());
        p.init(at, mass);
        world.add_player(p);
        world
    }

    #[test]
    fn test_balance_adds_missing_food() {
        let config = config(1000.0, 10.0);
        let mut world = world_with_player(&config, 1, Vec2::new(100.0, 100.0), 100.0);
        let report = world.balance_mass(&config);
        assert_eq!(report.food_added, 90);
        assert_eq!(world.food.len(), 90);
        // Balanced now.
        assert_eq!(world.balance_mass(&config), BalanceReport::default());
    }

    #[test]
    fn test_balance_caps_at_capacity_and_removes_symmetrically() {
        let mut config = config(1000.0, 1.0);
        config.food.max_count = 50;
        let mut world = world_with_player(&config, 1, Vec2::new(100.0, 100.0), 10.0);
        assert_eq!(world.balance_mass(&config).food_added, 50);

        // Player grows past the target: 50 + 1200 - 1000 = 250 excess, only 50 exist.
        world.player_mut(1).unwrap().change_cell_mass(0, 1190.0);
        let report = world.balance_mass(&config);
        assert_eq!(report.food_removed, 50);
        assert!(world.food.is_empty());

        // Nothing left to remove; never a negative creation.
        assert_eq!(world.balance_mass(&config), BalanceReport::default());
    }

    #[test]
    fn test_viruses_topped_up_never_removed() {
        let mut config = config(0.0, 1.0);
        config.virus.max_count = 5;
        let mut world = World::new(LobbyKey::from("1"), &config);
        assert_eq!(world.balance_mass(&config).viruses_added, 5);
        config.virus.max_count = 2;
        world.balance_mass(&config);
        assert_eq!(world.viruses.len(), 5);
    }

    #[test]
    fn test_predation_scenario_and_elimination() {
        let config = config(0.0, 1.0);
        let at = Vec2::new(500.0, 500.0);
        let mut world = world_with_player(&config, 1, at, 115.0);
        let mut victim = Player::new(2, "v".into(), world.key.clone(), String::new());
        victim.init(at, 100.0);
        world.add_player(victim);

        let eliminations = world.resolve_predation(1.1);
        assert_eq!(eliminations, vec![Elimination { victim: 2, eliminator: Some(1) }]);
        assert_eq!(world.player(1).unwrap().mass_total(), 215.0);
        assert!(!world.player(2).unwrap().is_alive());
    }

    #[test]
    fn test_near_equal_masses_untouched() {
        let config = config(0.0, 1.0);
        let at = Vec2::new(500.0, 500.0);
        let mut world = world_with_player(&config, 1, at, 105.0);
        let mut other = Player::new(2, "o".into(), world.key.clone(), String::new());
        other.init(at, 100.0);
        world.add_player(other);

        assert!(world.resolve_predation(1.1).is_empty());
        assert_eq!(world.player(1).unwrap().mass_total(), 105.0);
        assert_eq!(world.player(2).unwrap().mass_total(), 100.0);
    }

    #[test]
    fn test_tick_eats_food_and_splits_on_virus() {
        let config = config(0.0, 1.0);
        let rules = CellRules::from_config(&config);
        let at = Vec2::new(500.0, 500.0);
        let mut world = world_with_player(&config, 1, at, 200.0);
        let id = world.food.next_id();
        world.food.insert(Food::new(id, at, 1.0, 0));
        let id = world.viruses.next_id();
        world.viruses.insert(Virus::new(id, at, 100.0));

        world.tick_players(&rules, 1.1, 0);
        assert!(world.food.is_empty());
        assert!(world.viruses.is_empty());
        let player = world.player(1).unwrap();
        assert!(player.cells.len() > 1);
        let sum: f32 = player.cells.iter().map(|c| c.mass()).sum();
        assert!((sum - 201.0).abs() < 1e-3);
        assert!((player.mass_total() - 201.0).abs() < 1e-3);
    }

    #[test]
    fn test_eject_spawns_owned_blob() {
        let config = config(0.0, 1.0);
        let mut world = world_with_player(&config, 1, Vec2::new(500.0, 500.0), 100.0);
        assert_eq!(world.eject(1, &config), 1);
        let blob = world.blobs.iter().next().unwrap();
        assert_eq!(blob.owner, 1);
        assert_eq!(blob.mass, config.eject.fire_food);
        assert_eq!(world.player(1).unwrap().mass_total(), 80.0);
        assert_eq!(world.eject(42, &config), 0);
    }

    #[test]
    fn test_remove_player_keeps_lookup() {
        let config = config(0.0, 1.0);
        let mut world = world_with_player(&config, 1, Vec2::ZERO, 10.0);
        for id in 2..5 {
            let mut p = Player::new(id, format!("p{id}"), world.key.clone(), String::new());
            p.init(Vec2::ZERO, 10.0);
            world.add_player(p);
        }
        assert_eq!(world.remove_player(1).map(|p| p.id), Some(1));
        for id in 2..5 {
            assert_eq!(world.player(id).map(|p| p.id), Some(id));
        }
        assert!(world.remove_player(1).is_none());
    }

    #[test]
    fn test_alive_count_skips_players_without_cells() {
        let config = config(0.0, 1.0);
        let mut world = world_with_player(&config, 1, Vec2::ZERO, 10.0);
        world.add_player(Player::new(2, "p2".into(), world.key.clone(), String::new()));
        assert_eq!(world.players.len(), 2);
        assert_eq!(world.alive_count(), 1);
    }
}
