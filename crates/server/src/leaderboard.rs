//! Per-lobby leaderboard with change detection.

use crate::player::Player;
use protocol::LeaderboardRow;

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub id: u32,
    pub name: String,
    pub mass: f32,
}

#[derive(Debug, Default)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
    changed: bool,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank living players by total mass and keep the top `size`.
    /// Only a different id sequence counts as a change; masses refresh silently.
    pub fn update<'a>(&mut self, players: impl IntoIterator<Item = &'a Player>, size: usize) {
        let mut ranked: Vec<LeaderboardEntry> = players
            .into_iter()
            .filter(|p| p.is_alive())
            .map(|p| LeaderboardEntry {
                id: p.id,
                name: p.name.clone(),
                mass: p.mass_total(),
            })
            .collect();
        ranked.sort_by(|a, b| b.mass.total_cmp(&a.mass).then(a.id.cmp(&b.id)));
        ranked.truncate(size);

        let same_order = ranked.len() == self.entries.len()
            && ranked.iter().zip(&self.entries).all(|(a, b)| a.id == b.id);
        if !same_order {
            self.changed = true;
        }
        self.entries = ranked;
    }

    #[inline]
    pub fn has_changed(&self) -> bool {
        self.changed
    }

    /// Mark the current ranking as broadcast.
    #[inline]
    pub fn reset(&mut self) {
        self.changed = false;
    }

    #[inline]
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn rows(&self) -> Vec<LeaderboardRow> {
        self.entries
            .iter()
            .map(|e| LeaderboardRow {
                id: e.id,
                name: e.name.clone(),
                mass: e.mass.round().max(0.0) as u32,
            })
            .collect()
    }
}
