//! Stake-tier lobbies.

use crate::config::Config;
use crate::world::World;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Stake tier a lobby is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LobbyKey(String);

impl LobbyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LobbyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LobbyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for LobbyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lazily created worlds, one per stake tier.
#[derive(Debug, Default)]
pub struct LobbyManager {
    lobbies: BTreeMap<LobbyKey, World>,
}

impl LobbyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the lobby, creating and seeding it on first use.
    pub fn get_or_create(&mut self, key: &LobbyKey, config: &Config) -> &mut World {
        self.lobbies.entry(key.clone()).or_insert_with(|| {
            let mut world = World::new(key.clone(), config);
            world.balance_mass(config);
            info!(
                "Lobby {} created: {} food, {} viruses",
                key,
                world.food.len(),
                world.viruses.len()
            );
            world
        })
    }

    pub fn get(&self, key: &LobbyKey) -> Option<&World> {
        self.lobbies.get(key)
    }

    pub fn get_mut(&mut self, key: &LobbyKey) -> Option<&mut World> {
        self.lobbies.get_mut(key)
    }

    pub fn remove(&mut self, key: &LobbyKey) -> Option<World> {
        self.lobbies.remove(key)
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LobbyKey, &World)> {
        self.lobbies.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&LobbyKey, &mut World)> {
        self.lobbies.iter_mut()
    }

    /// Drop lobbies nobody is playing in; returns their keys.
    pub fn prune_empty(&mut self) -> Vec<LobbyKey> {
        let empty: Vec<LobbyKey> = self
            .lobbies
            .iter()
            .filter(|(_, w)| w.players.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &empty {
            self.lobbies.remove(key);
        }
        empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_and_prune() {
        let mut config = Config::default();
        config.food.max_count = 20;
        config.virus.max_count = 3;
        let mut lobbies = LobbyManager::new();
        let key = LobbyKey::from("0.5");

        assert!(lobbies.get(&key).is_none());
        let world = lobbies.get_or_create(&key, &config);
        assert_eq!(world.food.len(), 20);
        assert_eq!(world.viruses.len(), 3);
        lobbies.get_or_create(&LobbyKey::from("1"), &config);
        assert_eq!(lobbies.len(), 2);

        let pruned = lobbies.prune_empty();
        assert_eq!(pruned.len(), 2);
        assert!(lobbies.is_empty());
    }
}
