//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub food: FoodConfig,
    #[serde(default)]
    pub virus: VirusConfig,
    #[serde(default)]
    pub eject: EjectConfig,
    #[serde(default)]
    pub custody: CustodyConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from `path`, writing the defaults there if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml_str(&contents)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// How new entities are positioned in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Uniformly random over the world.
    #[default]
    Random,
    /// Best-of-k candidates, maximising distance to existing entities.
    Spread,
    /// Near an existing entity of the same kind.
    Clustered,
}

/// Server networking, scheduling and moderation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
    /// Fast tick (movement + collision) rate in Hz.
    #[serde(default = "default_fast_tick_hz")]
    pub fast_tick_hz: u32,
    /// Slow tick (economy + leaderboard + decay) interval in milliseconds.
    #[serde(default = "default_slow_tick_ms")]
    pub slow_tick_ms: u64,
    /// Snapshot broadcasts per second.
    #[serde(default = "default_broadcast_rate")]
    pub broadcast_rate: u32,
    /// A player without an intent for this long is disconnected.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Password for admin commands (empty = admin disabled).
    #[serde(default)]
    pub admin_password: String,
    /// Echo chat lines into the log.
    #[serde(default)]
    pub log_chat: bool,
    /// Number of entries in each lobby's leaderboard.
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
    #[serde(default = "default_max_nick_length")]
    pub max_nick_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
            fast_tick_hz: default_fast_tick_hz(),
            slow_tick_ms: default_slow_tick_ms(),
            broadcast_rate: default_broadcast_rate(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            admin_password: String::new(),
            log_chat: false,
            leaderboard_size: default_leaderboard_size(),
            max_nick_length: default_max_nick_length(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    200
}
fn default_ip_limit() -> usize {
    10
}
fn default_fast_tick_hz() -> u32 {
    60
}
fn default_slow_tick_ms() -> u64 {
    1000
}
fn default_broadcast_rate() -> u32 {
    40
}
fn default_heartbeat_timeout_ms() -> u64 {
    5000
}
fn default_leaderboard_size() -> usize {
    10
}
fn default_max_nick_length() -> usize {
    25
}

/// World geometry and mass economy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    #[serde(default = "default_world_size")]
    pub width: f32,
    #[serde(default = "default_world_size")]
    pub height: f32,
    /// Total mass (food + players) the balancer steers each lobby toward.
    #[serde(default = "default_target_mass")]
    pub target_mass: f32,
    /// Minimum mass ratio a predator must exceed to eat a blob or a cell.
    #[serde(default = "default_predation_ratio")]
    pub predation_ratio: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: default_world_size(),
            height: default_world_size(),
            target_mass: default_target_mass(),
            predation_ratio: default_predation_ratio(),
        }
    }
}

fn default_world_size() -> f32 {
    5000.0
}
fn default_target_mass() -> f32 {
    20000.0
}
fn default_predation_ratio() -> f32 {
    1.1
}

/// Player configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Spawn mass, also the minimum mass of a split piece.
    #[serde(default = "default_player_mass")]
    pub default_mass: f32,
    /// Maximum number of cells per player.
    #[serde(default = "default_split_limit")]
    pub split_limit: usize,
    /// Seconds after a split before own cells may merge again.
    #[serde(default = "default_merge_time")]
    pub merge_time_secs: f32,
    /// Per-mille mass lost per slow tick.
    #[serde(default = "default_mass_loss_rate")]
    pub mass_loss_rate: f32,
    /// Players at or below this total mass do not decay.
    #[serde(default = "default_min_mass_loss")]
    pub min_mass_loss: f32,
    /// Log base of the speed falloff with mass.
    #[serde(default = "default_slow_base")]
    pub slow_base: f32,
    /// Distance a freshly split piece travels before steering again.
    #[serde(default = "default_split_distance")]
    pub split_distance: f32,
    #[serde(default = "default_spawn_placement")]
    pub spawn: Placement,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_mass: default_player_mass(),
            split_limit: default_split_limit(),
            merge_time_secs: default_merge_time(),
            mass_loss_rate: default_mass_loss_rate(),
            min_mass_loss: default_min_mass_loss(),
            slow_base: default_slow_base(),
            split_distance: default_split_distance(),
            spawn: default_spawn_placement(),
        }
    }
}

fn default_player_mass() -> f32 {
    10.0
}
fn default_split_limit() -> usize {
    16
}
fn default_merge_time() -> f32 {
    15.0
}
fn default_mass_loss_rate() -> f32 {
    1.0
}
fn default_min_mass_loss() -> f32 {
    50.0
}
fn default_slow_base() -> f32 {
    4.5
}
fn default_split_distance() -> f32 {
    300.0
}
fn default_spawn_placement() -> Placement {
    Placement::Spread
}

/// Food configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FoodConfig {
    /// Mass of one food pellet.
    #[serde(default = "default_food_mass")]
    pub unit_mass: f32,
    #[serde(default = "default_food_max_count")]
    pub max_count: usize,
    #[serde(default = "default_food_placement")]
    pub placement: Placement,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            unit_mass: default_food_mass(),
            max_count: default_food_max_count(),
            placement: default_food_placement(),
        }
    }
}

fn default_food_mass() -> f32 {
    1.0
}
fn default_food_max_count() -> usize {
    1000
}
fn default_food_placement() -> Placement {
    Placement::Spread
}

/// Virus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirusConfig {
    #[serde(default = "default_virus_min_mass")]
    pub min_mass: f32,
    #[serde(default = "default_virus_max_mass")]
    pub max_mass: f32,
    #[serde(default = "default_virus_max_count")]
    pub max_count: usize,
    #[serde(default)]
    pub placement: Placement,
}

impl Default for VirusConfig {
    fn default() -> Self {
        Self {
            min_mass: default_virus_min_mass(),
            max_mass: default_virus_max_mass(),
            max_count: default_virus_max_count(),
            placement: Placement::Random,
        }
    }
}

fn default_virus_min_mass() -> f32 {
    100.0
}
fn default_virus_max_mass() -> f32 {
    150.0
}
fn default_virus_max_count() -> usize {
    50
}

/// Ejected mass configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EjectConfig {
    /// Mass moved from a cell into each ejected blob.
    #[serde(default = "default_fire_food")]
    pub fire_food: f32,
    /// Initial blob speed (units per fast tick).
    #[serde(default = "default_eject_speed")]
    pub speed: f32,
    /// Speed lost per fast tick.
    #[serde(default = "default_eject_decay")]
    pub decay: f32,
}

impl Default for EjectConfig {
    fn default() -> Self {
        Self {
            fire_food: default_fire_food(),
            speed: default_eject_speed(),
            decay: default_eject_decay(),
        }
    }
}

fn default_fire_food() -> f32 {
    20.0
}
fn default_eject_speed() -> f32 {
    25.0
}
fn default_eject_decay() -> f32 {
    0.5
}

/// Custody and audit collaborators.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustodyConfig {
    /// Receives the stake of players eliminated without an eliminator.
    #[serde(default = "default_fallback_beneficiary")]
    pub fallback_beneficiary: String,
    /// Append-only JSON lines audit log (empty = no audit file).
    #[serde(default = "default_audit_log")]
    pub audit_log: String,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            fallback_beneficiary: default_fallback_beneficiary(),
            audit_log: default_audit_log(),
        }
    }
}

fn default_fallback_beneficiary() -> String {
    "house".to_string()
}
fn default_audit_log() -> String {
    "audit.jsonl".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [world]
            target_mass = 1000.0

            [food]
            unit_mass = 10.0
            placement = "clustered"
            "#,
        )
        .unwrap();

        assert_eq!(config.world.target_mass, 1000.0);
        assert_eq!(config.world.width, 5000.0);
        assert_eq!(config.food.unit_mass, 10.0);
        assert_eq!(config.food.placement, Placement::Clustered);
        assert_eq!(config.player.spawn, Placement::Spread);
        assert_eq!(config.server.fast_tick_hz, 60);
    }

    #[test]
    fn test_defaults_serialize() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.player.split_limit, 16);
        assert_eq!(back.custody.fallback_beneficiary, "house");
    }
}
