//! Stake arena game server library.

pub mod collision;
pub mod config;
pub mod custody;
pub mod entity;
pub mod leaderboard;
pub mod lobby;
pub mod player;
pub mod server;
pub mod settlement;
pub mod visibility;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use custody::{AuditSink, Custody, CustodyError, JsonlAudit, LedgerCustody, NullAudit};
pub use lobby::{LobbyKey, LobbyManager};
pub use server::{run, run_game_loop, GameState};
