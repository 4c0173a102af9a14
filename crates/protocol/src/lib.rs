//! Shared protocol crate for the stake arena.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - Client intent and server event definitions
//! - Wire view types for snapshots and leaderboards

mod binary;
mod error;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter};
pub use error::ProtocolError;

/// Represents a 2D position using glam's Vec2.
pub type Position = glam::Vec2;

/// A cell as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellView {
    pub x: f32,
    pub y: f32,
    pub mass: f32,
    pub radius: f32,
}

/// Public state of a player, sent both for the viewer and for visible rivals.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub id: u32,
    pub name: String,
    pub hue: u16,
    pub x: f32,
    pub y: f32,
    /// Rounded total mass.
    pub mass_total: u32,
    pub escrow_balance: u64,
    pub wallet_balance: u64,
    pub cells: Vec<CellView>,
}

/// A food pellet, ejected blob, or virus as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityView {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub mass: f32,
    pub hue: u16,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub id: u32,
    pub name: String,
    pub mass: u32,
}
