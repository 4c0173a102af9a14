//! Packet definitions for the arena protocol.
//!
//! This module contains both client->server intents and server->client events.

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Opcodes for client -> server packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Join a lobby with a deposit.
    Join = 0x00,
    /// Join as a spectator.
    Spectate = 0x01,
    /// Movement target (doubles as heartbeat).
    Target = 0x10,
    /// Split all eligible cells.
    Split = 0x11,
    /// Eject mass from every eligible cell.
    Eject = 0x15,
    /// Re-enter the world after being eliminated.
    Respawn = 0x20,
    /// Viewport size changed.
    WindowResized = 0x21,
    /// Withdraw the escrow balance to the player's wallet.
    Withdraw = 0x22,
    /// Leave the lobby; a remaining stake is refunded.
    LeaveGame = 0x23,
    /// Latency check; echoed back to the client.
    Ping = 0x30,
    /// Chat message.
    Chat = 0x63,
    /// Admin password.
    AdminAuth = 0x70,
    /// Admin kick by player name.
    Kick = 0x71,
}

/// Opcodes for server -> client packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Session accepted; world dimensions.
    Welcome = 0x01,
    /// Per-viewer world snapshot.
    Snapshot = 0x10,
    /// Lobby leaderboard.
    Leaderboard = 0x31,
    /// A player entered the lobby.
    PlayerJoined = 0x40,
    /// A player was eliminated.
    PlayerDied = 0x41,
    /// A player left.
    PlayerDisconnected = 0x42,
    /// The receiving player was eliminated.
    Rip = 0x43,
    /// Connection is being closed by the server.
    Kick = 0x50,
    /// Server text message.
    ServerMessage = 0x51,
    /// Reply to a ping.
    Pong = 0x52,
    /// Chat message.
    Chat = 0x63,
}
