//! Client session state.

use crate::lobby::LobbyKey;
use bytes::Bytes;
use protocol::packets::ServerPacket;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Frames queued for a connection's writer.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Packet(Bytes),
    /// Flush and close the socket.
    Close,
}

/// What a session is currently doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Connected, not in a lobby yet.
    Pending,
    /// Entry credit in flight.
    Joining,
    Player { lobby: LobbyKey },
    Spectator,
}

/// A connected client session.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID, also the player id once joined.
    pub id: u32,
    /// Remote address.
    pub addr: SocketAddr,
    pub role: Role,
    /// Wallet identity reserved by this session.
    pub wallet: Option<String>,
    /// Is admin.
    pub is_admin: bool,
    pub screen_width: f32,
    pub screen_height: f32,
    outbox: mpsc::UnboundedSender<Outgoing>,
}

impl Session {
    /// Create a new client session.
    pub fn new(id: u32, addr: SocketAddr, outbox: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self {
            id,
            addr,
            role: Role::Pending,
            wallet: None,
            is_admin: false,
            screen_width: 1920.0,
            screen_height: 1080.0,
            outbox,
        }
    }

    /// Queue a packet. A closed outbox means the connection is already going away.
    pub fn send(&self, packet: &ServerPacket) {
        self.send_bytes(packet.encode().finish());
    }

    pub fn send_bytes(&self, bytes: Bytes) {
        let _ = self.outbox.send(Outgoing::Packet(bytes));
    }

    pub fn message(&self, text: impl Into<String>) {
        self.send(&ServerPacket::ServerMessage { text: text.into() });
    }

    /// Send a kick reason, then close.
    pub fn kick(&self, reason: &str) {
        self.send(&ServerPacket::Kick { reason: reason.to_string() });
        let _ = self.outbox.send(Outgoing::Close);
    }

    pub fn lobby(&self) -> Option<&LobbyKey> {
        match &self.role {
            Role::Player { lobby } => Some(lobby),
            _ => None,
        }
    }
}
