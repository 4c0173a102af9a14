//! Server -> Client event building and parsing.

use super::ServerOpcode;
use crate::{BinaryReader, BinaryWriter, CellView, EntityView, LeaderboardRow, PlayerView, ProtocolError};
use bytes::Bytes;

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// Session accepted. `player_id` is 0 for spectators.
    Welcome {
        player_id: u32,
        lobby: String,
        width: f32,
        height: f32,
    },
    /// Everything the viewer can currently see.
    Snapshot {
        me: PlayerView,
        players: Vec<PlayerView>,
        food: Vec<EntityView>,
        mass: Vec<EntityView>,
        viruses: Vec<EntityView>,
    },
    /// Lobby leaderboard plus the lobby's player count.
    Leaderboard {
        players: u32,
        rows: Vec<LeaderboardRow>,
    },
    PlayerJoined { name: String },
    PlayerDied { name: String },
    PlayerDisconnected { name: String },
    Rip,
    Kick { reason: String },
    ServerMessage { text: String },
    Pong,
    Chat { sender: String, message: String },
}

fn put_cell(w: &mut BinaryWriter, cell: &CellView) {
    w.put_f32(cell.x);
    w.put_f32(cell.y);
    w.put_f32(cell.mass);
    w.put_f32(cell.radius);
}

fn get_cell(r: &mut BinaryReader) -> Result<CellView, ProtocolError> {
    Ok(CellView {
        x: r.get_f32()?,
        y: r.get_f32()?,
        mass: r.get_f32()?,
        radius: r.get_f32()?,
    })
}

fn put_player(w: &mut BinaryWriter, p: &PlayerView) {
    w.put_u32(p.id);
    w.put_string(&p.name);
    w.put_u16(p.hue);
    w.put_f32(p.x);
    w.put_f32(p.y);
    w.put_u32(p.mass_total);
    w.put_u64(p.escrow_balance);
    w.put_u64(p.wallet_balance);
    w.put_len(p.cells.len());
    for cell in p.cells.iter().take(u16::MAX as usize) {
        put_cell(w, cell);
    }
}

fn get_player(r: &mut BinaryReader) -> Result<PlayerView, ProtocolError> {
    let id = r.get_u32()?;
    let name = r.get_string()?;
    let hue = r.get_u16()?;
    let x = r.get_f32()?;
    let y = r.get_f32()?;
    let mass_total = r.get_u32()?;
    let escrow_balance = r.get_u64()?;
    let wallet_balance = r.get_u64()?;
    let count = r.get_u16()? as usize;
    let mut cells = Vec::with_capacity(count);
    for _ in 0..count {
        cells.push(get_cell(r)?);
    }
    Ok(PlayerView {
        id,
        name,
        hue,
        x,
        y,
        mass_total,
        escrow_balance,
        wallet_balance,
        cells,
    })
}

fn put_entities(w: &mut BinaryWriter, entities: &[EntityView]) {
    w.put_len(entities.len());
    for e in entities.iter().take(u16::MAX as usize) {
        w.put_f32(e.x);
        w.put_f32(e.y);
        w.put_f32(e.radius);
        w.put_f32(e.mass);
        w.put_u16(e.hue);
    }
}

fn get_entities(r: &mut BinaryReader) -> Result<Vec<EntityView>, ProtocolError> {
    let count = r.get_u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(EntityView {
            x: r.get_f32()?,
            y: r.get_f32()?,
            radius: r.get_f32()?,
            mass: r.get_f32()?,
            hue: r.get_u16()?,
        });
    }
    Ok(out)
}

impl ServerPacket {
    /// Opcode of this event.
    pub fn opcode(&self) -> ServerOpcode {
        match self {
            ServerPacket::Welcome { .. } => ServerOpcode::Welcome,
            ServerPacket::Snapshot { .. } => ServerOpcode::Snapshot,
            ServerPacket::Leaderboard { .. } => ServerOpcode::Leaderboard,
            ServerPacket::PlayerJoined { .. } => ServerOpcode::PlayerJoined,
            ServerPacket::PlayerDied { .. } => ServerOpcode::PlayerDied,
            ServerPacket::PlayerDisconnected { .. } => ServerOpcode::PlayerDisconnected,
            ServerPacket::Rip => ServerOpcode::Rip,
            ServerPacket::Kick { .. } => ServerOpcode::Kick,
            ServerPacket::ServerMessage { .. } => ServerOpcode::ServerMessage,
            ServerPacket::Pong => ServerOpcode::Pong,
            ServerPacket::Chat { .. } => ServerOpcode::Chat,
        }
    }

    /// Build the binary form of this event.
    pub fn encode(&self) -> BinaryWriter {
        let mut w = match self {
            ServerPacket::Snapshot { .. } => BinaryWriter::with_capacity(4096),
            _ => BinaryWriter::new(),
        };
        w.put_u8(self.opcode() as u8);
        match self {
            ServerPacket::Welcome { player_id, lobby, width, height } => {
                w.put_u32(*player_id);
                w.put_string(lobby);
                w.put_f32(*width);
                w.put_f32(*height);
            }
            ServerPacket::Snapshot { me, players, food, mass, viruses } => {
                put_player(&mut w, me);
                w.put_len(players.len());
                for p in players.iter().take(u16::MAX as usize) {
                    put_player(&mut w, p);
                }
                put_entities(&mut w, food);
                put_entities(&mut w, mass);
                put_entities(&mut w, viruses);
            }
            ServerPacket::Leaderboard { players, rows } => {
                w.put_u32(*players);
                w.put_len(rows.len());
                for row in rows.iter().take(u16::MAX as usize) {
                    w.put_u32(row.id);
                    w.put_string(&row.name);
                    w.put_u32(row.mass);
                }
            }
            ServerPacket::PlayerJoined { name }
            | ServerPacket::PlayerDied { name }
            | ServerPacket::PlayerDisconnected { name } => w.put_string(name),
            ServerPacket::Kick { reason } => w.put_string(reason),
            ServerPacket::ServerMessage { text } => w.put_string(text),
            ServerPacket::Chat { sender, message } => {
                w.put_string(sender);
                w.put_string(message);
            }
            ServerPacket::Rip | ServerPacket::Pong => {}
        }
        w
    }

    /// Parse an event (client side).
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut r = BinaryReader::new(Bytes::copy_from_slice(data));
        let opcode = r.get_u8()?;
        let packet = match opcode {
            0x01 => ServerPacket::Welcome {
                player_id: r.get_u32()?,
                lobby: r.get_string()?,
                width: r.get_f32()?,
                height: r.get_f32()?,
            },
            0x10 => {
                let me = get_player(&mut r)?;
                let count = r.get_u16()? as usize;
                let mut players = Vec::with_capacity(count);
                for _ in 0..count {
                    players.push(get_player(&mut r)?);
                }
                ServerPacket::Snapshot {
                    me,
                    players,
                    food: get_entities(&mut r)?,
                    mass: get_entities(&mut r)?,
                    viruses: get_entities(&mut r)?,
                }
            }
            0x31 => {
                let players = r.get_u32()?;
                let count = r.get_u16()? as usize;
                let mut rows = Vec::with_capacity(count);
                for _ in 0..count {
                    rows.push(LeaderboardRow {
                        id: r.get_u32()?,
                        name: r.get_string()?,
                        mass: r.get_u32()?,
                    });
                }
                ServerPacket::Leaderboard { players, rows }
            }
            0x40 => ServerPacket::PlayerJoined { name: r.get_string()? },
            0x41 => ServerPacket::PlayerDied { name: r.get_string()? },
            0x42 => ServerPacket::PlayerDisconnected { name: r.get_string()? },
            0x43 => ServerPacket::Rip,
            0x50 => ServerPacket::Kick { reason: r.get_string()? },
            0x51 => ServerPacket::ServerMessage { text: r.get_string()? },
            0x52 => ServerPacket::Pong,
            0x63 => ServerPacket::Chat {
                sender: r.get_string()?,
                message: r.get_string()?,
            },
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };
        r.expect_end()?;
        Ok(packet)
    }
}
