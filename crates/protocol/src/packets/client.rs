//! Client -> Server intent parsing and encoding.

use super::ClientOpcode;
use crate::{BinaryReader, BinaryWriter, ProtocolError};
use bytes::Bytes;

/// Entry request carried by a Join packet.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub name: String,
    /// Stake tier selecting the lobby.
    pub lobby: String,
    /// Wallet address payouts are sent to.
    pub wallet: String,
    /// Secret authorising the custody credit.
    pub deposit_secret: String,
    /// Stake amount (smallest currency unit).
    pub amount: u64,
    pub screen_width: u16,
    pub screen_height: u16,
}

/// Parsed client packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Join (0x00).
    Join(JoinRequest),
    /// Spectate (0x01).
    Spectate,
    /// Target offset relative to the player's centre (0x10).
    Target { x: f32, y: f32 },
    /// Split (0x11).
    Split,
    /// Eject (0x15).
    Eject,
    /// Respawn (0x20).
    Respawn,
    /// Window resized (0x21).
    WindowResized { width: u16, height: u16 },
    /// Withdraw (0x22).
    Withdraw,
    /// Leave game (0x23).
    LeaveGame,
    /// Ping (0x30).
    Ping,
    /// Chat message (0x63).
    Chat { message: String },
    /// Admin password (0x70).
    AdminAuth { password: String },
    /// Admin kick (0x71).
    Kick { name: String, reason: String },
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut reader = BinaryReader::new(Bytes::copy_from_slice(data));
        let opcode = reader.get_u8()?;

        let packet = match opcode {
            0x00 => ClientPacket::Join(JoinRequest {
                name: reader.get_string()?,
                lobby: reader.get_string()?,
                wallet: reader.get_string()?,
                deposit_secret: reader.get_string()?,
                amount: reader.get_u64()?,
                screen_width: reader.get_u16()?,
                screen_height: reader.get_u16()?,
            }),
            0x01 => ClientPacket::Spectate,
            0x10 => {
                let x = reader.get_f32()?;
                let y = reader.get_f32()?;
                if !x.is_finite() || !y.is_finite() {
                    return Err(ProtocolError::InvalidOpcode(opcode));
                }
                ClientPacket::Target { x, y }
            }
            0x11 => ClientPacket::Split,
            0x15 => ClientPacket::Eject,
            0x20 => ClientPacket::Respawn,
            0x21 => ClientPacket::WindowResized {
                width: reader.get_u16()?,
                height: reader.get_u16()?,
            },
            0x22 => ClientPacket::Withdraw,
            0x23 => ClientPacket::LeaveGame,
            0x30 => ClientPacket::Ping,
            0x63 => ClientPacket::Chat {
                message: reader.get_string()?,
            },
            0x70 => ClientPacket::AdminAuth {
                password: reader.get_string()?,
            },
            0x71 => ClientPacket::Kick {
                name: reader.get_string()?,
                reason: reader.get_string()?,
            },
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };

        reader.expect_end()?;
        Ok(packet)
    }

    /// Opcode of this packet.
    pub fn opcode(&self) -> ClientOpcode {
        match self {
            ClientPacket::Join(_) => ClientOpcode::Join,
            ClientPacket::Spectate => ClientOpcode::Spectate,
            ClientPacket::Target { .. } => ClientOpcode::Target,
            ClientPacket::Split => ClientOpcode::Split,
            ClientPacket::Eject => ClientOpcode::Eject,
            ClientPacket::Respawn => ClientOpcode::Respawn,
            ClientPacket::WindowResized { .. } => ClientOpcode::WindowResized,
            ClientPacket::Withdraw => ClientOpcode::Withdraw,
            ClientPacket::LeaveGame => ClientOpcode::LeaveGame,
            ClientPacket::Ping => ClientOpcode::Ping,
            ClientPacket::Chat { .. } => ClientOpcode::Chat,
            ClientPacket::AdminAuth { .. } => ClientOpcode::AdminAuth,
            ClientPacket::Kick { .. } => ClientOpcode::Kick,
        }
    }

    /// Encode the packet (used by clients and tests).
    pub fn encode(&self) -> BinaryWriter {
        let mut w = BinaryWriter::with_capacity(32);
        w.put_u8(self.opcode() as u8);
        match self {
            ClientPacket::Join(req) => {
                w.put_string(&req.name);
                w.put_string(&req.lobby);
                w.put_string(&req.wallet);
                w.put_string(&req.deposit_secret);
                w.put_u64(req.amount);
                w.put_u16(req.screen_width);
                w.put_u16(req.screen_height);
            }
            ClientPacket::Target { x, y } => {
                w.put_f32(*x);
                w.put_f32(*y);
            }
            ClientPacket::WindowResized { width, height } => {
                w.put_u16(*width);
                w.put_u16(*height);
            }
            ClientPacket::Chat { message } => w.put_string(message),
            ClientPacket::AdminAuth { password } => w.put_string(password),
            ClientPacket::Kick { name, reason } => {
                w.put_string(name);
                w.put_string(reason);
            }
            ClientPacket::Spectate
            | ClientPacket::Split
            | ClientPacket::Eject
            | ClientPacket::Respawn
            | ClientPacket::Withdraw
            | ClientPacket::LeaveGame
            | ClientPacket::Ping => {}
        }
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        let join = ClientPacket::Join(JoinRequest {
            name: "alice".into(),
            lobby: "0.1".into(),
            wallet: "wallet-a".into(),
            deposit_secret: "secret".into(),
            amount: 100_000_000,
            screen_width: 1920,
            screen_height: 1080,
        });
        let bytes = join.encode().finish();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(ClientPacket::parse(&bytes).unwrap(), join);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(ClientPacket::parse(&[]), Err(ProtocolError::Empty)));
        assert!(matches!(
            ClientPacket::parse(&[0xAB]),
            Err(ProtocolError::InvalidOpcode(0xAB))
        ));
        // Split carries no payload.
        assert!(matches!(
            ClientPacket::parse(&[0x11, 0x00]),
            Err(ProtocolError::TrailingBytes(1))
        ));
        // Truncated target.
        assert!(matches!(
            ClientPacket::parse(&[0x10, 0, 0, 0]),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_target_must_be_finite() {
        let mut w = BinaryWriter::new();
        w.put_u8(0x10);
        w.put_f32(f32::NAN);
        w.put_f32(1.0);
        assert!(ClientPacket::parse(w.as_slice()).is_err());
    }
}
