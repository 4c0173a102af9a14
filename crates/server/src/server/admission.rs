//! Entry into a lobby: validation, custody credit, admission.

use super::game::GameState;
use crate::custody::CustodyError;
use protocol::packets::JoinRequest;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Chat lines are cut to this many characters.
pub const CHAT_MAX_LEN: usize = 35;
const LOBBY_MAX_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Invalid name")]
    InvalidName,
    #[error("Invalid lobby")]
    InvalidLobby,
    #[error("Wallet address required")]
    WalletMissing,
    #[error("No deposit provided")]
    DepositMissing,
    #[error("This wallet is already in the arena")]
    DuplicateIdentity,
    #[error("Already in a game")]
    AlreadyJoined,
    #[error("Connection closed during join")]
    SessionGone,
    #[error("Deposit rejected: {0}")]
    Credit(#[from] CustodyError),
}

/// Word characters only, bounded length. Empty is allowed.
pub fn valid_name(name: &str, max_len: usize) -> bool {
    name.chars().count() <= max_len && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn valid_lobby(lobby: &str) -> bool {
    !lobby.is_empty()
        && lobby.len() <= LOBBY_MAX_LEN
        && lobby.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Drop anything that looks like a markup tag.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

pub fn sanitize_chat(input: &str) -> String {
    strip_tags(input).trim().chars().take(CHAT_MAX_LEN).collect()
}

/// Validate, credit the stake without holding the state lock, then admit.
pub async fn join(
    state: &Arc<RwLock<GameState>>,
    session_id: u32,
    request: JoinRequest,
) -> Result<(), JoinError> {
    let custody = state.write().await.begin_join(session_id, &request)?;
    let credited = custody.credit(&request.deposit_secret, request.amount).await;
    let mut game = state.write().await;
    match credited {
        Ok(()) => game.finish_join(session_id, request),
        Err(e) => {
            game.abort_join(session_id);
            Err(e.into())
        }
    }
}

/// Run the join flow and turn failures into a kick.
pub async fn handle_join(state: &Arc<RwLock<GameState>>, session_id: u32, request: JoinRequest) {
    let Err(e) = join(state, session_id, request).await else {
        return;
    };
    info!("Join rejected for session {}: {}", session_id, e);
    let game = state.read().await;
    if let Some(session) = game.sessions.get(&session_id) {
        match e {
            JoinError::AlreadyJoined => session.message(e.to_string()),
            _ => session.kick(&e.to_string()),
        }
    }
}
