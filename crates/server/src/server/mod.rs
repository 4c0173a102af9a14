//! WebSocket front end: accepts connections and feeds intents to the game.

use crate::config::Config;
use crate::custody::{AuditSink, JsonlAudit, LedgerCustody, NullAudit};
use futures_util::{SinkExt, StreamExt};
use protocol::packets::ClientPacket;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub mod admission;
pub mod client;
pub mod game;

pub use client::Outgoing;
pub use game::{run_game_loop, GameState};

/// Connection tracking state (shared across connection handlers).
#[derive(Debug, Default)]
struct ConnectionState {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    total_connections: usize,
}

impl ConnectionState {
    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }
        let current = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if current >= max_per_ip {
            return false;
        }
        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        true
    }

    fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                self.total_connections = self.total_connections.saturating_sub(1);
            }
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
    }
}

fn audit_sink(config: &Config) -> Arc<dyn AuditSink> {
    if config.custody.audit_log.is_empty() {
        Arc::new(NullAudit)
    } else {
        info!("Audit log: {}", config.custody.audit_log);
        Arc::new(JsonlAudit::new(&config.custody.audit_log))
    }
}

/// Run the game server.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    let conn_state = Arc::new(RwLock::new(ConnectionState::default()));
    let max_connections = config.server.max_connections;
    let ip_limit = config.server.ip_limit;

    let audit = audit_sink(&config);
    let game_state = Arc::new(RwLock::new(GameState::new(
        config,
        Arc::new(LedgerCustody::new()),
        audit,
    )));
    tokio::spawn(run_game_loop(Arc::clone(&game_state)));

    loop {
        let (stream, addr) = listener.accept().await?;
        let ip = addr.ip();
        if !conn_state
            .write()
            .await
            .try_add_connection(ip, max_connections, ip_limit)
        {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let game_state = Arc::clone(&game_state);
        let conn_state = Arc::clone(&conn_state);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, game_state).await;
            conn_state.write().await.remove_connection(ip);
            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection until either side closes it.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    game_state: Arc<RwLock<GameState>>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New connection from {}", addr);

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut outbox) = mpsc::unbounded_channel();
    let session_id = game_state.write().await.add_session(addr, tx);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => match ClientPacket::parse(&data) {
                        Ok(ClientPacket::Join(request)) => {
                            admission::handle_join(&game_state, session_id, request).await;
                        }
                        Ok(packet) => {
                            let mut state = game_state.write().await;
                            if let Err(e) = state.handle_intent(session_id, packet) {
                                warn!("Intent error from {}: {}", addr, e);
                            }
                        }
                        Err(e) => warn!("Malformed packet from {}: {}", addr, e),
                    },
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            frame = outbox.recv() => {
                match frame {
                    Some(Outgoing::Packet(bytes)) => {
                        if let Err(e) = write.send(Message::Binary(bytes)).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        debug!("Closing connection to {}", addr);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    game_state.write().await.remove_session(session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_limits() {
        let mut state = ConnectionState::default();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(state.try_add_connection(a, 3, 2));
        assert!(state.try_add_connection(a, 3, 2));
        assert!(!state.try_add_connection(a, 3, 2));
        assert!(state.try_add_connection(b, 3, 2));
        assert!(!state.try_add_connection(b, 3, 2));

        state.remove_connection(a);
        state.remove_connection(a);
        assert!(!state.ip_connections.contains_key(&a));
        assert_eq!(state.total_connections, 1);
    }
}
