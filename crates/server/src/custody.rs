//! Value custody and audit collaborators.
//!
//! The arena never moves value itself: stakes are credited into escrow on
//! entry and debited out to a wallet on elimination, withdrawal or leave.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CustodyError {
    #[error("deposit secret missing")]
    MissingSecret,
    #[error("invalid amount: {0}")]
    InvalidAmount(u64),
    #[error("destination wallet missing")]
    MissingDestination,
    #[error("insufficient escrow: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },
    #[error("custody unavailable: {0}")]
    Unavailable(String),
}

/// Escrow service holding stakes while players are in the arena.
#[async_trait]
pub trait Custody: Send + Sync {
    /// Move `amount` from the player's deposit into escrow.
    async fn credit(&self, player_secret: &str, amount: u64) -> Result<(), CustodyError>;
    /// Pay `amount` out of escrow to `destination`.
    async fn debit(&self, destination: &str, amount: u64) -> Result<(), CustodyError>;
}

/// In-process escrow ledger for development and tests.
#[derive(Debug, Default)]
pub struct LedgerCustody {
    inner: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    escrow: u64,
    paid: HashMap<String, u64>,
}

impl LedgerCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value currently held in escrow.
    pub async fn escrow(&self) -> u64 {
        self.inner.lock().await.escrow
    }

    /// Total paid out to `destination` so far.
    pub async fn paid_to(&self, destination: &str) -> u64 {
        self.inner.lock().await.paid.get(destination).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Custody for LedgerCustody {
    async fn credit(&self, player_secret: &str, amount: u64) -> Result<(), CustodyError> {
        if player_secret.is_empty() {
            return Err(CustodyError::MissingSecret);
        }
        if amount == 0 {
            return Err(CustodyError::InvalidAmount(amount));
        }
        let mut ledger = self.inner.lock().await;
        ledger.escrow = ledger
            .escrow
            .checked_add(amount)
            .ok_or(CustodyError::InvalidAmount(amount))?;
        Ok(())
    }

    async fn debit(&self, destination: &str, amount: u64) -> Result<(), CustodyError> {
        if destination.is_empty() {
            return Err(CustodyError::MissingDestination);
        }
        if amount == 0 {
            return Err(CustodyError::InvalidAmount(amount));
        }
        let mut ledger = self.inner.lock().await;
        if ledger.escrow < amount {
            return Err(CustodyError::InsufficientFunds {
                requested: amount,
                available: ledger.escrow,
            });
        }
        ledger.escrow -= amount;
        *ledger.paid.entry(destination.to_string()).or_insert(0) += amount;
        Ok(())
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Deposit { player_id: u32, wallet: String, amount: u64 },
    Withdrawal { player_id: u32, wallet: String, amount: u64, reason: String },
    Chat { sender: String, message: String, origin: String },
    FailedLogin { name: String, origin: String },
}

/// Append-only record of money movements and moderation events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()>;

    async fn record_deposit(&self, player_id: u32, wallet: &str, amount: u64) -> anyhow::Result<()> {
        self.record(AuditRecord::Deposit {
            player_id,
            wallet: wallet.to_string(),
            amount,
        })
        .await
    }

    async fn record_withdrawal(
        &self,
        player_id: u32,
        wallet: &str,
        amount: u64,
        reason: &str,
    ) -> anyhow::Result<()> {
        self.record(AuditRecord::Withdrawal {
            player_id,
            wallet: wallet.to_string(),
            amount,
            reason: reason.to_string(),
        })
        .await
    }

    /// `origin` is the sender's remote address.
    async fn log_chat_message(&self, sender: &str, message: &str, origin: &str) -> anyhow::Result<()> {
        self.record(AuditRecord::Chat {
            sender: sender.to_string(),
            message: message.to_string(),
            origin: origin.to_string(),
        })
        .await
    }

    async fn log_failed_login(&self, name: &str, origin: &str) -> anyhow::Result<()> {
        self.record(AuditRecord::FailedLogin {
            name: name.to_string(),
            origin: origin.to_string(),
        })
        .await
    }
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NullAudit;

#[async_trait]
impl AuditSink for NullAudit {
    async fn record(&self, _record: AuditRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Line<'a> {
    ts_ms: u64,
    #[serde(flatten)]
    record: &'a AuditRecord,
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlAudit {
    path: PathBuf,
    /// Serialises appends from concurrent tasks.
    write_lock: Mutex<()>,
}

impl JsonlAudit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAudit {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut line = serde_json::to_string(&Line { ts_ms, record: &record })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ledger_credit_and_debit() {
        let custody = LedgerCustody::new();
        assert_eq!(custody.credit("", 10).await, Err(CustodyError::MissingSecret));
        assert_eq!(custody.credit("s", 0).await, Err(CustodyError::InvalidAmount(0)));
        custody.credit("s", 100).await.unwrap();

        custody.debit("alice", 60).await.unwrap();
        assert_eq!(
            custody.debit("alice", 60).await,
            Err(CustodyError::InsufficientFunds { requested: 60, available: 40 })
        );
        assert_eq!(custody.paid_to("alice").await, 60);
        assert_eq!(custody.escrow().await, 40);
    }

    #[tokio::test]
    async fn test_jsonl_appends_lines() {
        let path = std::env::temp_dir().join(format!("arena-audit-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let audit = JsonlAudit::new(&path);
        audit.record_deposit(7, "w1", 5).await.unwrap();
        audit.log_chat_message("bob", "hi", "10.0.0.9:5000").await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "deposit");
        assert_eq!(lines[0]["amount"], 5);
        assert_eq!(lines[0]["player_id"], 7);
        assert_eq!(lines[1]["sender"], "bob");
        assert_eq!(lines[1]["origin"], "10.0.0.9:5000");
        let _ = std::fs::remove_file(&path);
    }
}
