//! Pending debit ledger.
//!
//! Debits run as detached tasks; their outcomes come back over a channel and
//! are applied on the simulation side at most once per debit id.

use crate::custody::{AuditSink, Custody, CustodyError};
use crate::lobby::LobbyKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type DebitId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitReason {
    /// Stake of an eliminated player; `killer` is credited on success.
    Elimination { killer: Option<u32> },
    /// Cash-out requested by the player.
    Withdrawal,
    /// Stake returned because the player left or was removed.
    Refund,
}

impl DebitReason {
    pub fn label(&self) -> &'static str {
        match self {
            DebitReason::Elimination { .. } => "elimination",
            DebitReason::Withdrawal => "withdrawal",
            DebitReason::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitState {
    InFlight,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PendingDebit {
    pub id: DebitId,
    pub beneficiary: String,
    pub amount: u64,
    pub reason: DebitReason,
    /// Player whose escrow this settles.
    pub player: u32,
    pub lobby: LobbyKey,
    pub state: DebitState,
}

#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub id: DebitId,
    pub result: Result<(), CustodyError>,
}

/// A debit that custody has answered.
#[derive(Debug, Clone)]
pub enum Settled {
    Confirmed(PendingDebit),
    Failed(PendingDebit, CustodyError),
}

#[derive(Debug)]
pub struct Settlements {
    next_id: DebitId,
    pending: BTreeMap<DebitId, PendingDebit>,
    tx: mpsc::UnboundedSender<SettlementOutcome>,
    rx: mpsc::UnboundedReceiver<SettlementOutcome>,
}

impl Default for Settlements {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            next_id: 1,
            pending: BTreeMap::new(),
            tx,
            rx,
        }
    }
}

impl Settlements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new in-flight debit.
    pub fn open(
        &mut self,
        beneficiary: String,
        amount: u64,
        reason: DebitReason,
        player: u32,
        lobby: LobbyKey,
    ) -> DebitId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingDebit {
                id,
                beneficiary,
                amount,
                reason,
                player,
                lobby,
                state: DebitState::InFlight,
            },
        );
        id
    }

    pub fn get(&self, id: DebitId) -> Option<&PendingDebit> {
        self.pending.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether any unsettled debit covers this player's escrow.
    pub fn has_open(&self, player: u32) -> bool {
        self.pending.values().any(|d| d.player == player)
    }

    /// Run the debit on a detached task; the outcome lands in the channel.
    pub fn dispatch(&self, id: DebitId, custody: Arc<dyn Custody>, audit: Arc<dyn AuditSink>) {
        let Some(debit) = self.pending.get(&id) else {
            return;
        };
        let tx = self.tx.clone();
        let destination = debit.beneficiary.clone();
        let amount = debit.amount;
        let player = debit.player;
        let reason = debit.reason.label();
        tokio::spawn(async move {
            let result = custody.debit(&destination, amount).await;
            if result.is_ok() {
                if let Err(e) = audit.record_withdrawal(player, &destination, amount, reason).await {
                    warn!("Audit write failed for debit {}: {}", id, e);
                }
            }
            if tx.send(SettlementOutcome { id, result }).is_err() {
                debug!("Settlement channel closed before debit {} reported", id);
            }
        });
    }

    /// Outcomes reported since the last drain.
    pub fn drain(&mut self) -> Vec<SettlementOutcome> {
        let mut out = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            out.push(outcome);
        }
        out
    }

    /// Apply one outcome. Unknown or already-confirmed ids yield `None`.
    pub fn apply(&mut self, outcome: SettlementOutcome) -> Option<Settled> {
        let debit = self.pending.get_mut(&outcome.id)?;
        match outcome.result {
            Ok(()) => self.pending.remove(&outcome.id).map(Settled::Confirmed),
            Err(e) => {
                if debit.state != DebitState::InFlight {
                    return None;
                }
                debit.state = DebitState::Failed(e.to_string());
                Some(Settled::Failed(debit.clone(), e))
            }
        }
    }

    /// Move failed debits back in flight; returns their ids for redispatch.
    pub fn retry_failed(&mut self) -> Vec<DebitId> {
        self.pending
            .values_mut()
            .filter(|d| matches!(d.state, DebitState::Failed(_)))
            .map(|d| {
                d.state = DebitState::InFlight;
                d.id
            })
            .collect()
    }
}
