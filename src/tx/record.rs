//! Transaction records and their lifecycle state machine

use super::gas::GasQuote;
use super::intent::TransactionIntent;
use crate::chain::TxReceipt;
use crate::error::{OperatorError, OperatorResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Built,
    Signed,
    Submitted,
    Pending,
    Confirmed,
    Failed,
    Replaced,
    Abandoned,
    /// Tracking was cancelled; the broadcast itself stands
    Detached,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Built => "built",
            TxState::Signed => "signed",
            TxState::Submitted => "submitted",
            TxState::Pending => "pending",
            TxState::Confirmed => "confirmed",
            TxState::Failed => "failed",
            TxState::Replaced => "replaced",
            TxState::Abandoned => "abandoned",
            TxState::Detached => "detached",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxState::Confirmed | TxState::Failed | TxState::Abandoned | TxState::Detached
        )
    }

    pub fn can_transition_to(&self, next: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, next),
            (Built, Signed)
                | (Signed, Submitted)
                | (Submitted, Pending)
                | (Pending, Confirmed)
                | (Pending, Failed)
                | (Pending, Replaced)
                | (Pending, Abandoned)
                | (Replaced, Submitted)
                | (Built | Signed | Submitted, Abandoned)
                | (Submitted | Pending | Replaced, Detached)
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One broadcast of the record's transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub tx_hash: H256,
    pub nonce: u64,
    pub gas_quote: GasQuote,
    pub submitted_at: DateTime<Utc>,
}

/// Everything known about one submitted intent
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub intent: TransactionIntent,
    pub from: Address,
    pub nonce: u64,
    pub gas_quote: GasQuote,
    #[serde(skip)]
    pub signed_payload: Option<Bytes>,
    pub tx_hash: Option<H256>,
    pub state: TxState,
    pub attempts: Vec<Attempt>,
    pub receipt: Option<TxReceipt>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(intent: TransactionIntent, from: Address, nonce: u64, gas_quote: GasQuote) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            intent,
            from,
            nonce,
            gas_quote,
            signed_payload: None,
            tx_hash: None,
            state: TxState::Built,
            attempts: Vec::new(),
            receipt: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting transitions outside the lifecycle
    pub fn transition(&mut self, next: TxState) -> OperatorResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(OperatorError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a broadcast as the current attempt
    pub fn push_attempt(&mut self, tx_hash: H256, gas_quote: GasQuote) {
        let submitted_at = self
            .attempts
            .last()
            .map(|a| a.submitted_at.max(Utc::now()))
            .unwrap_or_else(Utc::now);
        self.attempts.push(Attempt {
            tx_hash,
            nonce: self.nonce,
            gas_quote: gas_quote.clone(),
            submitted_at,
        });
        self.gas_quote = gas_quote;
        self.tx_hash = Some(tx_hash);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Map a terminal record onto the caller-facing result
    pub fn into_result(self) -> OperatorResult<TransactionRecord> {
        match self.state {
            TxState::Failed => Err(OperatorError::OnChainRevert {
                tx_hash: self
                    .receipt
                    .as_ref()
                    .map(|r| r.tx_hash)
                    .or(self.tx_hash)
                    .unwrap_or_default(),
                reason: self.error.unwrap_or_else(|| "reverted".to_string()),
            }),
            TxState::Abandoned => Err(OperatorError::Abandoned {
                record_id: self.id,
                attempts: self.attempts.len(),
                reason: self.error.unwrap_or_else(|| "abandoned".to_string()),
            }),
            _ => Ok(self),
        }
    }
}
