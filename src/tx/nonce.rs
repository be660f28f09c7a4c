//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local sequence allocation without touching the chain after seeding
//! - Release of confirmed and abandoned sequences
//! - Drift recovery when the chain moved past local state

use crate::chain::ChainClient;
use crate::error::{OperatorError, OperatorResult};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::Address;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How a sequence left the inflight set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Consumed on chain, whether the transaction succeeded or reverted
    Confirmed,
    /// Will never be mined by us
    Abandoned,
}

#[derive(Debug, Clone)]
struct InflightEntry {
    allocated_at: DateTime<Utc>,
    abandoned: bool,
}

/// Per-account sequence state
#[derive(Debug, Default)]
struct AccountNonces {
    /// Next sequence to hand out; unset until seeded from the chain
    next: Option<u64>,
    inflight: BTreeMap<u64, InflightEntry>,
}

impl AccountNonces {
    /// Bring local state in line with the mined transaction count
    fn reconcile(&mut self, account: Address, chain_count: u64) {
        // Everything below the chain count has been consumed
        self.inflight = self.inflight.split_off(&chain_count);

        match self.next {
            None => self.next = Some(chain_count),
            Some(next) if chain_count > next => {
                warn!(
                    ?account,
                    local = next,
                    chain = chain_count,
                    "Nonce drift detected, resetting to chain value"
                );
                crate::metrics::record_nonce_drift();
                self.next = Some(chain_count);
            }
            Some(_) => {}
        }

        // Reclaim the contiguous abandoned tail, lowest member first in line
        while let Some(next) = self.next {
            let reclaim = match self.inflight.last_key_value() {
                Some((&top, entry)) => entry.abandoned && top + 1 == next,
                None => false,
            };
            if !reclaim {
                break;
            }
            if let Some((top, _)) = self.inflight.pop_last() {
                debug!(?account, sequence = top, "Reclaimed abandoned sequence");
                self.next = Some(top);
            }
        }
    }
}

/// Per-account sequence allocator
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    accounts: DashMap<Address, Arc<Mutex<AccountNonces>>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            accounts: DashMap::new(),
        }
    }

    fn slot(&self, account: Address) -> Arc<Mutex<AccountNonces>> {
        self.accounts.entry(account).or_default().clone()
    }

    /// Hand out the next sequence for an account
    pub async fn allocate(&self, account: Address) -> OperatorResult<u64> {
        let slot = self.slot(account);
        let mut state = slot.lock().await;

        let sequence = match state.next {
            Some(next) => next,
            None => {
                let seeded = self.client.get_nonce(account).await?;
                info!(?account, nonce = seeded, "Seeded nonce from chain");
                seeded
            }
        };

        state.next = Some(sequence + 1);
        state.inflight.insert(
            sequence,
            InflightEntry {
                allocated_at: Utc::now(),
                abandoned: false,
            },
        );
        crate::metrics::set_inflight_nonces(&account, state.inflight.len());

        debug!(?account, sequence, "Allocated nonce");
        Ok(sequence)
    }

    /// Return a sequence to the manager
    pub async fn release(
        &self,
        account: Address,
        sequence: u64,
        outcome: Release,
    ) -> OperatorResult<()> {
        let slot = self.slot(account);
        let mut state = slot.lock().await;

        if !state.inflight.contains_key(&sequence) {
            // Pruned by an earlier resync: the chain already consumed it
            if state.next.map(|next| sequence < next).unwrap_or(false) {
                debug!(?account, sequence, ?outcome, "Sequence already reconciled");
                return Ok(());
            }
            return Err(OperatorError::NonceConflict {
                account,
                message: format!("sequence {} was never allocated", sequence),
            });
        }

        match outcome {
            Release::Confirmed => {
                state.inflight = state.inflight.split_off(&(sequence + 1));
                debug!(?account, sequence, "Released confirmed nonce");
            }
            Release::Abandoned => {
                if let Some(entry) = state.inflight.get_mut(&sequence) {
                    entry.abandoned = true;
                    warn!(
                        ?account,
                        sequence,
                        held_for_ms = (Utc::now() - entry.allocated_at).num_milliseconds(),
                        "Nonce abandoned"
                    );
                }
                let chain_count = self.client.get_nonce(account).await?;
                state.reconcile(account, chain_count);
            }
        }

        crate::metrics::set_inflight_nonces(&account, state.inflight.len());
        Ok(())
    }

    /// Resynchronize an account with the chain; never lowers a handed-out sequence
    pub async fn sync(&self, account: Address) -> OperatorResult<u64> {
        let slot = self.slot(account);
        let mut state = slot.lock().await;

        let chain_count = self.client.get_nonce(account).await?;
        state.reconcile(account, chain_count);
        crate::metrics::set_inflight_nonces(&account, state.inflight.len());

        Ok(state.next.unwrap_or(chain_count))
    }

    /// Inflight sequences in ascending order
    pub async fn inflight(&self, account: Address) -> Vec<u64> {
        let slot = self.slot(account);
        let state = slot.lock().await;
        state.inflight.keys().copied().collect()
    }

    /// Next sequence that would be handed out, if seeded
    pub async fn next_sequence(&self, account: Address) -> Option<u64> {
        let slot = self.slot(account);
        let state = slot.lock().await;
        state.next
    }
}
