//! Transaction submitter with receipt tracking and replace-by-fee

use super::builder::TransactionBuilder;
use super::gas::{GasPolicy, GasQuote};
use super::intent::TransactionIntent;
use super::nonce::{NonceManager, Release};
use super::record::{TransactionRecord, TxState};
use crate::audit::AuditLog;
use crate::chain::{ChainClient, Finality, FinalityTracker, TxReceipt};
use crate::config::SubmitterConfig;
use crate::error::{OperatorError, OperatorResult};
use crate::wallet::Account;

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Live record plus the handle that stops its tracking task
struct Tracked {
    record: watch::Sender<TransactionRecord>,
    cancel: CancellationToken,
}

struct Inner {
    client: Arc<dyn ChainClient>,
    account: Account,
    nonces: Arc<NonceManager>,
    gas: Arc<GasPolicy>,
    builder: TransactionBuilder,
    finality: FinalityTracker,
    config: SubmitterConfig,
    audit: Option<Arc<AuditLog>>,
    records: DashMap<Uuid, Arc<Tracked>>,
}

/// Signs, broadcasts and tracks transactions for one account
#[derive(Clone)]
pub struct TransactionSubmitter {
    inner: Arc<Inner>,
}

impl TransactionSubmitter {
    pub fn new(
        client: Arc<dyn ChainClient>,
        account: Account,
        nonces: Arc<NonceManager>,
        gas: Arc<GasPolicy>,
        config: SubmitterConfig,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        info!(
            address = ?account.address(),
            confirmations = config.confirmations,
            max_bumps = config.max_bumps,
            "Transaction submitter initialized"
        );

        Self {
            inner: Arc::new(Inner {
                builder: TransactionBuilder::new(client.chain_id()),
                finality: FinalityTracker::new(client.clone(), config.confirmations),
                client,
                account,
                nonces,
                gas,
                config,
                audit,
                records: DashMap::new(),
            }),
        }
    }

    /// Address transactions are sent from
    pub fn sender(&self) -> Address {
        self.inner.account.address()
    }

    /// Quote, sign and broadcast an intent; returns once it is pending
    pub async fn submit(&self, intent: TransactionIntent) -> OperatorResult<TransactionRecord> {
        let inner = &self.inner;
        let from = inner.account.address();

        // Simulation comes first so a reverting intent never consumes a nonce
        let quote = inner.gas.quote(&intent, from).await?;
        let nonce = inner.nonces.allocate(from).await?;

        let record = TransactionRecord::new(intent, from, nonce, quote);
        let id = record.id;
        let kind = record.intent.kind;
        let (tx, _) = watch::channel(record);
        let tracked = Arc::new(Tracked {
            record: tx,
            cancel: CancellationToken::new(),
        });
        inner.records.insert(id, tracked.clone());
        crate::metrics::record_submission(&kind.to_string());

        // Only reached when the node certainly did not take the payload
        if let Err(e) = inner.broadcast_first(&tracked).await {
            let snapshot = tracked.record.borrow().clone();
            error!(record_id = %id, nonce = snapshot.nonce, "Initial broadcast failed: {}", e);
            inner.abandon(&tracked, &e.to_string()).await;
            return Err(OperatorError::Abandoned {
                record_id: id,
                attempts: snapshot.attempts.len(),
                reason: e.to_string(),
            });
        }

        let task_inner = self.inner.clone();
        let task_tracked = tracked.clone();
        tokio::spawn(async move {
            task_inner.track(task_tracked).await;
        });

        let snapshot = tracked.record.borrow().clone();
        info!(
            record_id = %id,
            nonce = snapshot.nonce,
            tx_hash = ?snapshot.tx_hash,
            "Transaction pending"
        );
        Ok(snapshot)
    }

    /// Wait until the record reaches a terminal state.
    ///
    /// Running out of time is reported as [`OperatorError::Unsettled`]: the
    /// transaction is still live and resubmitting it would spend twice.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> OperatorResult<TransactionRecord> {
        let tracked = self.inner.get(id)?;
        let mut rx = tracked.record.subscribe();

        let outcome = match tokio::time::timeout(timeout, rx.wait_for(|r| r.is_terminal())).await {
            Ok(Ok(record)) => Ok(record.clone()),
            Ok(Err(_)) => Err(OperatorError::Internal(format!(
                "record {} dropped while waiting",
                id
            ))),
            Err(_) => {
                let record = tracked.record.borrow();
                Err(OperatorError::Unsettled {
                    record_id: id,
                    state: record.state.as_str().to_string(),
                    tx_hash: record.tx_hash,
                })
            }
        };
        outcome
    }

    /// Snapshot of a record
    pub fn status(&self, id: Uuid) -> OperatorResult<TransactionRecord> {
        Ok(self.inner.get(id)?.record.borrow().clone())
    }

    /// Stop tracking a record; the broadcast transaction is not retracted
    pub async fn cancel_tracking(&self, id: Uuid) -> OperatorResult<TransactionRecord> {
        let tracked = self.inner.get(id)?;

        let mut outcome = Ok(());
        tracked.record.send_if_modified(|record| {
            outcome = record.transition(TxState::Detached);
            if outcome.is_ok() {
                record.error = Some(
                    "tracking cancelled; the broadcast transaction was not retracted and may still be mined"
                        .to_string(),
                );
            }
            outcome.is_ok()
        });
        outcome?;

        tracked.cancel.cancel();
        let snapshot = tracked.record.borrow().clone();
        warn!(
            record_id = %id,
            nonce = snapshot.nonce,
            "Tracking cancelled, nonce stays inflight until a resync passes it"
        );
        self.inner.finish(&tracked).await;
        Ok(snapshot)
    }

    /// Evict terminal records older than the retention window
    pub fn prune(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.inner.config.retention_secs as i64);
        let before = self.inner.records.len();
        self.inner.records.retain(|_, tracked| {
            let record = tracked.record.borrow();
            !(record.is_terminal() && record.updated_at <= cutoff)
        });
        let removed = before - self.inner.records.len();
        if removed > 0 {
            debug!(removed, "Pruned transaction records");
        }
        removed
    }

    /// Number of records still being tracked
    pub fn pending_count(&self) -> usize {
        self.inner
            .records
            .iter()
            .filter(|entry| !entry.value().record.borrow().is_terminal())
            .count()
    }

    /// Cancel every tracking task, e.g. on shutdown
    pub fn shutdown(&self) {
        for entry in self.inner.records.iter() {
            entry.value().cancel.cancel();
        }
    }
}

impl Inner {
    fn get(&self, id: Uuid) -> OperatorResult<Arc<Tracked>> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OperatorError::TransactionNotFound {
                tx_id: id.to_string(),
            })
    }

    /// Apply a state change atomically with respect to other writers
    fn update<F>(&self, tracked: &Tracked, change: F) -> OperatorResult<()>
    where
        F: FnOnce(&mut TransactionRecord) -> OperatorResult<()>,
    {
        let mut outcome = Ok(());
        tracked.record.send_if_modified(|record| {
            outcome = change(record);
            outcome.is_ok()
        });
        outcome
    }

    async fn sign(&self, record: &TransactionRecord, quote: &GasQuote) -> OperatorResult<Bytes> {
        let tx = self
            .builder
            .build(&record.intent, record.from, record.nonce, quote);
        self.account.sign_transaction(&tx).await
    }

    /// First broadcast, with one retry on a fresh nonce after a conflict.
    /// On error the caller abandons the record, so only errors that prove the
    /// payload was rejected may escape; a send that failed in transit is
    /// tracked under the payload hash instead.
    async fn broadcast_first(&self, tracked: &Tracked) -> OperatorResult<()> {
        let mut retried = false;

        loop {
            let record = tracked.record.borrow().clone();
            let payload = self.sign(&record, &record.gas_quote).await?;

            if record.state == TxState::Built {
                let signed = payload.clone();
                self.update(tracked, |r| {
                    r.transition(TxState::Signed)?;
                    r.signed_payload = Some(signed);
                    Ok(())
                })?;
            } else {
                let signed = payload.clone();
                self.update(tracked, |r| {
                    r.signed_payload = Some(signed);
                    Ok(())
                })?;
            }

            match self.client.send_raw_transaction(payload.clone()).await {
                Ok(tx_hash) => {
                    let quote = record.gas_quote.clone();
                    self.update(tracked, |r| {
                        r.transition(TxState::Submitted)?;
                        r.push_attempt(tx_hash, quote);
                        r.transition(TxState::Pending)
                    })?;
                    return Ok(());
                }
                Err(OperatorError::NonceConflict { message, .. }) if !retried => {
                    retried = true;
                    warn!(
                        record_id = %record.id,
                        nonce = record.nonce,
                        "Nonce rejected by node ({}), resyncing",
                        message
                    );
                    // Releasing as abandoned resyncs the account from the chain
                    self.nonces
                        .release(record.from, record.nonce, Release::Abandoned)
                        .await?;
                    let fresh = self.nonces.allocate(record.from).await?;
                    self.update(tracked, |r| {
                        r.nonce = fresh;
                        Ok(())
                    })?;
                }
                Err(OperatorError::NonceConflict { message, .. }) => {
                    return Err(OperatorError::NonceConflict {
                        account: record.from,
                        message,
                    });
                }
                Err(e @ (OperatorError::TransientNetwork { .. } | OperatorError::Timeout { .. })) => {
                    let tx_hash = H256::from(keccak256(&payload));
                    warn!(
                        record_id = %record.id,
                        nonce = record.nonce,
                        ?tx_hash,
                        "Broadcast outcome unknown ({}), tracking the signed payload",
                        e
                    );
                    let quote = record.gas_quote.clone();
                    self.update(tracked, |r| {
                        r.transition(TxState::Submitted)?;
                        r.push_attempt(tx_hash, quote);
                        r.transition(TxState::Pending)
                    })?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll receipts until terminal, replacing stalled attempts
    async fn track(&self, tracked: Arc<Tracked>) {
        let base_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_interval = Duration::from_millis(self.config.max_poll_interval_ms).max(base_interval);
        let stall_timeout = Duration::from_secs(self.config.stall_timeout_secs);

        let mut interval = base_interval;
        let mut pending_since = Instant::now();
        let mut bumps = 0u32;

        loop {
            tokio::select! {
                _ = tracked.cancel.cancelled() => {
                    debug!("Tracking task cancelled");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let record = tracked.record.borrow().clone();
            if record.is_terminal() {
                return;
            }

            match self.find_receipt(&record).await {
                Some(receipt) => {
                    match self.finality.check(&receipt).await {
                        Ok(Finality::Final(receipt)) => {
                            self.settle(&tracked, receipt).await;
                            return;
                        }
                        Ok(Finality::Included { .. }) | Ok(Finality::Vanished) => {}
                        Err(e) => warn!(record_id = %record.id, "Finality check failed: {}", e),
                    }
                    interval = base_interval;
                    pending_since = Instant::now();
                }
                None if pending_since.elapsed() >= stall_timeout => {
                    if bumps >= self.config.max_bumps {
                        let reason = format!(
                            "no receipt after {} replacements",
                            self.config.max_bumps
                        );
                        self.abandon(&tracked, &reason).await;
                        return;
                    }

                    match self.replace(&tracked, &record).await {
                        Ok(()) => {}
                        Err(e @ OperatorError::GasCeiling(_)) => {
                            self.abandon(&tracked, &e.to_string()).await;
                            return;
                        }
                        Err(e) => {
                            warn!(record_id = %record.id, "Replacement broadcast failed: {}", e)
                        }
                    }
                    bumps += 1;
                    interval = base_interval;
                    pending_since = Instant::now();
                }
                None => {
                    interval = (interval * 2).min(max_interval);
                }
            }
        }
    }

    /// Look for a receipt of any attempt, newest first
    async fn find_receipt(&self, record: &TransactionRecord) -> Option<TxReceipt> {
        for attempt in record.attempts.iter().rev() {
            match self.client.get_receipt(attempt.tx_hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = ?attempt.tx_hash, "Receipt lookup failed: {}", e);
                }
            }
        }
        None
    }

    /// Replace the current attempt with a higher fee, same nonce
    async fn replace(&self, tracked: &Tracked, record: &TransactionRecord) -> OperatorResult<()> {
        let quote = self.gas.bump_for_replacement(&record.gas_quote).await?;
        let payload = self.sign(record, &quote).await?;
        let tx_hash = self.client.send_raw_transaction(payload.clone()).await?;

        self.update(tracked, |r| {
            r.transition(TxState::Replaced)?;
            r.transition(TxState::Submitted)?;
            r.signed_payload = Some(payload);
            r.push_attempt(tx_hash, quote.clone());
            r.transition(TxState::Pending)
        })?;

        crate::metrics::record_replacement();
        info!(
            record_id = %record.id,
            nonce = record.nonce,
            ?tx_hash,
            priority_fee = %quote.priority_fee(),
            "Replaced stalled transaction"
        );
        Ok(())
    }

    /// Final receipt handling: confirm or fail, then release the nonce
    async fn settle(&self, tracked: &Tracked, receipt: TxReceipt) {
        let record = tracked.record.borrow().clone();

        let outcome = if receipt.status {
            self.update(tracked, |r| {
                r.transition(TxState::Confirmed)?;
                r.tx_hash = Some(receipt.tx_hash);
                r.receipt = Some(receipt.clone());
                Ok(())
            })
        } else {
            let reason = self.revert_reason(&record, &receipt).await;
            let error = OperatorError::OnChainRevert {
                tx_hash: receipt.tx_hash,
                reason: reason.clone(),
            };
            warn!(record_id = %record.id, "{}", error);
            self.update(tracked, |r| {
                r.transition(TxState::Failed)?;
                r.tx_hash = Some(receipt.tx_hash);
                r.receipt = Some(receipt.clone());
                r.error = Some(reason);
                Ok(())
            })
        };

        if let Err(e) = outcome {
            // Lost a race with cancellation
            debug!(record_id = %record.id, "Receipt not applied: {}", e);
            return;
        }

        // Mined either way, so the sequence was consumed
        if let Err(e) = self
            .nonces
            .release(record.from, record.nonce, Release::Confirmed)
            .await
        {
            warn!(record_id = %record.id, "Failed to release nonce: {}", e);
        }

        let elapsed = (Utc::now() - record.created_at).num_milliseconds() as f64 / 1000.0;
        crate::metrics::observe_confirmation_time(elapsed);
        info!(
            record_id = %record.id,
            tx_hash = ?receipt.tx_hash,
            block = receipt.block_number,
            success = receipt.status,
            "Transaction settled"
        );
        self.finish(tracked).await;
    }

    /// Replay the call at the receipt block to recover a revert reason
    async fn revert_reason(&self, record: &TransactionRecord, receipt: &TxReceipt) -> String {
        let request = record.intent.call_request(record.from);
        match self.client.call(&request, Some(receipt.block_number)).await {
            Err(OperatorError::Rpc { message, .. }) => message,
            Err(e) => format!("reverted (reason unavailable: {})", e),
            Ok(_) => "reverted without reason".to_string(),
        }
    }

    async fn abandon(&self, tracked: &Tracked, reason: &str) {
        let record = tracked.record.borrow().clone();
        let changed = self.update(tracked, |r| {
            r.transition(TxState::Abandoned)?;
            r.error = Some(reason.to_string());
            Ok(())
        });
        if changed.is_err() {
            return;
        }

        warn!(
            record_id = %record.id,
            nonce = record.nonce,
            attempts = record.attempts.len(),
            "Transaction abandoned: {}",
            reason
        );

        if let Err(e) = self
            .nonces
            .release(record.from, record.nonce, Release::Abandoned)
            .await
        {
            warn!(record_id = %record.id, "Failed to release abandoned nonce: {}", e);
        }
        self.finish(tracked).await;
    }

    /// Terminal bookkeeping: metrics and audit trail
    async fn finish(&self, tracked: &Tracked) {
        let record = tracked.record.borrow().clone();
        if !record.is_terminal() {
            return;
        }
        crate::metrics::record_transaction_outcome(record.state.as_str());

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(&record).await {
                warn!(record_id = %record.id, "Failed to write audit record: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockSummary, MockChainClient};
    use crate::config::GasConfig;
    use ethers::types::U256;
    use std::sync::Mutex as StdMutex;

    fn payload_hash(payload: &Bytes) -> H256 {
        H256::from(ethers::utils::keccak256(payload))
    }

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn gwei(value: u64) -> U256 {
        U256::from(value) * U256::exp10(9)
    }

    fn submitter_config(max_bumps: u32) -> SubmitterConfig {
        SubmitterConfig {
            poll_interval_ms: 1_000,
            max_poll_interval_ms: 4_000,
            stall_timeout_secs: 30,
            max_bumps,
            confirmations: 1,
            retention_secs: 0,
        }
    }

    fn receipt(tx_hash: H256, status: bool) -> TxReceipt {
        TxReceipt {
            tx_hash,
            block_number: 100,
            status,
            gas_used: U256::from(21_000u64),
            effective_gas_price: Some(gwei(11)),
            from: Address::zero(),
            to: None,
            logs_count: 0,
        }
    }

    /// Chain basics shared by every scenario; broadcasts are logged in order
    fn base_mock(sent: Arc<StdMutex<Vec<H256>>>) -> MockChainClient {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(1u64);
        mock.expect_estimate_gas()
            .returning(|_| Ok(U256::from(21_000u64)));
        mock.expect_get_block().returning(|_| {
            Ok(Some(BlockSummary {
                number: 100,
                hash: None,
                timestamp: 0,
                base_fee_per_gas: Some(gwei(10)),
                gas_used: U256::zero(),
                gas_limit: U256::from(30_000_000u64),
                transaction_count: 0,
            }))
        });
        mock.expect_block_number().returning(|| Ok(100));
        mock.expect_send_raw_transaction().returning(move |raw| {
            let hash = payload_hash(&raw);
            sent.lock().unwrap().push(hash);
            Ok(hash)
        });
        mock
    }

    fn build(mock: MockChainClient, config: SubmitterConfig) -> (TransactionSubmitter, Arc<NonceManager>) {
        let client: Arc<dyn ChainClient> = Arc::new(mock);
        let nonces = Arc::new(NonceManager::new(client.clone()));
        let gas = Arc::new(GasPolicy::new(client.clone(), &GasConfig::default()));
        let account = Account::from_private_key(DEV_KEY, 1).unwrap();
        let submitter =
            TransactionSubmitter::new(client, account, nonces.clone(), gas, config, None);
        (submitter, nonces)
    }

    fn intent() -> TransactionIntent {
        TransactionIntent::native_transfer(Address::repeat_byte(0x42), U256::from(1u64))
    }

    fn sender() -> Address {
        Account::from_private_key(DEV_KEY, 1).unwrap().address()
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_transaction_releases_nonce() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = base_mock(sent.clone());
        mock.expect_get_nonce().returning(|_| Ok(5));
        mock.expect_get_receipt()
            .returning(|hash| Ok(Some(receipt(hash, true))));
        let (submitter, nonces) = build(mock, submitter_config(3));

        let pending = submitter.submit(intent()).await.unwrap();
        assert_eq!(pending.state, TxState::Pending);
        assert_eq!(pending.nonce, 5);

        let done = submitter
            .wait(pending.id, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(done.state, TxState::Confirmed);
        assert_eq!(done.attempts.len(), 1);
        assert!(nonces.inflight(sender()).await.is_empty());
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mined_revert_is_reported_as_on_chain_revert() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = base_mock(sent);
        mock.expect_get_nonce().returning(|_| Ok(0));
        mock.expect_get_receipt()
            .returning(|hash| Ok(Some(receipt(hash, false))));
        mock.expect_call().returning(|_, block| {
            assert_eq!(block, Some(100));
            Err(OperatorError::Rpc {
                operation: "eth_call".to_string(),
                code: 3,
                message: "execution reverted: insufficient balance".to_string(),
            })
        });
        let (submitter, nonces) = build(mock, submitter_config(3));

        let pending = submitter.submit(intent()).await.unwrap();
        let done = submitter
            .wait(pending.id, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(done.state, TxState::Failed);
        assert!(nonces.inflight(sender()).await.is_empty());
        match done.into_result() {
            Err(OperatorError::OnChainRevert { reason, .. }) => {
                assert!(reason.contains("insufficient balance"))
            }
            other => panic!("expected revert, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn estimation_failure_allocates_nothing() {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(1u64);
        mock.expect_estimate_gas()
            .returning(|_| Err(OperatorError::Estimation("execution reverted".to_string())));
        mock.expect_get_nonce().never();
        mock.expect_send_raw_transaction().never();
        let (submitter, nonces) = build(mock, submitter_config(3));

        let err = submitter.submit(intent()).await.unwrap_err();
        assert!(matches!(err, OperatorError::Estimation(_)));
        assert_eq!(nonces.next_sequence(sender()).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_nonce_is_replaced_without_touching_the_next() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = base_mock(sent.clone());
        mock.expect_get_nonce().returning(|_| Ok(5));
        // Broadcast #0 (nonce 5) never mines; the nonce-6 send and the replacement do
        let log = sent.clone();
        mock.expect_get_receipt().returning(move |hash| {
            let position = log.lock().unwrap().iter().position(|h| *h == hash);
            Ok(match position {
                Some(0) | None => None,
                Some(_) => Some(receipt(hash, true)),
            })
        });
        let (submitter, _) = build(mock, submitter_config(3));

        let first = submitter.submit(intent()).await.unwrap();
        let second = submitter.submit(intent()).await.unwrap();
        assert_eq!(first.nonce, 5);
        assert_eq!(second.nonce, 6);

        let second = submitter
            .wait(second.id, Duration::from_secs(600))
            .await
            .unwrap();
        let first = submitter
            .wait(first.id, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(second.state, TxState::Confirmed);
        assert_eq!(second.attempts.len(), 1);

        assert_eq!(first.state, TxState::Confirmed);
        assert_eq!(first.attempts.len(), 2);
        assert!(first.attempts.iter().all(|a| a.nonce == 5));
        assert!(first.attempts[1].gas_quote.priority_fee() > first.attempts[0].gas_quote.priority_fee());
        assert!(first.attempts[0].submitted_at <= first.attempts[1].submitted_at);
        assert_eq!(first.gas_quote.gas_limit, first.attempts[0].gas_quote.gas_limit);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_replacements_abandon_and_reclaim() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = base_mock(sent.clone());
        mock.expect_get_nonce().returning(|_| Ok(5));
        mock.expect_get_receipt().returning(|_| Ok(None));
        let (submitter, nonces) = build(mock, submitter_config(2));

        let pending = submitter.submit(intent()).await.unwrap();
        let done = submitter
            .wait(pending.id, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(done.state, TxState::Abandoned);
        assert_eq!(done.attempts.len(), 3);
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert_eq!(nonces.next_sequence(sender()).await, Some(5));
        assert!(matches!(
            done.into_result(),
            Err(OperatorError::Abandoned { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn nonce_conflict_retries_once_with_fresh_nonce() {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(1u64);
        mock.expect_estimate_gas()
            .returning(|_| Ok(U256::from(21_000u64)));
        mock.expect_get_block().returning(|_| Ok(None));
        mock.expect_gas_price().returning(|| Ok(gwei(2)));
        mock.expect_block_number().returning(|| Ok(100));
        let mut counts = vec![6u64, 5u64];
        mock.expect_get_nonce()
            .returning(move |_| Ok(counts.pop().unwrap_or(6)));
        let mut sends = 0;
        mock.expect_send_raw_transaction().returning(move |raw| {
            sends += 1;
            if sends == 1 {
                Err(OperatorError::NonceConflict {
                    account: Address::zero(),
                    message: "nonce too low".to_string(),
                })
            } else {
                Ok(payload_hash(&raw))
            }
        });
        mock.expect_get_receipt()
            .returning(|hash| Ok(Some(receipt(hash, true))));
        let (submitter, _) = build(mock, submitter_config(3));

        let pending = submitter.submit(intent()).await.unwrap();
        assert_eq!(pending.nonce, 6);
        assert_eq!(pending.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_detaches_and_keeps_nonce_inflight() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = base_mock(sent);
        mock.expect_get_nonce().returning(|_| Ok(9));
        mock.expect_get_receipt().returning(|_| Ok(None));
        let (submitter, nonces) = build(mock, submitter_config(3));

        let pending = submitter.submit(intent()).await.unwrap();
        let detached = submitter.cancel_tracking(pending.id).await.unwrap();

        assert_eq!(detached.state, TxState::Detached);
        assert!(detached.error.unwrap().contains("not retracted"));
        assert_eq!(nonces.inflight(sender()).await, vec![9]);

        // Terminal already, a second cancel is rejected
        assert!(matches!(
            submitter.cancel_tracking(pending.id).await,
            Err(OperatorError::InvalidStateTransition { .. })
        ));
        assert_eq!(submitter.prune(), 1);
        assert!(matches!(
            submitter.status(pending.id),
            Err(OperatorError::TransactionNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_while_pending() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = base_mock(sent);
        mock.expect_get_nonce().returning(|_| Ok(1));
        mock.expect_get_receipt().returning(|_| Ok(None));
        let (submitter, _) = build(mock, submitter_config(3));

        let pending = submitter.submit(intent()).await.unwrap();
        let err = submitter
            .wait(pending.id, Duration::from_secs(5))
            .await
            .unwrap_err();
        match &err {
            OperatorError::Unsettled {
                record_id,
                state,
                tx_hash,
            } => {
                assert_eq!(*record_id, pending.id);
                assert_eq!(state, "pending");
                assert_eq!(*tx_hash, pending.tx_hash);
            }
            other => panic!("expected an unsettled record, got {:?}", other),
        }
        assert!(!err.is_retryable());
        assert_eq!(err.to_payload().record_id, Some(pending.id));
        assert_eq!(submitter.pending_count(), 1);
        submitter.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn send_lost_in_transit_is_tracked_by_payload_hash() {
        // The node takes the payload but the response never arrives
        let landed = Arc::new(StdMutex::new(Vec::new()));
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(1u64);
        mock.expect_estimate_gas()
            .returning(|_| Ok(U256::from(21_000u64)));
        mock.expect_get_block().returning(|_| Ok(None));
        mock.expect_gas_price().returning(|| Ok(gwei(2)));
        mock.expect_block_number().returning(|| Ok(100));
        mock.expect_get_nonce().returning(|_| Ok(5));
        let log = landed.clone();
        mock.expect_send_raw_transaction().times(1).returning(move |raw| {
            log.lock().unwrap().push(payload_hash(&raw));
            Err(OperatorError::TransientNetwork {
                operation: "eth_sendRawTransaction".to_string(),
                message: "connection reset".to_string(),
            })
        });
        let log = landed.clone();
        mock.expect_get_receipt().returning(move |hash| {
            Ok(log
                .lock()
                .unwrap()
                .contains(&hash)
                .then(|| receipt(hash, true)))
        });
        let (submitter, nonces) = build(mock, submitter_config(3));

        let pending = submitter.submit(intent()).await.unwrap();
        assert_eq!(pending.state, TxState::Pending);
        assert_eq!(pending.nonce, 5);
        assert_eq!(pending.tx_hash, landed.lock().unwrap().first().copied());
        assert_eq!(nonces.inflight(sender()).await, vec![5]);

        let done = submitter
            .wait(pending.id, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(done.state, TxState::Confirmed);
        assert_eq!(done.attempts.len(), 1);
        assert!(nonces.inflight(sender()).await.is_empty());
        assert_eq!(nonces.next_sequence(sender()).await, Some(6));
        assert_eq!(landed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_first_send_abandons_with_record_id() {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(1u64);
        mock.expect_estimate_gas()
            .returning(|_| Ok(U256::from(21_000u64)));
        mock.expect_get_block().returning(|_| Ok(None));
        mock.expect_gas_price().returning(|| Ok(gwei(2)));
        mock.expect_get_nonce().returning(|_| Ok(5));
        mock.expect_send_raw_transaction().times(1).returning(|_| {
            Err(OperatorError::Rpc {
                operation: "eth_sendRawTransaction".to_string(),
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
            })
        });
        let (submitter, nonces) = build(mock, submitter_config(3));

        let err = submitter.submit(intent()).await.unwrap_err();
        let OperatorError::Abandoned { record_id, .. } = &err else {
            panic!("expected an abandoned record, got {:?}", err);
        };
        assert!(!err.is_retryable());
        assert_eq!(
            submitter.status(*record_id).unwrap().state,
            TxState::Abandoned
        );
        assert_eq!(nonces.next_sequence(sender()).await, Some(5));
    }
}
