//! Confirmation depth tracking for mined transactions
//!
//! A receipt only counts once it sits `confirmations` blocks deep. Deep
//! receipts are fetched again before being reported final, so a receipt that
//! disappears sends the caller back to polling.

use super::{ChainClient, TxReceipt};
use crate::error::OperatorResult;

use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a depth check
#[derive(Debug, Clone, PartialEq)]
pub enum Finality {
    /// Mined but not yet deep enough
    Included { depth: u64 },
    /// Deep enough and still present
    Final(TxReceipt),
    /// The receipt is gone; the transaction is unmined again
    Vanished,
}

/// Checks receipts against the configured confirmation depth
pub struct FinalityTracker {
    client: Arc<dyn ChainClient>,
    confirmations: u64,
}

impl FinalityTracker {
    pub fn new(client: Arc<dyn ChainClient>, confirmations: u64) -> Self {
        Self {
            client,
            confirmations: confirmations.max(1),
        }
    }

    /// Number of blocks on top of (and including) the receipt's block
    pub fn depth(receipt_block: u64, head: u64) -> u64 {
        if head < receipt_block {
            0
        } else {
            head - receipt_block + 1
        }
    }

    /// Check whether a receipt has reached the required depth
    pub async fn check(&self, receipt: &TxReceipt) -> OperatorResult<Finality> {
        let head = self.client.block_number().await?;
        let depth = Self::depth(receipt.block_number, head);

        if depth < self.confirmations {
            debug!(
                tx_hash = ?receipt.tx_hash,
                depth,
                required = self.confirmations,
                "Waiting for confirmations"
            );
            return Ok(Finality::Included { depth });
        }

        if self.confirmations == 1 {
            return Ok(Finality::Final(receipt.clone()));
        }

        // Verify the transaction is still included at the same height
        match self.client.get_receipt(receipt.tx_hash).await? {
            Some(current) if current.block_number == receipt.block_number => {
                Ok(Finality::Final(current))
            }
            Some(current) => {
                warn!(
                    tx_hash = ?receipt.tx_hash,
                    old_block = receipt.block_number,
                    new_block = current.block_number,
                    "Receipt moved to another block"
                );
                let depth = Self::depth(current.block_number, head);
                if depth >= self.confirmations {
                    Ok(Finality::Final(current))
                } else {
                    Ok(Finality::Included { depth })
                }
            }
            None => {
                warn!(tx_hash = ?receipt.tx_hash, "Receipt vanished before reaching depth");
                Ok(Finality::Vanished)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use ethers::types::{Address, H256, U256};

    fn receipt(block: u64) -> TxReceipt {
        TxReceipt {
            tx_hash: H256::repeat_byte(0xab),
            block_number: block,
            status: true,
            gas_used: U256::from(21_000u64),
            effective_gas_price: None,
            from: Address::zero(),
            to: None,
            logs_count: 0,
        }
    }

    #[test]
    fn depth_counts_the_inclusion_block() {
        assert_eq!(FinalityTracker::depth(100, 100), 1);
        assert_eq!(FinalityTracker::depth(100, 102), 3);
        assert_eq!(FinalityTracker::depth(100, 99), 0);
    }

    #[tokio::test]
    async fn shallow_receipt_is_included_only() {
        let mut mock = MockChainClient::new();
        mock.expect_block_number().returning(|| Ok(101));
        let tracker = FinalityTracker::new(Arc::new(mock), 3);

        let outcome = tracker.check(&receipt(100)).await.unwrap();
        assert_eq!(outcome, Finality::Included { depth: 2 });
    }

    #[tokio::test]
    async fn deep_receipt_is_reverified() {
        let mut mock = MockChainClient::new();
        mock.expect_block_number().returning(|| Ok(110));
        mock.expect_get_receipt()
            .times(1)
            .returning(|_| Ok(Some(receipt(100))));
        let tracker = FinalityTracker::new(Arc::new(mock), 3);

        let outcome = tracker.check(&receipt(100)).await.unwrap();
        assert!(matches!(outcome, Finality::Final(_)));
    }

    #[tokio::test]
    async fn vanished_receipt_is_reported() {
        let mut mock = MockChainClient::new();
        mock.expect_block_number().returning(|| Ok(110));
        mock.expect_get_receipt().returning(|_| Ok(None));
        let tracker = FinalityTracker::new(Arc::new(mock), 2);

        let outcome = tracker.check(&receipt(100)).await.unwrap();
        assert_eq!(outcome, Finality::Vanished);
    }
}
