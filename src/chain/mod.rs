//! Chain module - RPC access to the configured EVM network
//!
//! This module provides:
//! - The `ChainClient` seam every other component talks through
//! - An HTTP implementation with per-call timeouts and transient retry
//! - Confirmation depth checks for mined transactions

pub mod finality;
pub mod provider;

pub use finality::{Finality, FinalityTracker};
pub use provider::RpcChainClient;

use crate::error::OperatorResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Block, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256,
};
use serde::Serialize;

/// Read-only call or simulation request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            from: None,
            to,
            data,
            value: U256::zero(),
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub(crate) fn to_typed(&self) -> TypedTransaction {
        let mut tx = TransactionRequest::new()
            .to(self.to)
            .data(self.data.clone())
            .value(self.value);
        if let Some(from) = self.from {
            tx = tx.from(from);
        }
        tx.into()
    }
}

/// Receipt fields the operator cares about
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub status: bool,
    pub gas_used: U256,
    pub effective_gas_price: Option<U256>,
    pub from: Address,
    pub to: Option<Address>,
    pub logs_count: usize,
}

impl From<TransactionReceipt> for TxReceipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
            status: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            gas_used: receipt.gas_used.unwrap_or_default(),
            effective_gas_price: receipt.effective_gas_price,
            from: receipt.from,
            to: receipt.to,
            logs_count: receipt.logs.len(),
        }
    }
}

/// Block header summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: Option<H256>,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<U256>,
    pub gas_used: U256,
    pub gas_limit: U256,
    pub transaction_count: usize,
}

impl From<Block<H256>> for BlockSummary {
    fn from(block: Block<H256>) -> Self {
        Self {
            number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
            hash: block.hash,
            timestamp: block.timestamp.low_u64(),
            base_fee_per_gas: block.base_fee_per_gas,
            gas_used: block.gas_used,
            gas_limit: block.gas_limit,
            transaction_count: block.transactions.len(),
        }
    }
}

/// Transport to a single chain endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Configured chain id
    fn chain_id(&self) -> u64;

    /// `eth_call`, optionally pinned to a block
    async fn call(&self, request: &CallRequest, block: Option<u64>) -> OperatorResult<Bytes>;

    /// `eth_estimateGas`; reverts surface as estimation errors
    async fn estimate_gas(&self, request: &CallRequest) -> OperatorResult<U256>;

    /// Mined transaction count of an account
    async fn get_nonce(&self, account: Address) -> OperatorResult<u64>;

    /// Broadcast a signed payload
    async fn send_raw_transaction(&self, raw: Bytes) -> OperatorResult<H256>;

    async fn get_receipt(&self, tx_hash: H256) -> OperatorResult<Option<TxReceipt>>;

    async fn get_block(&self, block: BlockNumber) -> OperatorResult<Option<BlockSummary>>;

    async fn get_balance(&self, account: Address) -> OperatorResult<U256>;

    async fn gas_price(&self) -> OperatorResult<U256>;

    async fn block_number(&self) -> OperatorResult<u64>;

    /// Chain id reported by the node
    async fn remote_chain_id(&self) -> OperatorResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_converts_to_typed_transaction() {
        let to = Address::repeat_byte(0x11);
        let from = Address::repeat_byte(0x22);
        let request = CallRequest::new(to, Bytes::from(vec![0xde, 0xad]))
            .from(from)
            .value(U256::from(7u64));

        let tx = request.to_typed();
        assert_eq!(tx.to_addr(), Some(&to));
        assert_eq!(tx.from(), Some(&from));
        assert_eq!(tx.value(), Some(&U256::from(7u64)));
        assert_eq!(tx.data().map(|d| d.to_vec()), Some(vec![0xde, 0xad]));
    }

    #[test]
    fn receipt_status_maps_to_bool() {
        let mut receipt = TransactionReceipt::default();
        receipt.status = Some(0u64.into());
        receipt.block_number = Some(42u64.into());
        let summary = TxReceipt::from(receipt.clone());
        assert!(!summary.status);
        assert_eq!(summary.block_number, 42);

        receipt.status = Some(1u64.into());
        assert!(TxReceipt::from(receipt).status);
    }
}
