//! Multicall batching
//!
//! Reads are folded into one `tryBlockAndAggregate` eth_call, with concurrent
//! individual calls as the fallback. Writes become a single `aggregate3`
//! transaction intent that goes through the normal submission path.

use crate::chain::{CallRequest, ChainClient};
use crate::contracts::abi::decode_revert_reason;
use crate::contracts::multicall3;
use crate::error::{OperatorError, OperatorResult};
use crate::tx::{IntentKind, TransactionIntent};

use ethers::types::{Address, Bytes, U256};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// One call inside a batch
#[derive(Debug, Clone, PartialEq)]
pub struct SubCall {
    pub target: Address,
    pub data: Bytes,
    pub value: U256,
}

impl SubCall {
    pub fn new(target: Address, data: Bytes) -> Self {
        Self {
            target,
            data,
            value: U256::zero(),
        }
    }
}

/// Outcome of one slot, index-aligned with the request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotResult {
    Success { data: Bytes },
    Failure { error: String },
}

impl SlotResult {
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            SlotResult::Success { data } => Some(data),
            SlotResult::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// Block the batch was evaluated at, when the aggregator reports it
    pub block_number: Option<u64>,
    pub results: Vec<SlotResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub enum Aggregated {
    Read(BatchResult),
    Write(TransactionIntent),
}

pub struct MulticallAggregator {
    client: Arc<dyn ChainClient>,
    address: Option<Address>,
}

impl MulticallAggregator {
    pub fn new(client: Arc<dyn ChainClient>, address: Option<Address>) -> Self {
        Self { client, address }
    }

    pub async fn aggregate(&self, batch: &[SubCall], mode: BatchMode) -> OperatorResult<Aggregated> {
        match mode {
            BatchMode::Read => Ok(Aggregated::Read(self.read(batch).await?)),
            BatchMode::Write => Ok(Aggregated::Write(self.write_intent(batch)?)),
        }
    }

    /// Evaluate every call; one slot per input even when some fail
    pub async fn read(&self, batch: &[SubCall]) -> OperatorResult<BatchResult> {
        if batch.is_empty() {
            return Ok(BatchResult {
                block_number: None,
                results: Vec::new(),
            });
        }

        if let Some(address) = self.address {
            match self.read_aggregated(address, batch).await {
                Ok(result) => return Ok(result),
                Err(e) => warn!(
                    calls = batch.len(),
                    "Multicall aggregate failed, falling back to individual calls: {}",
                    e
                ),
            }
        }

        Ok(self.read_individually(batch).await)
    }

    async fn read_aggregated(&self, address: Address, batch: &[SubCall]) -> OperatorResult<BatchResult> {
        let calls: Vec<(Address, Bytes)> = batch
            .iter()
            .map(|call| (call.target, call.data.clone()))
            .collect();
        let request = CallRequest::new(address, multicall3::try_block_and_aggregate(false, &calls));

        let raw = self.client.call(&request, None).await?;
        let output = multicall3::decode_try_block_and_aggregate(&raw)?;

        if output.results.len() != batch.len() {
            return Err(OperatorError::Internal(format!(
                "multicall returned {} results for {} calls",
                output.results.len(),
                batch.len()
            )));
        }

        let results = output
            .results
            .into_iter()
            .map(|(success, data)| {
                if success {
                    SlotResult::Success { data }
                } else {
                    SlotResult::Failure {
                        error: decode_revert_reason(&data)
                            .unwrap_or_else(|| "call reverted".to_string()),
                    }
                }
            })
            .collect();

        debug!(calls = batch.len(), block = output.block_number, "Aggregated read");
        Ok(BatchResult {
            block_number: Some(output.block_number),
            results,
        })
    }

    async fn read_individually(&self, batch: &[SubCall]) -> BatchResult {
        let calls = batch.iter().map(|call| {
            let request = CallRequest::new(call.target, call.data.clone()).value(call.value);
            async move { self.client.call(&request, None).await }
        });

        let results = join_all(calls)
            .await
            .into_iter()
            .map(|outcome| match outcome {
                Ok(data) => SlotResult::Success { data },
                Err(e) => SlotResult::Failure {
                    error: e.to_string(),
                },
            })
            .collect();

        BatchResult {
            block_number: None,
            results,
        }
    }

    /// Single intent executing every call atomically
    pub fn write_intent(&self, batch: &[SubCall]) -> OperatorResult<TransactionIntent> {
        let address = self.address.ok_or_else(|| {
            OperatorError::Config("no multicall address configured".to_string())
        })?;
        if batch.is_empty() {
            return Err(OperatorError::InvalidParams(
                "multicall batch is empty".to_string(),
            ));
        }

        let total = batch
            .iter()
            .try_fold(U256::zero(), |acc, call| acc.checked_add(call.value))
            .ok_or_else(|| OperatorError::InvalidParams("batch value overflows".to_string()))?;

        let data = if total.is_zero() {
            let calls: Vec<(Address, Bytes)> = batch
                .iter()
                .map(|call| (call.target, call.data.clone()))
                .collect();
            multicall3::aggregate3(&calls)
        } else {
            let calls: Vec<(Address, U256, Bytes)> = batch
                .iter()
                .map(|call| (call.target, call.value, call.data.clone()))
                .collect();
            multicall3::aggregate3_value(&calls)
        };

        Ok(TransactionIntent::new(IntentKind::Multicall, address, data).with_value(total))
    }
}
