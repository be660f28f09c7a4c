//! HTTP chain client with per-call timeout and transient retry

use super::{BlockSummary, CallRequest, ChainClient, TxReceipt};
use crate::config::ChainConfig;
use crate::contracts::abi::decode_revert_reason;
use crate::error::{OperatorError, OperatorResult};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{Address, BlockId, BlockNumber, Bytes, H256, U256};
use ethers::utils::keccak256;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// `ChainClient` backed by a JSON-RPC HTTP endpoint
pub struct RpcChainClient {
    config: ChainConfig,
    provider: Provider<Http>,
}

impl RpcChainClient {
    /// Create a new client for the configured endpoint
    pub fn new(config: ChainConfig) -> OperatorResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            OperatorError::Config(format!("invalid rpc url {}: {}", config.rpc_url, e))
        })?;

        debug!(chain_id = config.chain_id, "Created HTTP provider");

        Ok(Self { config, provider })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(base.min(self.config.max_backoff_ms))
    }

    /// Run one RPC with a timeout per attempt, retrying transient failures
    async fn with_retry<T, F, Fut>(&self, method: &'static str, mut request: F) -> OperatorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.config.rpc_max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.config.request_timeout(), request()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(classify_error(method, e)),
                Err(_) => Err(OperatorError::TransientNetwork {
                    operation: method.to_string(),
                    message: format!("timed out after {:?}", self.config.request_timeout()),
                }),
            };

            crate::metrics::record_rpc_request(method, outcome.is_ok(), started.elapsed().as_secs_f64());

            match outcome {
                Ok(value) => return Ok(value),
                Err(e @ OperatorError::TransientNetwork { .. }) if attempt + 1 < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        method,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient RPC failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a provider error onto the operator taxonomy
pub(crate) fn classify_error(method: &str, err: ProviderError) -> OperatorError {
    let Some(response) = err.as_error_response() else {
        if let Some(serde_err) = err.as_serde_error() {
            return OperatorError::Rpc {
                operation: method.to_string(),
                code: -32700,
                message: serde_err.to_string(),
            };
        }
        return OperatorError::TransientNetwork {
            operation: method.to_string(),
            message: err.to_string(),
        };
    };

    let lowered = response.message.to_lowercase();

    if lowered.contains("nonce too low") {
        return OperatorError::NonceConflict {
            account: Address::zero(),
            message: response.message.clone(),
        };
    }

    if lowered.contains("execution reverted") || lowered.contains("revert") {
        let reason = response
            .as_revert_data()
            .and_then(|data| decode_revert_reason(&data))
            .unwrap_or_else(|| response.message.clone());
        return OperatorError::Rpc {
            operation: method.to_string(),
            code: response.code,
            message: format!("execution reverted: {}", reason),
        };
    }

    // Server-side overload codes are worth another attempt
    if matches!(response.code, -32005 | -32603) || lowered.contains("rate limit") {
        return OperatorError::TransientNetwork {
            operation: method.to_string(),
            message: response.message.clone(),
        };
    }

    OperatorError::Rpc {
        operation: method.to_string(),
        code: response.code,
        message: response.message.clone(),
    }
}

fn is_already_known(err: &OperatorError) -> bool {
    match err {
        OperatorError::Rpc { message, .. } => {
            let lowered = message.to_lowercase();
            lowered.contains("already known") || lowered.contains("known transaction")
        }
        _ => false,
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn call(&self, request: &CallRequest, block: Option<u64>) -> OperatorResult<Bytes> {
        let tx = request.to_typed();
        let block: Option<BlockId> = block.map(|b| BlockId::Number(BlockNumber::Number(b.into())));
        let provider = &self.provider;
        self.with_retry("eth_call", || provider.call(&tx, block)).await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> OperatorResult<U256> {
        let tx = request.to_typed();
        let provider = &self.provider;
        self.with_retry("eth_estimateGas", || provider.estimate_gas(&tx, None))
            .await
            .map_err(|e| match e {
                OperatorError::Rpc { message, .. } => OperatorError::Estimation(message),
                other => other,
            })
    }

    async fn get_nonce(&self, account: Address) -> OperatorResult<u64> {
        let provider = &self.provider;
        let count = self
            .with_retry("eth_getTransactionCount", || {
                provider.get_transaction_count(account, Some(BlockNumber::Latest.into()))
            })
            .await?;
        Ok(count.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> OperatorResult<H256> {
        let provider = &self.provider;
        let result = self
            .with_retry("eth_sendRawTransaction", || {
                let raw = raw.clone();
                async move { provider.send_raw_transaction(raw).await.map(|p| p.tx_hash()) }
            })
            .await;

        match result {
            Err(ref e) if is_already_known(e) => {
                let tx_hash = H256::from(keccak256(&raw));
                debug!(?tx_hash, "Node already knows transaction, treating as accepted");
                Ok(tx_hash)
            }
            other => other,
        }
    }

    async fn get_receipt(&self, tx_hash: H256) -> OperatorResult<Option<TxReceipt>> {
        let provider = &self.provider;
        let receipt = self
            .with_retry("eth_getTransactionReceipt", || {
                provider.get_transaction_receipt(tx_hash)
            })
            .await?;
        // Receipts without a block are still pending on some nodes
        Ok(receipt
            .filter(|r| r.block_number.is_some())
            .map(TxReceipt::from))
    }

    async fn get_block(&self, block: BlockNumber) -> OperatorResult<Option<BlockSummary>> {
        let provider = &self.provider;
        let block = self
            .with_retry("eth_getBlockByNumber", || provider.get_block(block))
            .await?;
        Ok(block.map(BlockSummary::from))
    }

    async fn get_balance(&self, account: Address) -> OperatorResult<U256> {
        let provider = &self.provider;
        self.with_retry("eth_getBalance", || provider.get_balance(account, None))
            .await
    }

    async fn gas_price(&self) -> OperatorResult<U256> {
        let provider = &self.provider;
        self.with_retry("eth_gasPrice", || provider.get_gas_price())
            .await
    }

    async fn block_number(&self) -> OperatorResult<u64> {
        let provider = &self.provider;
        let number = self
            .with_retry("eth_blockNumber", || provider.get_block_number())
            .await?;
        Ok(number.as_u64())
    }

    async fn remote_chain_id(&self) -> OperatorResult<u64> {
        let provider = &self.provider;
        let id = self
            .with_retry("eth_chainId", || provider.get_chainid())
            .await?;
        Ok(id.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::JsonRpcError;

    fn rpc_error(code: i64, message: &str) -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(ethers::providers::HttpClientError::JsonRpcError(
            JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            },
        )))
    }

    fn test_config() -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            rpc_url: "http://localhost:8545".to_string(),
            request_timeout_ms: 1_000,
            rpc_max_attempts: 3,
            retry_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
        }
    }

    #[test]
    fn nonce_too_low_is_a_conflict() {
        let err = classify_error("eth_sendRawTransaction", rpc_error(-32000, "nonce too low"));
        assert!(matches!(err, OperatorError::NonceConflict { .. }));
    }

    #[test]
    fn already_known_is_detected() {
        let err = classify_error("eth_sendRawTransaction", rpc_error(-32000, "already known"));
        assert!(is_already_known(&err));
    }

    #[test]
    fn revert_is_deterministic() {
        let err = classify_error("eth_call", rpc_error(3, "execution reverted"));
        assert!(matches!(err, OperatorError::Rpc { code: 3, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn backoff_is_capped() {
        let client = RpcChainClient::new(test_config()).unwrap();
        assert_eq!(client.backoff(0), Duration::from_millis(1_000));
        assert_eq!(client.backoff(1), Duration::from_millis(2_000));
        assert_eq!(client.backoff(2), Duration::from_millis(4_000));
        assert_eq!(client.backoff(5), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let client = RpcChainClient::new(test_config()).unwrap();
        let mut calls = 0;
        let value = client
            .with_retry("eth_blockNumber", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err(rpc_error(-32005, "limit exceeded"))
                    } else {
                        Ok(7u64)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deterministic_errors_are_not_retried() {
        let client = RpcChainClient::new(test_config()).unwrap();
        let mut calls = 0;
        let result: OperatorResult<u64> = client
            .with_retry("eth_call", || {
                calls += 1;
                async { Err(rpc_error(-32602, "invalid params")) }
            })
            .await;
        assert!(matches!(result, Err(OperatorError::Rpc { code: -32602, .. })));
        assert_eq!(calls, 1);
    }
}
