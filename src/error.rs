//! Error types for the EVM operator

use ethers::types::{Address, H256};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the operator
#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transient network error during {operation}: {message}")]
    TransientNetwork { operation: String, message: String },

    #[error("RPC rejected {operation} (code {code}): {message}")]
    Rpc {
        operation: String,
        code: i64,
        message: String,
    },

    #[error("Gas estimation failed: {0}")]
    Estimation(String),

    #[error("Nonce conflict for {account:?}: {message}")]
    NonceConflict { account: Address, message: String },

    #[error("Operation {operation} denied: {reason}")]
    AuthorizationDenied { operation: String, reason: String },

    #[error("Operation {operation} rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        operation: String,
        retry_after_ms: u64,
    },

    #[error("Transaction {tx_hash:?} reverted on chain: {reason}")]
    OnChainRevert { tx_hash: H256, reason: String },

    #[error("Transaction {record_id} abandoned after {attempts} attempts: {reason}")]
    Abandoned {
        record_id: Uuid,
        attempts: usize,
        reason: String,
    },

    #[error("Transaction {record_id} is still {state} and may yet be mined; poll its status instead of resubmitting")]
    Unsettled {
        record_id: Uuid,
        state: String,
        tx_hash: Option<H256>,
    },

    #[error("Gas price ceiling exceeded: {0}")]
    GasCeiling(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OperatorError {
    /// Check if a caller may retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::TransientNetwork { .. }
                | OperatorError::NonceConflict { .. }
                | OperatorError::RateLimited { .. }
                | OperatorError::Timeout { .. }
        )
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorError::Config(_) => "config",
            OperatorError::Database(_) => "database",
            OperatorError::TransientNetwork { .. } => "transient_network",
            OperatorError::Rpc { .. } => "rpc",
            OperatorError::Estimation(_) => "estimation",
            OperatorError::NonceConflict { .. } => "nonce_conflict",
            OperatorError::AuthorizationDenied { .. } => "authorization_denied",
            OperatorError::RateLimited { .. } => "rate_limited",
            OperatorError::OnChainRevert { .. } => "on_chain_revert",
            OperatorError::Abandoned { .. } => "abandoned",
            OperatorError::Unsettled { .. } => "unsettled",
            OperatorError::GasCeiling(_) => "gas_ceiling",
            OperatorError::Wallet(_) => "wallet",
            OperatorError::InvalidParams(_) => "invalid_params",
            OperatorError::Timeout { .. } => "timeout",
            OperatorError::TransactionNotFound { .. } => "transaction_not_found",
            OperatorError::InvalidStateTransition { .. } => "invalid_state_transition",
            OperatorError::Internal(_) => "internal",
        }
    }

    /// Structured form returned to callers
    pub fn to_payload(&self) -> ErrorPayload {
        let retry_after_ms = match self {
            OperatorError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        };

        let record_id = match self {
            OperatorError::Abandoned { record_id, .. } | OperatorError::Unsettled { record_id, .. } => {
                Some(*record_id)
            }
            _ => None,
        };

        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            retriable: self.is_retryable(),
            retry_after_ms,
            record_id,
        }
    }
}

/// Error body exposed at the operation boundary
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
    pub retriable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Set when a transaction record exists; query it before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

/// Result type for operator operations
pub type OperatorResult<T> = Result<T, OperatorError>;
