//! Operation gate: decides whether a requested operation may run at all
//!
//! Static policy (write flag, signer, allow-list) is checked before the
//! per-kind rate limit, so denied writes never consume rate budget.

pub mod rate_limit;

pub use rate_limit::FixedWindowLimiter;

use crate::config::GateConfig;
use crate::error::{OperatorError, OperatorResult};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Every operation the dispatcher understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Balance,
    Allowance,
    Quote,
    Nonce,
    GasEstimate,
    Receipt,
    Block,
    TokenMetadata,
    MulticallRead,
    TransactionStatus,
    WalletInfo,
    #[serde(rename = "nft_balance_721")]
    NftBalance721,
    NftOwnerOf,
    #[serde(rename = "nft_metadata_721")]
    NftMetadata721,
    #[serde(rename = "nft_balance_1155")]
    NftBalance1155,
    #[serde(rename = "nft_metadata_1155")]
    NftMetadata1155,
    Approve,
    Transfer,
    Swap,
    PermitSign,
    MessageSign,
    TypedDataSign,
    MulticallWrite,
    CancelTracking,
    #[serde(rename = "nft_transfer_721")]
    NftTransfer721,
    #[serde(rename = "nft_transfer_1155")]
    NftTransfer1155,
}

impl OperationKind {
    pub const ALL: [OperationKind; 26] = [
        OperationKind::Balance,
        OperationKind::Allowance,
        OperationKind::Quote,
        OperationKind::Nonce,
        OperationKind::GasEstimate,
        OperationKind::Receipt,
        OperationKind::Block,
        OperationKind::TokenMetadata,
        OperationKind::MulticallRead,
        OperationKind::TransactionStatus,
        OperationKind::WalletInfo,
        OperationKind::NftBalance721,
        OperationKind::NftOwnerOf,
        OperationKind::NftMetadata721,
        OperationKind::NftBalance1155,
        OperationKind::NftMetadata1155,
        OperationKind::Approve,
        OperationKind::Transfer,
        OperationKind::Swap,
        OperationKind::PermitSign,
        OperationKind::MessageSign,
        OperationKind::TypedDataSign,
        OperationKind::MulticallWrite,
        OperationKind::CancelTracking,
        OperationKind::NftTransfer721,
        OperationKind::NftTransfer1155,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Balance => "balance",
            OperationKind::Allowance => "allowance",
            OperationKind::Quote => "quote",
            OperationKind::Nonce => "nonce",
            OperationKind::GasEstimate => "gas_estimate",
            OperationKind::Receipt => "receipt",
            OperationKind::Block => "block",
            OperationKind::TokenMetadata => "token_metadata",
            OperationKind::MulticallRead => "multicall_read",
            OperationKind::TransactionStatus => "transaction_status",
            OperationKind::WalletInfo => "wallet_info",
            OperationKind::NftBalance721 => "nft_balance_721",
            OperationKind::NftOwnerOf => "nft_owner_of",
            OperationKind::NftMetadata721 => "nft_metadata_721",
            OperationKind::NftBalance1155 => "nft_balance_1155",
            OperationKind::NftMetadata1155 => "nft_metadata_1155",
            OperationKind::Approve => "approve",
            OperationKind::Transfer => "transfer",
            OperationKind::Swap => "swap",
            OperationKind::PermitSign => "permit_sign",
            OperationKind::MessageSign => "message_sign",
            OperationKind::TypedDataSign => "typed_data_sign",
            OperationKind::MulticallWrite => "multicall_write",
            OperationKind::CancelTracking => "cancel_tracking",
            OperationKind::NftTransfer721 => "nft_transfer_721",
            OperationKind::NftTransfer1155 => "nft_transfer_1155",
        }
    }

    /// Kinds that sign with the operator key or change submission state
    pub fn is_mutating(&self) -> bool {
        match self {
            OperationKind::Balance
            | OperationKind::Allowance
            | OperationKind::Quote
            | OperationKind::Nonce
            | OperationKind::GasEstimate
            | OperationKind::Receipt
            | OperationKind::Block
            | OperationKind::TokenMetadata
            | OperationKind::MulticallRead
            | OperationKind::TransactionStatus
            | OperationKind::WalletInfo
            | OperationKind::NftBalance721
            | OperationKind::NftOwnerOf
            | OperationKind::NftMetadata721
            | OperationKind::NftBalance1155
            | OperationKind::NftMetadata1155 => false,
            OperationKind::Approve
            | OperationKind::Transfer
            | OperationKind::Swap
            | OperationKind::PermitSign
            | OperationKind::MessageSign
            | OperationKind::TypedDataSign
            | OperationKind::MulticallWrite
            | OperationKind::CancelTracking
            | OperationKind::NftTransfer721
            | OperationKind::NftTransfer1155 => true,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| OperatorError::InvalidParams(format!("unknown operation kind: {}", s)))
    }
}

/// Write policy, allow-list and rate limit in one place
#[derive(Debug)]
pub struct OperationGate {
    write_enabled: bool,
    signer_configured: bool,
    /// `None` allows every kind
    allowed: Option<HashSet<OperationKind>>,
    limiter: FixedWindowLimiter,
}

impl OperationGate {
    pub fn new(config: &GateConfig, signer_configured: bool) -> OperatorResult<Self> {
        let allowed = if config.enabled_operations.iter().any(|name| name == "*") {
            None
        } else {
            let kinds = config
                .enabled_operations
                .iter()
                .map(|name| {
                    name.parse::<OperationKind>()
                        .map_err(|e| OperatorError::Config(e.to_string()))
                })
                .collect::<OperatorResult<HashSet<_>>>()?;
            Some(kinds)
        };

        Ok(Self {
            write_enabled: config.write_enabled,
            signer_configured,
            allowed,
            limiter: FixedWindowLimiter::new(
                config.rate_limit_max_requests,
                Duration::from_millis(config.rate_limit_window_ms),
            ),
        })
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled && self.signer_configured
    }

    /// Decide whether `kind` may run now
    pub fn authorize(&self, kind: OperationKind) -> OperatorResult<()> {
        if let Err(reason) = self.check_policy(kind) {
            debug!(operation = %kind, reason, "Operation denied by policy");
            crate::metrics::record_gate_denial(kind.as_str(), "policy");
            return Err(OperatorError::AuthorizationDenied {
                operation: kind.to_string(),
                reason: reason.to_string(),
            });
        }

        if let Err(retry_after) = self.limiter.try_acquire(kind) {
            debug!(operation = %kind, retry_after_ms = retry_after.as_millis() as u64, "Operation rate limited");
            crate::metrics::record_gate_denial(kind.as_str(), "rate_limit");
            return Err(OperatorError::RateLimited {
                operation: kind.to_string(),
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }

        Ok(())
    }

    fn check_policy(&self, kind: OperationKind) -> Result<(), &'static str> {
        if kind.is_mutating() {
            if !self.write_enabled {
                return Err("write operations are disabled");
            }
            if !self.signer_configured {
                return Err("no signing key configured");
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(&kind) {
                return Err("operation is not in the allow-list");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(write_enabled: bool, enabled: &[&str]) -> GateConfig {
        GateConfig {
            write_enabled,
            enabled_operations: enabled.iter().map(|s| s.to_string()).collect(),
            rate_limit_max_requests: 5,
            rate_limit_window_ms: 1_000,
        }
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("mint".parse::<OperationKind>().is_err());
    }

    #[test]
    fn wire_names_match_serde_names() {
        for kind in OperationKind::ALL {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
        assert_eq!(
            OperationKind::ALL.iter().filter(|k| k.is_mutating()).count(),
            10
        );
        assert!(!OperationKind::NftOwnerOf.is_mutating());
        assert!(OperationKind::NftTransfer1155.is_mutating());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_denied_without_flag_regardless_of_rate_state() {
        let gate = OperationGate::new(&config(false, &["*"]), true).unwrap();

        for kind in OperationKind::ALL.iter().filter(|k| k.is_mutating()) {
            for _ in 0..10 {
                assert!(matches!(
                    gate.authorize(*kind),
                    Err(OperatorError::AuthorizationDenied { .. })
                ));
            }
        }
        assert!(gate.authorize(OperationKind::Balance).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_need_a_signer() {
        let gate = OperationGate::new(&config(true, &["*"]), false).unwrap();
        let err = gate.authorize(OperationKind::Transfer).unwrap_err();
        assert!(err.to_string().contains("no signing key"));
        assert!(!gate.write_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn allow_list_restricts_kinds() {
        let gate = OperationGate::new(&config(true, &["balance", "transfer"]), true).unwrap();
        assert!(gate.authorize(OperationKind::Balance).is_ok());
        assert!(gate.authorize(OperationKind::Transfer).is_ok());
        assert!(matches!(
            gate.authorize(OperationKind::Swap),
            Err(OperatorError::AuthorizationDenied { .. })
        ));
        assert!(matches!(
            gate.authorize(OperationKind::Block),
            Err(OperatorError::AuthorizationDenied { .. })
        ));
    }

    #[test]
    fn unknown_allow_list_entry_is_a_config_error() {
        assert!(matches!(
            OperationGate::new(&config(true, &["balance", "teleport"]), true),
            Err(OperatorError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn five_per_second_then_rate_limited() {
        let gate = OperationGate::new(&config(false, &["*"]), false).unwrap();

        for _ in 0..5 {
            gate.authorize(OperationKind::Quote).unwrap();
        }
        match gate.authorize(OperationKind::Quote) {
            Err(OperatorError::RateLimited { retry_after_ms, .. }) => {
                assert!(retry_after_ms > 0 && retry_after_ms <= 1_000)
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(gate.authorize(OperationKind::Quote).is_ok());
    }
}
