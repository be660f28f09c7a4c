//! Inbound parameter types and lenient amount handling

use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Deserializer, Serializer};
use uuid::Uuid;

/// Amounts: decimal strings, `0x` hex strings or JSON integers
pub mod amount {
    use super::*;
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub fn parse(raw: &str) -> Result<U256, String> {
        let raw = raw.trim().replace('_', "");
        if raw.is_empty() {
            return Err("empty amount".to_string());
        }
        match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("invalid hex amount: {}", e)),
            None => U256::from_dec_str(&raw).map_err(|e| format!("invalid decimal amount: {}", e)),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(U256::from(value)),
            Raw::Str(value) => parse(&value).map_err(D::Error::custom),
        }
    }

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(Raw::Int(value)) => Ok(Some(U256::from(value))),
                Some(Raw::Str(value)) => parse(&value).map(Some).map_err(D::Error::custom),
            }
        }
    }

    pub mod vec {
        use super::*;

        pub fn serialize<S>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(values.iter().map(|v| v.to_string()))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BalanceParams {
    /// Defaults to the operator account
    pub account: Option<Address>,
    /// Native balance when absent or the zero address
    pub token: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowanceParams {
    pub token: Address,
    pub owner: Option<Address>,
    pub spender: Address,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuoteParams {
    #[serde(with = "amount")]
    pub amount_in: U256,
    pub path: Vec<Address>,
    pub router: Option<Address>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonceParams {
    pub account: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GasEstimateParams {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default, deserialize_with = "amount::option::deserialize")]
    pub value: Option<U256>,
    pub from: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptParams {
    pub tx_hash: H256,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockParams {
    /// Latest block when absent
    pub number: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenMetadataParams {
    pub token: Address,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallParams {
    pub target: Address,
    pub data: Bytes,
    #[serde(default, deserialize_with = "amount::option::deserialize")]
    pub value: Option<U256>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MulticallReadParams {
    pub calls: Vec<CallParams>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionIdParams {
    pub id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveParams {
    pub token: Address,
    pub spender: Address,
    #[serde(with = "amount")]
    pub amount: U256,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferParams {
    pub to: Address,
    #[serde(with = "amount")]
    pub amount: U256,
    /// Native transfer when absent or the zero address
    pub token: Option<Address>,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapParams {
    #[serde(with = "amount")]
    pub amount_in: U256,
    #[serde(default, deserialize_with = "amount::option::deserialize")]
    pub amount_out_min: Option<U256>,
    pub path: Vec<Address>,
    pub recipient: Option<Address>,
    /// Unix seconds; defaults to twenty minutes from now
    pub deadline: Option<u64>,
    pub router: Option<Address>,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermitSignParams {
    pub token: Address,
    pub spender: Address,
    #[serde(with = "amount")]
    pub value: U256,
    /// Read from the token when absent
    pub token_name: Option<String>,
    pub version: Option<String>,
    #[serde(default, deserialize_with = "amount::option::deserialize")]
    pub nonce: Option<U256>,
    pub deadline: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageSignParams {
    pub message: String,
    /// Treat `message` as hex-encoded bytes
    #[serde(default)]
    pub hex: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypedDataSignParams {
    pub typed_data: TypedData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MulticallWriteParams {
    pub calls: Vec<CallParams>,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletInfoParams {}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NftBalance721Params {
    pub token: Address,
    /// Defaults to the operator account
    pub owner: Option<Address>,
}

/// A single token of an ERC-721 or ERC-1155 collection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NftTokenParams {
    pub token: Address,
    #[serde(with = "amount")]
    pub token_id: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NftBalance1155Params {
    pub token: Address,
    pub owner: Option<Address>,
    #[serde(with = "amount")]
    pub token_id: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NftTransfer721Params {
    pub token: Address,
    pub to: Address,
    #[serde(with = "amount")]
    pub token_id: U256,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NftTransfer1155Params {
    pub token: Address,
    pub to: Address,
    #[serde(with = "amount")]
    pub token_id: U256,
    #[serde(with = "amount")]
    pub amount: U256,
    /// Forwarded to the receiver hook
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub wait: bool,
}

/// Deadline `offset_secs` from now, in unix seconds
pub fn deadline_from_now(offset_secs: i64) -> u64 {
    (chrono::Utc::now().timestamp() + offset_secs).max(0) as u64
}

/// Zero address means "no token" in callers' vocabulary
pub fn non_zero(token: Option<Address>) -> Option<Address> {
    token.filter(|t| !t.is_zero())
}
