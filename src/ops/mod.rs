//! Operation dispatch
//!
//! Inbound `{kind, parameters}` requests are parsed into the closed
//! [`Operation`] enum, authorized by the [`OperationGate`], then routed to the
//! read path or the write path.

mod nft;
pub mod params;
mod read;
mod write;

pub use params::*;

use crate::chain::{BlockSummary, ChainClient, TxReceipt};
use crate::error::{OperatorError, OperatorResult};
use crate::gate::{OperationGate, OperationKind};
use crate::multicall::{BatchResult, MulticallAggregator};
use crate::tx::{GasPolicy, GasQuote, NonceManager, TransactionRecord, TransactionSubmitter};
use crate::wallet::{Account, SignatureParts};

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Raw request as it arrives over the wire
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    pub kind: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Every supported operation with its typed parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", content = "parameters", rename_all = "snake_case")]
pub enum Operation {
    Balance(BalanceParams),
    Allowance(AllowanceParams),
    Quote(QuoteParams),
    Nonce(NonceParams),
    GasEstimate(GasEstimateParams),
    Receipt(ReceiptParams),
    Block(BlockParams),
    TokenMetadata(TokenMetadataParams),
    MulticallRead(MulticallReadParams),
    TransactionStatus(TransactionIdParams),
    WalletInfo(WalletInfoParams),
    #[serde(rename = "nft_balance_721")]
    NftBalance721(NftBalance721Params),
    NftOwnerOf(NftTokenParams),
    #[serde(rename = "nft_metadata_721")]
    NftMetadata721(NftTokenParams),
    #[serde(rename = "nft_balance_1155")]
    NftBalance1155(NftBalance1155Params),
    #[serde(rename = "nft_metadata_1155")]
    NftMetadata1155(NftTokenParams),
    Approve(ApproveParams),
    Transfer(TransferParams),
    Swap(SwapParams),
    PermitSign(PermitSignParams),
    MessageSign(MessageSignParams),
    TypedDataSign(TypedDataSignParams),
    MulticallWrite(MulticallWriteParams),
    CancelTracking(TransactionIdParams),
    #[serde(rename = "nft_transfer_721")]
    NftTransfer721(NftTransfer721Params),
    #[serde(rename = "nft_transfer_1155")]
    NftTransfer1155(NftTransfer1155Params),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Balance(_) => OperationKind::Balance,
            Operation::Allowance(_) => OperationKind::Allowance,
            Operation::Quote(_) => OperationKind::Quote,
            Operation::Nonce(_) => OperationKind::Nonce,
            Operation::GasEstimate(_) => OperationKind::GasEstimate,
            Operation::Receipt(_) => OperationKind::Receipt,
            Operation::Block(_) => OperationKind::Block,
            Operation::TokenMetadata(_) => OperationKind::TokenMetadata,
            Operation::MulticallRead(_) => OperationKind::MulticallRead,
            Operation::TransactionStatus(_) => OperationKind::TransactionStatus,
            Operation::WalletInfo(_) => OperationKind::WalletInfo,
            Operation::NftBalance721(_) => OperationKind::NftBalance721,
            Operation::NftOwnerOf(_) => OperationKind::NftOwnerOf,
            Operation::NftMetadata721(_) => OperationKind::NftMetadata721,
            Operation::NftBalance1155(_) => OperationKind::NftBalance1155,
            Operation::NftMetadata1155(_) => OperationKind::NftMetadata1155,
            Operation::Approve(_) => OperationKind::Approve,
            Operation::Transfer(_) => OperationKind::Transfer,
            Operation::Swap(_) => OperationKind::Swap,
            Operation::PermitSign(_) => OperationKind::PermitSign,
            Operation::MessageSign(_) => OperationKind::MessageSign,
            Operation::TypedDataSign(_) => OperationKind::TypedDataSign,
            Operation::MulticallWrite(_) => OperationKind::MulticallWrite,
            Operation::CancelTracking(_) => OperationKind::CancelTracking,
            Operation::NftTransfer721(_) => OperationKind::NftTransfer721,
            Operation::NftTransfer1155(_) => OperationKind::NftTransfer1155,
        }
    }

    /// Parse a wire request; unknown kinds and malformed parameters are `InvalidParams`
    pub fn parse(request: OperationRequest) -> OperatorResult<Self> {
        let kind: OperationKind = request.kind.parse()?;
        let parameters = match request.parameters {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        serde_json::from_value(serde_json::json!({
            "kind": kind.as_str(),
            "parameters": parameters,
        }))
        .map_err(|e| OperatorError::InvalidParams(format!("{}: {}", kind, e)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResult {
    pub account: Address,
    pub token: Option<Address>,
    #[serde(with = "params::amount")]
    pub balance: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllowanceResult {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "params::amount")]
    pub allowance: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteResult {
    pub router: Address,
    pub path: Vec<Address>,
    #[serde(with = "params::amount")]
    pub amount_in: U256,
    #[serde(with = "params::amount")]
    pub amount_out: U256,
    #[serde(serialize_with = "params::amount::vec::serialize")]
    pub amounts: Vec<U256>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NonceResult {
    pub account: Address,
    pub chain_nonce: u64,
    /// Local view, only for the operator's own account
    pub next_local: Option<u64>,
    pub inflight: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GasEstimateResult {
    pub quote: GasQuote,
    #[serde(with = "params::amount")]
    pub max_cost: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptResult {
    pub tx_hash: H256,
    pub receipt: Option<TxReceipt>,
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenMetadataResult {
    pub token: Address,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    #[serde(serialize_with = "serialize_optional_amount")]
    pub total_supply: Option<U256>,
    pub block_number: Option<u64>,
}

fn serialize_optional_amount<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(v) => serializer.serialize_some(&v.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PermitResult {
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "params::amount")]
    pub value: U256,
    #[serde(with = "params::amount")]
    pub nonce: U256,
    pub deadline: u64,
    #[serde(flatten)]
    pub signature: SignatureParts,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletInfoResult {
    /// Absent in read-only mode
    pub address: Option<Address>,
    pub chain_id: u64,
    pub block_number: u64,
    #[serde(serialize_with = "serialize_optional_amount")]
    pub balance: Option<U256>,
    pub chain_nonce: Option<u64>,
    pub write_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NftBalanceResult {
    pub token: Address,
    pub owner: Address,
    /// Only for ERC-1155 balances
    #[serde(serialize_with = "serialize_optional_amount")]
    pub token_id: Option<U256>,
    #[serde(with = "params::amount")]
    pub balance: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct NftOwnerResult {
    pub token: Address,
    #[serde(with = "params::amount")]
    pub token_id: U256,
    pub owner: Address,
}

#[derive(Debug, Clone, Serialize)]
pub struct NftMetadataResult {
    pub token: Address,
    #[serde(with = "params::amount")]
    pub token_id: U256,
    pub uri: String,
}

/// Successful operation output
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    Balance(BalanceResult),
    Allowance(AllowanceResult),
    Quote(QuoteResult),
    Nonce(NonceResult),
    GasEstimate(GasEstimateResult),
    Receipt(ReceiptResult),
    Block(BlockSummary),
    TokenMetadata(TokenMetadataResult),
    Batch(BatchResult),
    Transaction(Box<TransactionRecord>),
    Permit(PermitResult),
    Signature(SignatureParts),
    WalletInfo(WalletInfoResult),
    NftBalance(NftBalanceResult),
    NftOwner(NftOwnerResult),
    NftMetadata(NftMetadataResult),
}

/// Routes authorized operations to the read or write path
pub struct OperationDispatcher {
    client: Arc<dyn ChainClient>,
    gate: OperationGate,
    multicall: MulticallAggregator,
    gas: Arc<GasPolicy>,
    nonces: Arc<NonceManager>,
    account: Option<Account>,
    submitter: Option<TransactionSubmitter>,
    router: Option<Address>,
    wait_timeout: Duration,
}

impl OperationDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChainClient>,
        gate: OperationGate,
        multicall: MulticallAggregator,
        gas: Arc<GasPolicy>,
        nonces: Arc<NonceManager>,
        account: Option<Account>,
        submitter: Option<TransactionSubmitter>,
        router: Option<Address>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            multicall,
            gas,
            nonces,
            account,
            submitter,
            router,
            wait_timeout,
        }
    }

    /// Parse, authorize and execute a wire request
    pub async fn dispatch(&self, request: OperationRequest) -> OperatorResult<OperationOutput> {
        let operation = Operation::parse(request)?;
        self.execute(operation).await
    }

    /// Authorize and execute a typed operation
    pub async fn execute(&self, operation: Operation) -> OperatorResult<OperationOutput> {
        let kind = operation.kind();
        self.gate.authorize(kind)?;
        debug!(operation = %kind, "Dispatching operation");

        let started = std::time::Instant::now();
        let result = match operation {
            Operation::Balance(p) => self.balance(p).await,
            Operation::Allowance(p) => self.allowance(p).await,
            Operation::Quote(p) => self.quote(p).await,
            Operation::Nonce(p) => self.nonce(p).await,
            Operation::GasEstimate(p) => self.gas_estimate(p).await,
            Operation::Receipt(p) => self.receipt(p).await,
            Operation::Block(p) => self.block(p).await,
            Operation::TokenMetadata(p) => self.token_metadata(p).await,
            Operation::MulticallRead(p) => self.multicall_read(p).await,
            Operation::TransactionStatus(p) => self.transaction_status(p),
            Operation::WalletInfo(_) => self.wallet_info().await,
            Operation::NftBalance721(p) => self.nft_balance_721(p).await,
            Operation::NftOwnerOf(p) => self.nft_owner_of(p).await,
            Operation::NftMetadata721(p) => self.nft_metadata_721(p).await,
            Operation::NftBalance1155(p) => self.nft_balance_1155(p).await,
            Operation::NftMetadata1155(p) => self.nft_metadata_1155(p).await,
            Operation::Approve(p) => self.approve(p).await,
            Operation::Transfer(p) => self.transfer(p).await,
            Operation::Swap(p) => self.swap(p).await,
            Operation::PermitSign(p) => self.permit_sign(p).await,
            Operation::MessageSign(p) => self.message_sign(p).await,
            Operation::TypedDataSign(p) => self.typed_data_sign(p).await,
            Operation::MulticallWrite(p) => self.multicall_write(p).await,
            Operation::CancelTracking(p) => self.cancel_tracking(p).await,
            Operation::NftTransfer721(p) => self.nft_transfer_721(p).await,
            Operation::NftTransfer1155(p) => self.nft_transfer_1155(p).await,
        };

        crate::metrics::record_operation(
            kind.as_str(),
            result.as_ref().map(|_| "ok").unwrap_or_else(|e| e.kind()),
            started.elapsed().as_secs_f64(),
        );
        if kind.is_mutating() {
            match &result {
                Ok(_) => info!(operation = %kind, "Write operation completed"),
                Err(e) => info!(operation = %kind, error_kind = e.kind(), "Write operation failed: {}", e),
            }
        }
        result
    }

    fn account(&self) -> OperatorResult<&Account> {
        self.account.as_ref().ok_or_else(|| OperatorError::AuthorizationDenied {
            operation: "sign".to_string(),
            reason: "no signing key configured".to_string(),
        })
    }

    fn submitter(&self) -> OperatorResult<&TransactionSubmitter> {
        self.submitter
            .as_ref()
            .ok_or_else(|| OperatorError::AuthorizationDenied {
                operation: "submit".to_string(),
                reason: "no signing key configured".to_string(),
            })
    }

    /// Operator address if a key is loaded
    pub fn operator_address(&self) -> Option<Address> {
        self.account.as_ref().map(|a| a.address())
    }

    pub fn write_enabled(&self) -> bool {
        self.gate.write_enabled()
    }
}
