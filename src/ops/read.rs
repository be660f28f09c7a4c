//! Read-path handlers

use super::*;
use crate::chain::{CallRequest, FinalityTracker};
use crate::contracts::{abi, erc20, router};
use crate::multicall::{Aggregated, BatchMode, SubCall};
use crate::tx::{IntentKind, TransactionIntent};

use ethers::types::BlockNumber;

impl OperationDispatcher {
    /// Explicit address, else the operator account
    pub(super) fn subject(&self, explicit: Option<Address>, field: &str) -> OperatorResult<Address> {
        explicit.or_else(|| self.operator_address()).ok_or_else(|| {
            OperatorError::InvalidParams(format!(
                "{} is required when no signing key is configured",
                field
            ))
        })
    }

    pub(super) fn resolve_router(&self, explicit: Option<Address>) -> OperatorResult<Address> {
        explicit
            .or(self.router)
            .ok_or_else(|| OperatorError::InvalidParams("no router address given or configured".to_string()))
    }

    pub(super) async fn balance(&self, p: BalanceParams) -> OperatorResult<OperationOutput> {
        let account = self.subject(p.account, "account")?;
        let token = non_zero(p.token);

        let balance = match token {
            None => self.client.get_balance(account).await?,
            Some(token) => {
                let raw = self
                    .client
                    .call(&CallRequest::new(token, erc20::balance_of(account)), None)
                    .await?;
                abi::decode_uint(&raw)?
            }
        };

        Ok(OperationOutput::Balance(BalanceResult {
            account,
            token,
            balance,
        }))
    }

    pub(super) async fn allowance(&self, p: AllowanceParams) -> OperatorResult<OperationOutput> {
        let owner = self.subject(p.owner, "owner")?;
        let raw = self
            .client
            .call(&CallRequest::new(p.token, erc20::allowance(owner, p.spender)), None)
            .await?;

        Ok(OperationOutput::Allowance(AllowanceResult {
            token: p.token,
            owner,
            spender: p.spender,
            allowance: abi::decode_uint(&raw)?,
        }))
    }

    pub(super) async fn quote(&self, p: QuoteParams) -> OperatorResult<OperationOutput> {
        let router_address = self.resolve_router(p.router)?;
        if p.path.len() < 2 {
            return Err(OperatorError::InvalidParams(
                "path needs at least two tokens".to_string(),
            ));
        }

        let raw = self
            .client
            .call(
                &CallRequest::new(router_address, router::get_amounts_out(p.amount_in, &p.path)),
                None,
            )
            .await?;
        let amounts = router::decode_amounts(&raw)?;
        let amount_out = amounts.last().copied().unwrap_or_default();

        Ok(OperationOutput::Quote(QuoteResult {
            router: router_address,
            path: p.path,
            amount_in: p.amount_in,
            amount_out,
            amounts,
        }))
    }

    pub(super) async fn nonce(&self, p: NonceParams) -> OperatorResult<OperationOutput> {
        let account = self.subject(p.account, "account")?;
        let chain_nonce = self.client.get_nonce(account).await?;

        let (next_local, inflight) = if Some(account) == self.operator_address() {
            (
                self.nonces.next_sequence(account).await,
                self.nonces.inflight(account).await,
            )
        } else {
            (None, Vec::new())
        };

        Ok(OperationOutput::Nonce(NonceResult {
            account,
            chain_nonce,
            next_local,
            inflight,
        }))
    }

    pub(super) async fn gas_estimate(&self, p: GasEstimateParams) -> OperatorResult<OperationOutput> {
        let from = p.from.or_else(|| self.operator_address()).unwrap_or_default();
        let intent = TransactionIntent::new(IntentKind::Raw, p.to, p.data)
            .with_value(p.value.unwrap_or_default());

        let quote = self.gas.quote(&intent, from).await?;
        Ok(OperationOutput::GasEstimate(GasEstimateResult {
            max_cost: quote.max_cost(),
            quote,
        }))
    }

    pub(super) async fn receipt(&self, p: ReceiptParams) -> OperatorResult<OperationOutput> {
        let receipt = self.client.get_receipt(p.tx_hash).await?;
        let confirmations = match &receipt {
            Some(r) => {
                let head = self.client.block_number().await?;
                Some(FinalityTracker::depth(r.block_number, head))
            }
            None => None,
        };

        Ok(OperationOutput::Receipt(ReceiptResult {
            tx_hash: p.tx_hash,
            receipt,
            confirmations,
        }))
    }

    pub(super) async fn block(&self, p: BlockParams) -> OperatorResult<OperationOutput> {
        let number = p
            .number
            .map(|n| BlockNumber::Number(n.into()))
            .unwrap_or(BlockNumber::Latest);

        self.client
            .get_block(number)
            .await?
            .map(OperationOutput::Block)
            .ok_or_else(|| OperatorError::InvalidParams(format!("block {:?} not found", number)))
    }

    pub(super) async fn token_metadata(&self, p: TokenMetadataParams) -> OperatorResult<OperationOutput> {
        let batch = [
            SubCall::new(p.token, erc20::name()),
            SubCall::new(p.token, erc20::symbol()),
            SubCall::new(p.token, erc20::decimals()),
            SubCall::new(p.token, erc20::total_supply()),
        ];
        let result = self.multicall.read(&batch).await?;
        let slot = |i: usize| result.results.get(i).and_then(|s| s.data());

        Ok(OperationOutput::TokenMetadata(TokenMetadataResult {
            token: p.token,
            name: slot(0).and_then(|d| abi::decode_string(d).ok()),
            symbol: slot(1).and_then(|d| abi::decode_string(d).ok()),
            decimals: slot(2)
                .and_then(|d| abi::decode_uint(d).ok())
                .filter(|v| *v <= U256::from(u8::MAX))
                .map(|v| v.as_u32() as u8),
            total_supply: slot(3).and_then(|d| abi::decode_uint(d).ok()),
            block_number: result.block_number,
        }))
    }

    pub(super) async fn multicall_read(&self, p: MulticallReadParams) -> OperatorResult<OperationOutput> {
        match self.multicall.aggregate(&sub_calls(p.calls), BatchMode::Read).await? {
            Aggregated::Read(result) => Ok(OperationOutput::Batch(result)),
            Aggregated::Write(_) => Err(OperatorError::Internal(
                "read batch produced a write intent".to_string(),
            )),
        }
    }

    pub(super) fn transaction_status(&self, p: TransactionIdParams) -> OperatorResult<OperationOutput> {
        let submitter = self
            .submitter
            .as_ref()
            .ok_or_else(|| OperatorError::TransactionNotFound {
                tx_id: p.id.to_string(),
            })?;
        Ok(OperationOutput::Transaction(Box::new(submitter.status(p.id)?)))
    }

    /// Operator identity plus its native balance and mined nonce
    pub(super) async fn wallet_info(&self) -> OperatorResult<OperationOutput> {
        let address = self.operator_address();
        let block_number = self.client.block_number().await?;

        let (balance, chain_nonce) = match address {
            Some(address) => (
                Some(self.client.get_balance(address).await?),
                Some(self.client.get_nonce(address).await?),
            ),
            None => (None, None),
        };

        Ok(OperationOutput::WalletInfo(WalletInfoResult {
            address,
            chain_id: self.client.chain_id(),
            block_number,
            balance,
            chain_nonce,
            write_enabled: self.write_enabled(),
        }))
    }
}

pub(super) fn sub_calls(calls: Vec<CallParams>) -> Vec<SubCall> {
    calls
        .into_iter()
        .map(|c| SubCall {
            target: c.target,
            data: c.data,
            value: c.value.unwrap_or_default(),
        })
        .collect()
}
