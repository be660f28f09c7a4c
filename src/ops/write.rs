//! Write-path handlers: submissions and signatures

use super::read::sub_calls;
use super::*;
use crate::chain::CallRequest;
use crate::contracts::{abi, erc20, router};
use crate::multicall::{Aggregated, BatchMode};
use crate::tx::{IntentKind, TransactionIntent};
use crate::wallet::PermitRequest;

/// Swap deadline offset when the caller gives none
const DEFAULT_DEADLINE_SECS: i64 = 20 * 60;

impl OperationDispatcher {
    /// Submit, optionally blocking until the record is terminal.
    /// A wait that runs out surfaces as `Unsettled`, never as a retriable error.
    pub(super) async fn submit(&self, intent: TransactionIntent, wait: bool) -> OperatorResult<OperationOutput> {
        let submitter = self.submitter()?;
        let record = submitter.submit(intent).await?;

        let record = if wait {
            submitter.wait(record.id, self.wait_timeout).await?.into_result()?
        } else {
            record
        };
        Ok(OperationOutput::Transaction(Box::new(record)))
    }

    pub(super) async fn approve(&self, p: ApproveParams) -> OperatorResult<OperationOutput> {
        let intent = TransactionIntent::new(
            IntentKind::Approve,
            p.token,
            erc20::approve(p.spender, p.amount),
        );
        self.submit(intent, p.wait).await
    }

    pub(super) async fn transfer(&self, p: TransferParams) -> OperatorResult<OperationOutput> {
        let intent = match non_zero(p.token) {
            None => TransactionIntent::native_transfer(p.to, p.amount),
            Some(token) => TransactionIntent::new(
                IntentKind::Transfer,
                token,
                erc20::transfer(p.to, p.amount),
            ),
        };
        self.submit(intent, p.wait).await
    }

    pub(super) async fn swap(&self, p: SwapParams) -> OperatorResult<OperationOutput> {
        let router_address = self.resolve_router(p.router)?;
        if p.path.len() < 2 {
            return Err(OperatorError::InvalidParams(
                "path needs at least two tokens".to_string(),
            ));
        }
        let recipient = match p.recipient {
            Some(r) => r,
            None => self.account()?.address(),
        };
        let deadline = p
            .deadline
            .unwrap_or_else(|| deadline_from_now(DEFAULT_DEADLINE_SECS));

        let data = router::swap_exact_tokens_for_tokens(
            p.amount_in,
            p.amount_out_min.unwrap_or_else(U256::one),
            &p.path,
            recipient,
            U256::from(deadline),
        );
        let intent = TransactionIntent::new(IntentKind::Swap, router_address, data);
        self.submit(intent, p.wait).await
    }

    pub(super) async fn multicall_write(&self, p: MulticallWriteParams) -> OperatorResult<OperationOutput> {
        match self.multicall.aggregate(&sub_calls(p.calls), BatchMode::Write).await? {
            Aggregated::Write(intent) => self.submit(intent, p.wait).await,
            Aggregated::Read(_) => Err(OperatorError::Internal(
                "write batch produced a read result".to_string(),
            )),
        }
    }

    pub(super) async fn cancel_tracking(&self, p: TransactionIdParams) -> OperatorResult<OperationOutput> {
        let record = self.submitter()?.cancel_tracking(p.id).await?;
        Ok(OperationOutput::Transaction(Box::new(record)))
    }

    pub(super) async fn permit_sign(&self, p: PermitSignParams) -> OperatorResult<OperationOutput> {
        let account = self.account()?;
        let owner = account.address();

        let token_name = match p.token_name {
            Some(name) => name,
            None => {
                let raw = self
                    .client
                    .call(&CallRequest::new(p.token, erc20::name()), None)
                    .await?;
                abi::decode_string(&raw)?
            }
        };
        let nonce = match p.nonce {
            Some(nonce) => nonce,
            None => {
                let raw = self
                    .client
                    .call(&CallRequest::new(p.token, erc20::nonces(owner)), None)
                    .await?;
                abi::decode_uint(&raw)?
            }
        };
        let deadline = p
            .deadline
            .unwrap_or_else(|| deadline_from_now(DEFAULT_DEADLINE_SECS));

        let permit = PermitRequest {
            token: p.token,
            token_name,
            version: p.version.unwrap_or_else(|| "1".to_string()),
            spender: p.spender,
            value: p.value,
            nonce,
            deadline: U256::from(deadline),
        };
        let signature = account.sign_permit(&permit).await?;

        Ok(OperationOutput::Permit(PermitResult {
            owner,
            spender: p.spender,
            value: p.value,
            nonce,
            deadline,
            signature,
        }))
    }

    pub(super) async fn message_sign(&self, p: MessageSignParams) -> OperatorResult<OperationOutput> {
        let message = if p.hex {
            hex::decode(p.message.trim_start_matches("0x"))
                .map_err(|e| OperatorError::InvalidParams(format!("invalid hex message: {}", e)))?
        } else {
            p.message.into_bytes()
        };
        let signature = self.account()?.sign_message(&message).await?;
        Ok(OperationOutput::Signature(signature))
    }

    pub(super) async fn typed_data_sign(&self, p: TypedDataSignParams) -> OperatorResult<OperationOutput> {
        let signature = self.account()?.sign_typed_data(&p.typed_data).await?;
        Ok(OperationOutput::Signature(signature))
    }
}
