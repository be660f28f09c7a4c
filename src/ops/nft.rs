//! ERC-721 and ERC-1155 handlers

use super::*;
use crate::chain::CallRequest;
use crate::contracts::{abi, erc1155, erc721};
use crate::tx::{IntentKind, TransactionIntent};

use ethers::types::Bytes;

impl OperationDispatcher {
    async fn view(&self, token: Address, data: Bytes) -> OperatorResult<Bytes> {
        self.client.call(&CallRequest::new(token, data), None).await
    }

    pub(super) async fn nft_balance_721(&self, p: NftBalance721Params) -> OperatorResult<OperationOutput> {
        let owner = self.subject(p.owner, "owner")?;
        let raw = self.view(p.token, erc721::balance_of(owner)).await?;

        Ok(OperationOutput::NftBalance(NftBalanceResult {
            token: p.token,
            owner,
            token_id: None,
            balance: abi::decode_uint(&raw)?,
        }))
    }

    pub(super) async fn nft_owner_of(&self, p: NftTokenParams) -> OperatorResult<OperationOutput> {
        let raw = self.view(p.token, erc721::owner_of(p.token_id)).await?;

        Ok(OperationOutput::NftOwner(NftOwnerResult {
            token: p.token,
            token_id: p.token_id,
            owner: abi::decode_address(&raw)?,
        }))
    }

    pub(super) async fn nft_metadata_721(&self, p: NftTokenParams) -> OperatorResult<OperationOutput> {
        let raw = self.view(p.token, erc721::token_uri(p.token_id)).await?;

        Ok(OperationOutput::NftMetadata(NftMetadataResult {
            token: p.token,
            token_id: p.token_id,
            uri: abi::decode_string(&raw)?,
        }))
    }

    pub(super) async fn nft_balance_1155(&self, p: NftBalance1155Params) -> OperatorResult<OperationOutput> {
        let owner = self.subject(p.owner, "owner")?;
        let raw = self
            .view(p.token, erc1155::balance_of(owner, p.token_id))
            .await?;

        Ok(OperationOutput::NftBalance(NftBalanceResult {
            token: p.token,
            owner,
            token_id: Some(p.token_id),
            balance: abi::decode_uint(&raw)?,
        }))
    }

    pub(super) async fn nft_metadata_1155(&self, p: NftTokenParams) -> OperatorResult<OperationOutput> {
        let raw = self.view(p.token, erc1155::uri(p.token_id)).await?;

        Ok(OperationOutput::NftMetadata(NftMetadataResult {
            token: p.token,
            token_id: p.token_id,
            uri: abi::decode_string(&raw)?,
        }))
    }

    /// Moves a token the operator owns
    pub(super) async fn nft_transfer_721(&self, p: NftTransfer721Params) -> OperatorResult<OperationOutput> {
        let from = self.account()?.address();
        let intent = TransactionIntent::new(
            IntentKind::NftTransfer,
            p.token,
            erc721::safe_transfer_from(from, p.to, p.token_id),
        );
        self.submit(intent, p.wait).await
    }

    pub(super) async fn nft_transfer_1155(&self, p: NftTransfer1155Params) -> OperatorResult<OperationOutput> {
        if p.amount.is_zero() {
            return Err(OperatorError::InvalidParams(
                "amount must be greater than zero".to_string(),
            ));
        }
        let from = self.account()?.address();
        let intent = TransactionIntent::new(
            IntentKind::NftTransfer,
            p.token,
            erc1155::safe_transfer_from(from, p.to, p.token_id, p.amount, p.data),
        );
        self.submit(intent, p.wait).await
    }
}
