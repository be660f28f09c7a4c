//! Signing account backed by a local private key

use crate::error::{OperatorError, OperatorResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::info;

/// EIP-2612 permit to be signed by the account
#[derive(Debug, Clone)]
pub struct PermitRequest {
    pub token: Address,
    pub token_name: String,
    pub version: String,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: U256,
}

/// Signature in the shape contracts and callers consume
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureParts {
    pub signer: Address,
    pub signature: String,
    pub v: u64,
    pub r: H256,
    pub s: H256,
}

impl SignatureParts {
    fn new(signer: Address, signature: Signature) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        Self {
            signer,
            signature: format!("0x{}", signature),
            v: signature.v,
            r: H256::from(r),
            s: H256::from(s),
        }
    }
}

/// Address plus exclusive signing capability
#[derive(Clone)]
pub struct Account {
    wallet: LocalWallet,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.wallet.address())
            .field("chain_id", &self.wallet.chain_id())
            .finish()
    }
}

impl Account {
    pub fn from_private_key(key: &str, chain_id: u64) -> OperatorResult<Self> {
        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| OperatorError::Wallet(format!("Invalid private key: {}", e)))?;
        Ok(Self {
            wallet: wallet.with_chain_id(chain_id),
        })
    }

    /// Load the key from the named environment variable; `None` when unset
    pub fn from_env(var: &str, chain_id: u64) -> OperatorResult<Option<Self>> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => {
                let account = Self::from_private_key(&key, chain_id)?;
                info!(address = ?account.address(), "Loaded signing account");
                Ok(Some(account))
            }
            _ => Ok(None),
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign and RLP-encode a transaction for broadcast
    pub async fn sign_transaction(&self, tx: &TypedTransaction) -> OperatorResult<Bytes> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| OperatorError::Wallet(format!("Failed to sign transaction: {}", e)))?;
        Ok(tx.rlp_signed(&signature))
    }

    /// EIP-191 personal message signature
    pub async fn sign_message(&self, message: &[u8]) -> OperatorResult<SignatureParts> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .map_err(|e| OperatorError::Wallet(format!("Failed to sign message: {}", e)))?;
        Ok(SignatureParts::new(self.address(), signature))
    }

    /// EIP-712 typed data signature
    pub async fn sign_typed_data(&self, typed: &TypedData) -> OperatorResult<SignatureParts> {
        let signature = self
            .wallet
            .sign_typed_data(typed)
            .await
            .map_err(|e| OperatorError::Wallet(format!("Failed to sign typed data: {}", e)))?;
        Ok(SignatureParts::new(self.address(), signature))
    }

    /// EIP-2612 permit signature; nothing is broadcast
    pub async fn sign_permit(&self, permit: &PermitRequest) -> OperatorResult<SignatureParts> {
        let typed = permit_typed_data(permit, self.address(), self.wallet.chain_id())?;
        self.sign_typed_data(&typed).await
    }
}

/// Typed data for an EIP-2612 `Permit`
pub fn permit_typed_data(
    permit: &PermitRequest,
    owner: Address,
    chain_id: u64,
) -> OperatorResult<TypedData> {
    let value = json!({
        "types": {
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"}
            ],
            "Permit": [
                {"name": "owner", "type": "address"},
                {"name": "spender", "type": "address"},
                {"name": "value", "type": "uint256"},
                {"name": "nonce", "type": "uint256"},
                {"name": "deadline", "type": "uint256"}
            ]
        },
        "primaryType": "Permit",
        "domain": {
            "name": permit.token_name,
            "version": permit.version,
            "chainId": chain_id,
            "verifyingContract": format!("{:?}", permit.token)
        },
        "message": {
            "owner": format!("{:?}", owner),
            "spender": format!("{:?}", permit.spender),
            "value": permit.value.to_string(),
            "nonce": permit.nonce.to_string(),
            "deadline": permit.deadline.to_string()
        }
    });

    serde_json::from_value(value)
        .map_err(|e| OperatorError::Internal(format!("Failed to build permit typed data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::transaction::eip712::Eip712;
    use ethers::types::TransactionRequest;

    // Well-known development key, never funded on a real network
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn account() -> Account {
        Account::from_private_key(DEV_KEY, 1).unwrap()
    }

    #[test]
    fn derives_expected_address() {
        assert_eq!(
            format!("{:?}", account().address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn rejects_garbage_key() {
        assert!(matches!(
            Account::from_private_key("not-a-key", 1),
            Err(OperatorError::Wallet(_))
        ));
    }

    #[tokio::test]
    async fn message_signature_recovers_signer() {
        let account = account();
        let parts = account.sign_message(b"hello operator").await.unwrap();
        let signature: Signature = parts.signature.trim_start_matches("0x").parse().unwrap();
        assert_eq!(signature.recover("hello operator").unwrap(), account.address());
        assert!(parts.v == 27 || parts.v == 28);
    }

    #[tokio::test]
    async fn permit_signature_recovers_owner() {
        let account = account();
        let permit = PermitRequest {
            token: Address::repeat_byte(0xaa),
            token_name: "Test Token".to_string(),
            version: "1".to_string(),
            spender: Address::repeat_byte(0xbb),
            value: U256::from(1_000u64),
            nonce: U256::zero(),
            deadline: U256::from(1_900_000_000u64),
        };

        let parts = account.sign_permit(&permit).await.unwrap();
        let typed = permit_typed_data(&permit, account.address(), 1).unwrap();
        let digest = typed.encode_eip712().unwrap();
        let signature: Signature = parts.signature.trim_start_matches("0x").parse().unwrap();

        assert_eq!(signature.recover(digest).unwrap(), account.address());
    }

    #[tokio::test]
    async fn signed_transaction_is_rlp_encoded() {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(Address::repeat_byte(1))
            .value(1u64)
            .nonce(0u64)
            .gas(21_000u64)
            .gas_price(1u64)
            .chain_id(1u64)
            .into();
        let raw = account().sign_transaction(&tx).await.unwrap();
        assert!(!raw.is_empty());
    }
}
