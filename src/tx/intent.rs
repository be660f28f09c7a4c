//! Transaction intents: what a caller wants executed, before nonce and gas

use crate::chain::CallRequest;

use ethers::types::{Address, Bytes, U256};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    NativeTransfer,
    Transfer,
    Approve,
    Swap,
    Multicall,
    NftTransfer,
    Raw,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentKind::NativeTransfer => "native_transfer",
            IntentKind::Transfer => "transfer",
            IntentKind::Approve => "approve",
            IntentKind::Swap => "swap",
            IntentKind::Multicall => "multicall",
            IntentKind::NftTransfer => "nft_transfer",
            IntentKind::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// A state change to be signed and submitted once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionIntent {
    pub kind: IntentKind,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Extra gas added on top of the buffered estimate
    pub gas_headroom: U256,
}

impl TransactionIntent {
    pub fn new(kind: IntentKind, to: Address, data: Bytes) -> Self {
        Self {
            kind,
            to,
            data,
            value: U256::zero(),
            gas_headroom: U256::zero(),
        }
    }

    pub fn native_transfer(to: Address, value: U256) -> Self {
        Self::new(IntentKind::NativeTransfer, to, Bytes::new()).with_value(value)
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_headroom(mut self, headroom: U256) -> Self {
        self.gas_headroom = headroom;
        self
    }

    /// Simulation request for this intent from `from`
    pub fn call_request(&self, from: Address) -> CallRequest {
        CallRequest::new(self.to, self.data.clone())
            .from(from)
            .value(self.value)
    }
}
