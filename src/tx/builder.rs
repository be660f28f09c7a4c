//! Unsigned transaction assembly

use super::gas::{GasPrice, GasQuote};
use super::intent::TransactionIntent;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, TransactionRequest, U64};

/// Turns an intent, a nonce and a gas quote into an unsigned transaction
#[derive(Debug, Clone, Copy)]
pub struct TransactionBuilder {
    chain_id: u64,
}

impl TransactionBuilder {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn build(
        &self,
        intent: &TransactionIntent,
        from: Address,
        nonce: u64,
        quote: &GasQuote,
    ) -> TypedTransaction {
        match quote.gas_price {
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(intent.to)
                .data(intent.data.clone())
                .value(intent.value)
                .nonce(nonce)
                .gas(quote.gas_limit)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .chain_id(U64::from(self.chain_id))
                .into(),
            GasPrice::Legacy { gas_price } => TransactionRequest::new()
                .from(from)
                .to(intent.to)
                .data(intent.data.clone())
                .value(intent.value)
                .nonce(nonce)
                .gas(quote.gas_limit)
                .gas_price(gas_price)
                .chain_id(U64::from(self.chain_id))
                .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::intent::IntentKind;
    use chrono::Utc;
    use ethers::types::{Bytes, U256};

    fn quote(gas_price: GasPrice) -> GasQuote {
        GasQuote {
            base_fee: None,
            gas_price,
            estimated_gas: U256::from(40_000u64),
            gas_limit: U256::from(48_000u64),
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn eip1559_fields_are_set() {
        let intent = TransactionIntent::new(
            IntentKind::Approve,
            Address::repeat_byte(9),
            Bytes::from(vec![1, 2, 3]),
        );
        let tx = TransactionBuilder::new(1114).build(
            &intent,
            Address::repeat_byte(5),
            7,
            &quote(GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(30u64),
                max_priority_fee_per_gas: U256::from(2u64),
            }),
        );

        let TypedTransaction::Eip1559(inner) = &tx else {
            panic!("expected an EIP-1559 transaction");
        };
        assert_eq!(inner.nonce, Some(U256::from(7u64)));
        assert_eq!(inner.chain_id, Some(U64::from(1114u64)));
        assert_eq!(inner.max_fee_per_gas, Some(U256::from(30u64)));
        assert_eq!(inner.max_priority_fee_per_gas, Some(U256::from(2u64)));
        assert_eq!(tx.gas(), Some(&U256::from(48_000u64)));
    }

    #[test]
    fn legacy_price_builds_legacy_transaction() {
        let intent = TransactionIntent::native_transfer(Address::repeat_byte(2), U256::from(10u64));
        let tx = TransactionBuilder::new(1).build(
            &intent,
            Address::repeat_byte(5),
            0,
            &quote(GasPrice::Legacy {
                gas_price: U256::from(5u64),
            }),
        );

        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.gas_price(), Some(U256::from(5u64)));
        assert_eq!(tx.value(), Some(&U256::from(10u64)));
    }
}
