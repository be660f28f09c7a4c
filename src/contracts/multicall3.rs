//! Multicall3 encoders and decoders

use super::abi::{decode_output, encode_call};
use crate::error::{OperatorError, OperatorResult};

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};

/// Canonical Multicall3 deployment address, identical on most chains
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Outcome of `tryBlockAndAggregate`
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutput {
    pub block_number: u64,
    pub block_hash: H256,
    pub results: Vec<(bool, Bytes)>,
}

pub fn try_block_and_aggregate(require_success: bool, calls: &[(Address, Bytes)]) -> Bytes {
    let calls = calls
        .iter()
        .map(|(target, data)| Token::Tuple(vec![Token::Address(*target), Token::Bytes(data.to_vec())]))
        .collect();
    encode_call(
        "tryBlockAndAggregate(bool,(address,bytes)[])",
        &[Token::Bool(require_success), Token::Array(calls)],
    )
}

pub fn decode_try_block_and_aggregate(data: &[u8]) -> OperatorResult<AggregateOutput> {
    let result_type = ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Bool,
        ParamType::Bytes,
    ])));
    let mut tokens = decode_output(
        &[ParamType::Uint(256), ParamType::FixedBytes(32), result_type],
        data,
    )?
    .into_iter();

    let (Some(Token::Uint(number)), Some(Token::FixedBytes(hash)), Some(Token::Array(items))) =
        (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(OperatorError::Internal("malformed aggregate result".to_string()));
    };

    let results = items
        .into_iter()
        .map(|item| match item {
            Token::Tuple(mut fields) if fields.len() == 2 => {
                match (fields.remove(0), fields.remove(0)) {
                    (Token::Bool(ok), Token::Bytes(ret)) => Ok((ok, Bytes::from(ret))),
                    _ => Err(OperatorError::Internal("malformed aggregate slot".to_string())),
                }
            }
            _ => Err(OperatorError::Internal("malformed aggregate slot".to_string())),
        })
        .collect::<OperatorResult<Vec<_>>>()?;

    Ok(AggregateOutput {
        block_number: number.low_u64(),
        block_hash: H256::from_slice(&hash),
        results,
    })
}

/// `aggregate3` with every sub-call required to succeed
pub fn aggregate3(calls: &[(Address, Bytes)]) -> Bytes {
    let calls = calls
        .iter()
        .map(|(target, data)| {
            Token::Tuple(vec![
                Token::Address(*target),
                Token::Bool(false),
                Token::Bytes(data.to_vec()),
            ])
        })
        .collect();
    encode_call("aggregate3((address,bool,bytes)[])", &[Token::Array(calls)])
}

/// `aggregate3Value`; the transaction value must equal the sum of the slots
pub fn aggregate3_value(calls: &[(Address, U256, Bytes)]) -> Bytes {
    let calls = calls
        .iter()
        .map(|(target, value, data)| {
            Token::Tuple(vec![
                Token::Address(*target),
                Token::Bool(false),
                Token::Uint(*value),
                Token::Bytes(data.to_vec()),
            ])
        })
        .collect();
    encode_call(
        "aggregate3Value((address,bool,uint256,bytes)[])",
        &[Token::Array(calls)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;

    #[test]
    fn selectors_match_deployed_contract() {
        assert_eq!(hex::encode(&try_block_and_aggregate(false, &[])[..4]), "399542e9");
        assert_eq!(hex::encode(&aggregate3(&[])[..4]), "82ad56cb");
        assert_eq!(hex::encode(&aggregate3_value(&[])[..4]), "174dea71");
    }

    #[test]
    fn decodes_mixed_results() {
        let data = encode(&[
            Token::Uint(U256::from(1234u64)),
            Token::FixedBytes(vec![0xaa; 32]),
            Token::Array(vec![
                Token::Tuple(vec![Token::Bool(true), Token::Bytes(vec![1, 2])]),
                Token::Tuple(vec![Token::Bool(false), Token::Bytes(vec![])]),
            ]),
        ]);
        let output = decode_try_block_and_aggregate(&data).unwrap();
        assert_eq!(output.block_number, 1234);
        assert_eq!(output.block_hash, H256::repeat_byte(0xaa));
        assert_eq!(output.results.len(), 2);
        assert!(output.results[0].0);
        assert!(!output.results[1].0);
    }
}
