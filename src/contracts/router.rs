//! Uniswap-V2 style router encoders

use super::abi::{decode_output, encode_call};
use crate::error::{OperatorError, OperatorResult};

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, U256};

pub fn get_amounts_out(amount_in: U256, path: &[Address]) -> Bytes {
    encode_call(
        "getAmountsOut(uint256,address[])",
        &[Token::Uint(amount_in), address_array(path)],
    )
}

/// Decode the `uint256[]` returned by `getAmountsOut`
pub fn decode_amounts(data: &[u8]) -> OperatorResult<Vec<U256>> {
    let tokens = decode_output(&[ParamType::Array(Box::new(ParamType::Uint(256)))], data)?;
    match tokens.into_iter().next() {
        Some(Token::Array(items)) => items
            .into_iter()
            .map(|t| match t {
                Token::Uint(v) => Ok(v),
                other => Err(OperatorError::Internal(format!(
                    "unexpected token in amounts: {:?}",
                    other
                ))),
            })
            .collect(),
        _ => Err(OperatorError::Internal("empty getAmountsOut result".to_string())),
    }
}

pub fn swap_exact_tokens_for_tokens(
    amount_in: U256,
    amount_out_min: U256,
    path: &[Address],
    to: Address,
    deadline: U256,
) -> Bytes {
    encode_call(
        "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
        &[
            Token::Uint(amount_in),
            Token::Uint(amount_out_min),
            address_array(path),
            Token::Address(to),
            Token::Uint(deadline),
        ],
    )
}

fn address_array(path: &[Address]) -> Token {
    Token::Array(path.iter().copied().map(Token::Address).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;

    #[test]
    fn swap_selector() {
        let path = [Address::repeat_byte(1), Address::repeat_byte(2)];
        let data = swap_exact_tokens_for_tokens(
            U256::from(10u64),
            U256::one(),
            &path,
            Address::repeat_byte(3),
            U256::from(1_700_000_000u64),
        );
        assert_eq!(hex::encode(&data[..4]), "38ed1739");
    }

    #[test]
    fn amounts_decode() {
        let data = encode(&[Token::Array(vec![
            Token::Uint(U256::from(100u64)),
            Token::Uint(U256::from(95u64)),
        ])]);
        let amounts = decode_amounts(&data).unwrap();
        assert_eq!(amounts, vec![U256::from(100u64), U256::from(95u64)]);
        assert_eq!(hex::encode(&get_amounts_out(U256::one(), &[])[..4]), "d06ca61f");
    }
}
