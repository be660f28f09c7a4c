//! ERC-1155 calldata encoders

use super::abi::encode_call;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

pub fn balance_of(owner: Address, token_id: U256) -> Bytes {
    encode_call(
        "balanceOf(address,uint256)",
        &[Token::Address(owner), Token::Uint(token_id)],
    )
}

/// Metadata URI template; clients substitute `{id}` themselves
pub fn uri(token_id: U256) -> Bytes {
    encode_call("uri(uint256)", &[Token::Uint(token_id)])
}

pub fn safe_transfer_from(
    from: Address,
    to: Address,
    token_id: U256,
    amount: U256,
    data: Bytes,
) -> Bytes {
    encode_call(
        "safeTransferFrom(address,address,uint256,uint256,bytes)",
        &[
            Token::Address(from),
            Token::Address(to),
            Token::Uint(token_id),
            Token::Uint(amount),
            Token::Bytes(data.to_vec()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{decode, ParamType};

    #[test]
    fn selectors_match_the_standard() {
        assert_eq!(hex::encode(&balance_of(Address::zero(), U256::one())[..4]), "00fdd58e");
        assert_eq!(hex::encode(&uri(U256::one())[..4]), "0e89341c");
    }

    #[test]
    fn safe_transfer_carries_amount_and_empty_data() {
        let to = Address::repeat_byte(0x22);
        let data = safe_transfer_from(
            Address::repeat_byte(0x11),
            to,
            U256::from(3u64),
            U256::from(10u64),
            Bytes::new(),
        );
        assert_eq!(hex::encode(&data[..4]), "f242432a");

        let tokens = decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Bytes,
            ],
            &data[4..],
        )
        .unwrap();
        assert_eq!(tokens[1], Token::Address(to));
        assert_eq!(tokens[3], Token::Uint(U256::from(10u64)));
        assert_eq!(tokens[4], Token::Bytes(Vec::new()));
    }
}
