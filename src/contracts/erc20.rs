//! ERC-20 calldata encoders

use super::abi::encode_call;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

pub fn balance_of(owner: Address) -> Bytes {
    encode_call("balanceOf(address)", &[Token::Address(owner)])
}

pub fn allowance(owner: Address, spender: Address) -> Bytes {
    encode_call(
        "allowance(address,address)",
        &[Token::Address(owner), Token::Address(spender)],
    )
}

pub fn transfer(to: Address, amount: U256) -> Bytes {
    encode_call(
        "transfer(address,uint256)",
        &[Token::Address(to), Token::Uint(amount)],
    )
}

pub fn approve(spender: Address, amount: U256) -> Bytes {
    encode_call(
        "approve(address,uint256)",
        &[Token::Address(spender), Token::Uint(amount)],
    )
}

pub fn name() -> Bytes {
    encode_call("name()", &[])
}

pub fn symbol() -> Bytes {
    encode_call("symbol()", &[])
}

pub fn decimals() -> Bytes {
    encode_call("decimals()", &[])
}

pub fn total_supply() -> Bytes {
    encode_call("totalSupply()", &[])
}

/// EIP-2612 permit nonce of an owner
pub fn nonces(owner: Address) -> Bytes {
    encode_call("nonces(address)", &[Token::Address(owner)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_layout() {
        let to = Address::repeat_byte(0x42);
        let data = transfer(to, U256::from(1_000u64));
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&data[16..36], to.as_bytes());
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(1_000u64));
    }

    #[test]
    fn view_calls_carry_only_a_selector() {
        assert_eq!(decimals().len(), 4);
        assert_eq!(hex::encode(&decimals()[..]), "313ce567");
        assert_eq!(hex::encode(&total_supply()[..]), "18160ddd");
    }
}
