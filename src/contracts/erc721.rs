//! ERC-721 calldata encoders

use super::abi::encode_call;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

pub fn balance_of(owner: Address) -> Bytes {
    encode_call("balanceOf(address)", &[Token::Address(owner)])
}

pub fn owner_of(token_id: U256) -> Bytes {
    encode_call("ownerOf(uint256)", &[Token::Uint(token_id)])
}

pub fn token_uri(token_id: U256) -> Bytes {
    encode_call("tokenURI(uint256)", &[Token::Uint(token_id)])
}

/// Three-argument form; the receiver hook runs when `to` is a contract
pub fn safe_transfer_from(from: Address, to: Address, token_id: U256) -> Bytes {
    encode_call(
        "safeTransferFrom(address,address,uint256)",
        &[Token::Address(from), Token::Address(to), Token::Uint(token_id)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_the_standard() {
        assert_eq!(hex::encode(&owner_of(U256::one())[..4]), "6352211e");
        assert_eq!(hex::encode(&token_uri(U256::one())[..4]), "c87b56dd");
        assert_eq!(
            hex::encode(&safe_transfer_from(Address::zero(), Address::zero(), U256::one())[..4]),
            "42842e0e"
        );
    }

    #[test]
    fn safe_transfer_layout() {
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let data = safe_transfer_from(from, to, U256::from(77u64));
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(&data[16..36], from.as_bytes());
        assert_eq!(&data[48..68], to.as_bytes());
        assert_eq!(U256::from_big_endian(&data[68..100]), U256::from(77u64));
    }
}
