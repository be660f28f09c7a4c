//! ABI helpers: selectors, call encoding, result decoding

use crate::error::{OperatorError, OperatorResult};

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use sha3::{Digest, Keccak256};

/// Selector of `Error(string)`
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// Selector of `Panic(uint256)`
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// First four bytes of the keccak hash of a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Selector followed by the encoded arguments
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(encode(args));
    Bytes::from(data)
}

/// Decode return data against the expected output types
pub fn decode_output(types: &[ParamType], data: &[u8]) -> OperatorResult<Vec<Token>> {
    decode(types, data).map_err(|e| OperatorError::Rpc {
        operation: "abi_decode".to_string(),
        code: 0,
        message: format!("undecodable return data: {}", e),
    })
}

pub fn decode_uint(data: &[u8]) -> OperatorResult<U256> {
    match decode_output(&[ParamType::Uint(256)], data)?.pop() {
        Some(Token::Uint(value)) => Ok(value),
        _ => Err(malformed("uint256")),
    }
}

pub fn decode_address(data: &[u8]) -> OperatorResult<Address> {
    match decode_output(&[ParamType::Address], data)?.pop() {
        Some(Token::Address(value)) => Ok(value),
        _ => Err(malformed("address")),
    }
}

/// Decode a string, accepting the `bytes32` form some older tokens return
pub fn decode_string(data: &[u8]) -> OperatorResult<String> {
    if let Ok(mut tokens) = decode(&[ParamType::String], data) {
        if let Some(Token::String(value)) = tokens.pop() {
            return Ok(value);
        }
    }
    if let Ok(mut tokens) = decode(&[ParamType::FixedBytes(32)], data) {
        if let Some(Token::FixedBytes(raw)) = tokens.pop() {
            let trimmed: Vec<u8> = raw.into_iter().take_while(|b| *b != 0).collect();
            if let Ok(value) = String::from_utf8(trimmed) {
                return Ok(value);
            }
        }
    }
    Err(malformed("string"))
}

fn malformed(expected: &str) -> OperatorError {
    OperatorError::Rpc {
        operation: "abi_decode".to_string(),
        code: 0,
        message: format!("return data is not a {}", expected),
    }
}

/// Best-effort human readable revert reason
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (head, body) = data.split_at(4);

    if head == ERROR_STRING_SELECTOR {
        return match decode(&[ParamType::String], body).ok()?.pop()? {
            Token::String(reason) => Some(reason),
            _ => None,
        };
    }

    if head == PANIC_SELECTOR {
        return match decode(&[ParamType::Uint(256)], body).ok()?.pop()? {
            Token::Uint(code) => Some(format!("panic code 0x{:x}", code)),
            _ => None,
        };
    }

    Some(format!("custom error 0x{}", hex::encode(head)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("approve(address,uint256)")), "095ea7b3");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
        assert_eq!(selector("Error(string)"), ERROR_STRING_SELECTOR);
        assert_eq!(selector("Panic(uint256)"), PANIC_SELECTOR);
    }

    #[test]
    fn decodes_padded_address() {
        let owner = Address::repeat_byte(0x5a);
        let data = encode(&[Token::Address(owner)]);
        assert_eq!(decode_address(&data).unwrap(), owner);
        assert!(decode_address(&[0u8; 4]).is_err());
    }

    #[test]
    fn decodes_error_string_revert() {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend(encode(&[Token::String("insufficient allowance".to_string())]));
        assert_eq!(
            decode_revert_reason(&data).as_deref(),
            Some("insufficient allowance")
        );
    }

    #[test]
    fn decodes_panic_and_custom_errors() {
        let mut panic = PANIC_SELECTOR.to_vec();
        panic.extend(encode(&[Token::Uint(U256::from(0x11u64))]));
        assert_eq!(decode_revert_reason(&panic).as_deref(), Some("panic code 0x11"));

        let custom = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(
            decode_revert_reason(&custom).as_deref(),
            Some("custom error 0xdeadbeef")
        );
        assert_eq!(decode_revert_reason(&[0x01]), None);
    }

    #[test]
    fn bytes32_strings_are_accepted() {
        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(b"MKR");
        let data = encode(&[Token::FixedBytes(raw.to_vec())]);
        assert_eq!(decode_string(&data).unwrap(), "MKR");
    }
}
