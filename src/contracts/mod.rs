//! Contract bindings used by the operator
//!
//! Hand-rolled encoders over `ethers::abi` for the handful of ERC-20,
//! ERC-721, ERC-1155, router and Multicall3 functions the operations need.

pub mod abi;
pub mod erc1155;
pub mod erc20;
pub mod erc721;
pub mod multicall3;
pub mod router;

pub use abi::{decode_revert_reason, selector};
