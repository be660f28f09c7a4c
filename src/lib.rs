//! EVM operator - gated read/write access to one EVM network
//!
//! Operations arrive as `{kind, parameters}` requests, pass the operation
//! gate, and are served either from chain reads or through the transaction
//! submitter, which owns nonce sequencing, fee bumping and receipt tracking.

pub mod api;
pub mod audit;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod multicall;
pub mod ops;
pub mod tx;
pub mod wallet;

pub use error::{OperatorError, OperatorResult};
