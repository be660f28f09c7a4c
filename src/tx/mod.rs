//! Transaction submission module with nonce management and gas bounds

pub mod builder;
pub mod gas;
pub mod intent;
pub mod nonce;
pub mod record;
pub mod submitter;

pub use builder::TransactionBuilder;
pub use gas::{GasPolicy, GasPrice, GasQuote};
pub use intent::{IntentKind, TransactionIntent};
pub use nonce::{NonceManager, Release};
pub use record::{Attempt, TransactionRecord, TxState};
pub use submitter::TransactionSubmitter;
