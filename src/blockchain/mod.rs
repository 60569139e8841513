// Ledger module
//
// This module contains the ledger validation and append engine:
// - Block and transaction structures with their validity predicates
// - Ledger storage (sled and in-memory)
// - Balance resolution over per-block snapshots
// - Transaction validation
// - Chain engine and replay reports

pub mod balance;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod params;
pub mod report;
pub mod storage;
pub mod transaction;
pub mod validator;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use params::ChainParams;
pub use report::{BlockReport, ChainReport, Check, CheckResult};
pub use transaction::Transaction;
pub use validator::ValidationError;
