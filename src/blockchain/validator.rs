use std::collections::BTreeSet;

use thiserror::Error;

use super::balance::balance_of;
use super::block::Block;
use super::chain::BlockchainError;
use super::crypto::Address;
use super::params::ChainParams;
use super::storage::LedgerStore;

/// Reasons a candidate block is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Block has no transactions")]
    EmptyBlock,

    #[error("Too many transactions: {count} (limit {limit})")]
    TooManyTransactions { count: usize, limit: usize },

    #[error("Transactions {first} and {second} share a nonce")]
    DuplicateNonce { first: usize, second: usize },

    #[error("More than one storage reward transaction")]
    MultipleStorageRewards,

    #[error("Storage reward transaction {index} must pay {reward} to the miner")]
    InvalidStorageReward { index: usize, reward: u64 },

    #[error("Transaction {index} hash is not valid")]
    InvalidTransactionHash { index: usize },

    #[error("Transaction {index} signature is not valid")]
    InvalidTransactionSignature { index: usize },

    #[error("No balance recorded for {address}")]
    MissingBalance { address: Address },

    #[error("Balance of {address}: expected {expected}, recorded {recorded}")]
    BalanceMismatch {
        address: Address,
        expected: u64,
        recorded: u64,
    },

    #[error("{address} spends {required} with only {available} available")]
    Overspend {
        address: Address,
        available: u64,
        required: u64,
    },

    #[error("Invalid height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },

    #[error("Previous hash does not match block {height}")]
    InvalidPrevHash { height: u64 },

    #[error("Invalid difficulty: expected {expected}, got {got}")]
    InvalidDifficulty { expected: u8, got: u8 },

    #[error("Block hash is not valid")]
    InvalidHash,

    #[error("Block signature is not valid")]
    InvalidSignature,

    #[error("Proof of work is not valid")]
    InvalidProof,

    #[error("Balance mapping is not valid")]
    InvalidMapping,

    #[error("Block is mined by {miner}, not by the submitter {signer}")]
    MinerMismatch { miner: Address, signer: Address },
}

/// Checks a candidate's transactions against balances as of `prior_height`
///
/// `prior_height` is the position just below the one the block occupies;
/// blocks above it are never read. Any failure rejects the whole block.
pub fn validate_transactions(
    store: &dyn LedgerStore,
    block: &Block,
    params: &ChainParams,
    prior_height: u64,
) -> Result<(), BlockchainError> {
    let txs = &block.transactions;
    let rewards = block.storage_reward_count();

    if txs.is_empty() {
        return Err(ValidationError::EmptyBlock.into());
    }
    let limit = params.txs_limit + usize::from(rewards > 0);
    if txs.len() > limit {
        return Err(ValidationError::TooManyTransactions {
            count: txs.len(),
            limit,
        }
        .into());
    }
    if rewards > 1 {
        return Err(ValidationError::MultipleStorageRewards.into());
    }

    for (i, a) in txs.iter().enumerate() {
        if let Some(j) = txs[i + 1..].iter().position(|b| b.nonce == a.nonce) {
            return Err(ValidationError::DuplicateNonce {
                first: i,
                second: i + 1 + j,
            }
            .into());
        }
    }

    for (index, tx) in txs.iter().enumerate() {
        if tx.is_storage_reward() {
            if tx.receiver != block.miner || tx.value != params.storage_reward || tx.fee != 0 {
                return Err(ValidationError::InvalidStorageReward {
                    index,
                    reward: params.storage_reward,
                }
                .into());
            }
            continue;
        }
        if !tx.hash_is_valid() {
            return Err(ValidationError::InvalidTransactionHash { index }.into());
        }
        if !tx.sign_is_valid() {
            return Err(ValidationError::InvalidTransactionSignature { index }.into());
        }
    }

    let mut addresses = BTreeSet::new();
    addresses.insert(Address::storage());
    for tx in txs {
        addresses.insert(tx.sender.clone());
        addresses.insert(tx.receiver.clone());
    }

    for address in &addresses {
        check_balance(store, block, address, prior_height)?;
    }

    Ok(())
}

/// Recorded balance must equal prior balance plus credits minus debits
fn check_balance(
    store: &dyn LedgerStore,
    block: &Block,
    address: &Address,
    prior_height: u64,
) -> Result<(), BlockchainError> {
    let recorded = match block.balances.get(address) {
        Some(balance) => *balance,
        None => {
            return Err(ValidationError::MissingBalance {
                address: address.clone(),
            }
            .into())
        }
    };

    let prior = balance_of(store, address, prior_height)?;
    let mut credit = u128::from(prior);
    let mut debit = 0u128;
    for tx in &block.transactions {
        if tx.sender == *address {
            debit += u128::from(tx.value) + u128::from(tx.fee);
        }
        if tx.receiver == *address {
            credit += u128::from(tx.value);
        }
        if address.is_storage() {
            credit += u128::from(tx.fee);
        }
    }

    if debit > credit {
        return Err(ValidationError::Overspend {
            address: address.clone(),
            available: saturate(credit),
            required: saturate(debit),
        }
        .into());
    }

    let expected = credit - debit;
    if expected != u128::from(recorded) {
        return Err(ValidationError::BalanceMismatch {
            address: address.clone(),
            expected: saturate(expected),
            recorded,
        }
        .into());
    }

    Ok(())
}

fn saturate(amount: u128) -> u64 {
    u64::try_from(amount).unwrap_or(u64::MAX)
}

/// Checks where a candidate goes before any proof-of-work is spent on it
///
/// Covers height, link and difficulty.
pub fn validate_placement(
    store: &dyn LedgerStore,
    block: &Block,
    params: &ChainParams,
) -> Result<(), BlockchainError> {
    let expected = store.len()? + 1;
    if block.height != expected {
        return Err(ValidationError::InvalidHeight {
            expected,
            got: block.height,
        }
        .into());
    }
    if !link_is_valid(store, block, expected)? {
        return Err(ValidationError::InvalidPrevHash { height: expected - 1 }.into());
    }
    if block.difficulty != params.difficulty {
        return Err(ValidationError::InvalidDifficulty {
            expected: params.difficulty,
            got: block.difficulty,
        }
        .into());
    }
    Ok(())
}

/// Checks a finalized block's hash, signature, proof and mapping
pub fn validate_seal(block: &Block) -> Result<(), BlockchainError> {
    if !block.hash_is_valid() {
        return Err(ValidationError::InvalidHash.into());
    }
    if !block.sign_is_valid() {
        return Err(ValidationError::InvalidSignature.into());
    }
    if !block.proof_is_valid() {
        return Err(ValidationError::InvalidProof.into());
    }
    if !block.mapping_is_valid() {
        return Err(ValidationError::InvalidMapping.into());
    }
    Ok(())
}

/// Whether `prev_hash` names the stored block just below position `height`
pub fn link_is_valid(store: &dyn LedgerStore, block: &Block, height: u64) -> Result<bool, BlockchainError> {
    match height.checked_sub(1) {
        Some(prev) if prev > 0 => Ok(store.get(prev)?.hash == block.prev_hash),
        _ => Ok(false),
    }
}
