use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use super::balance::balance_of;
use super::block::{Block, GENESIS_HEIGHT};
use super::crypto::{Address, Wallet};
use super::params::ChainParams;
use super::report::{verdict, BlockReport, ChainReport, Check};
use super::storage::{LedgerStore, MemoryStore, SledStore, StorageError};
use super::transaction::{Transaction, TransactionError};
use super::validator::{
    link_is_valid, validate_placement, validate_seal, validate_transactions, ValidationError,
};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Block rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("Insufficient funds for {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: Address,
        required: u64,
        available: u64,
    },

    #[error("Block already holds {limit} transactions")]
    BlockFull { limit: usize },

    #[error("Ledger is already initialized")]
    AlreadyInitialized,

    #[error("Ledger is not initialized")]
    NotInitialized,
}

/// Handle over one linear, single-writer ledger
///
/// Balance visibility is bounded by an explicit height on every lookup;
/// the handle itself keeps no validation cursor.
pub struct Blockchain {
    /// Committed blocks
    store: Box<dyn LedgerStore>,

    /// Consensus parameters every block is checked against
    params: ChainParams,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("params", &self.params)
            .finish()
    }
}

impl Blockchain {
    /// Creates a new ledger holding only the genesis block
    ///
    /// Genesis funds the storage address and `receiver`; it is appended
    /// without validation.
    pub fn initialize(
        mut store: Box<dyn LedgerStore>,
        receiver: &Address,
        params: ChainParams,
    ) -> Result<Self, BlockchainError> {
        if !store.is_empty()? {
            return Err(BlockchainError::AlreadyInitialized);
        }

        let genesis = Block::genesis(receiver.clone(), &params);
        store.append(&genesis)?;
        info!("Created genesis block funding {} with {}", receiver, params.genesis_reward);

        Ok(Blockchain { store, params })
    }

    /// Loads an existing ledger
    pub fn open(store: Box<dyn LedgerStore>, params: ChainParams) -> Result<Self, BlockchainError> {
        let height = store.len()?;
        if height == 0 {
            return Err(BlockchainError::NotInitialized);
        }

        info!("Opened ledger at height {}", height);
        Ok(Blockchain { store, params })
    }

    /// Opens the persistent ledger at `path`, creating genesis if it is empty
    pub fn with_storage<P: AsRef<Path>>(
        path: P,
        receiver: &Address,
        params: ChainParams,
    ) -> Result<Self, BlockchainError> {
        let store = SledStore::new(path)?;

        if store.is_empty()? {
            info!("No existing ledger found in storage, creating genesis block");
            Self::initialize(Box::new(store), receiver, params)
        } else {
            Self::open(Box::new(store), params)
        }
    }

    /// Creates a ledger that lives only in memory
    pub fn in_memory(receiver: &Address, params: ChainParams) -> Result<Self, BlockchainError> {
        Self::initialize(Box::new(MemoryStore::new()), receiver, params)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Height of the tip block
    pub fn height(&self) -> Result<u64, BlockchainError> {
        Ok(self.store.len()?)
    }

    pub fn last_hash(&self) -> Result<String, BlockchainError> {
        Ok(self.store.last_hash()?)
    }

    pub fn get_block(&self, height: u64) -> Result<Block, BlockchainError> {
        Ok(self.store.get(height)?)
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Block, BlockchainError> {
        Ok(self.store.get_by_hash(hash)?)
    }

    /// Gets the entire ledger in height order
    pub fn get_chain(&self) -> Result<Vec<Block>, BlockchainError> {
        Ok(self.store.blocks()?)
    }

    /// Balance of `address` at the tip
    pub fn balance(&self, address: &Address) -> Result<u64, BlockchainError> {
        self.balance_at(address, self.height()?)
    }

    /// Balance of `address` as of block `height`
    pub fn balance_at(&self, address: &Address, height: u64) -> Result<u64, BlockchainError> {
        Ok(balance_of(self.store.as_ref(), address, height)?)
    }

    /// Creates an empty candidate extending the tip
    pub fn new_block(&self, miner: Address) -> Result<Block, BlockchainError> {
        Ok(Block::new(
            self.height()? + 1,
            miner,
            self.last_hash()?,
            self.params.difficulty,
        ))
    }

    /// Creates a signed transfer referencing the tip
    pub fn new_transaction(
        &self,
        wallet: &Wallet,
        receiver: Address,
        value: u64,
        fee: u64,
    ) -> Result<Transaction, BlockchainError> {
        Ok(Transaction::new(wallet, self.last_hash()?, receiver, value, fee)?)
    }

    /// Adds a transaction to a candidate and updates its balance snapshot
    ///
    /// The sender is debited `value + fee`, the receiver credited `value`
    /// and the storage address credited `fee`. Balances not yet in the
    /// snapshot are read as of the block below the candidate.
    pub fn add_transaction(&self, block: &mut Block, tx: Transaction) -> Result<(), BlockchainError> {
        if tx.value == 0 {
            return Err(TransactionError::InvalidAmount("Transfer value must be positive".to_string()).into());
        }

        let ordinary = block.transactions.iter().filter(|t| !t.is_storage_reward()).count();
        if !tx.is_storage_reward() && ordinary >= self.params.txs_limit {
            return Err(BlockchainError::BlockFull {
                limit: self.params.txs_limit,
            });
        }

        let prior_height = block.height.saturating_sub(1);
        let available = self.snapshot_balance(block, &tx.sender, prior_height)?;
        let required = tx
            .total_amount()
            .ok_or_else(|| TransactionError::InvalidAmount("Value plus fee overflows".to_string()))?;
        if required > available {
            return Err(BlockchainError::InsufficientFunds {
                address: tx.sender.clone(),
                required,
                available,
            });
        }

        block.balances.insert(tx.sender.clone(), available - required);
        self.credit(block, &tx.receiver, tx.value, prior_height)?;
        self.credit(block, &Address::storage(), tx.fee, prior_height)?;
        block.transactions.push(tx);

        Ok(())
    }

    fn snapshot_balance(
        &self,
        block: &Block,
        address: &Address,
        prior_height: u64,
    ) -> Result<u64, BlockchainError> {
        match block.balances.get(address) {
            Some(balance) => Ok(*balance),
            None => self.balance_at(address, prior_height),
        }
    }

    fn credit(
        &self,
        block: &mut Block,
        address: &Address,
        amount: u64,
        prior_height: u64,
    ) -> Result<(), BlockchainError> {
        let balance = self.snapshot_balance(block, address, prior_height)?;
        let updated = balance
            .checked_add(amount)
            .ok_or_else(|| TransactionError::InvalidAmount(format!("Balance of {} overflows", address)))?;
        block.balances.insert(address.clone(), updated);
        Ok(())
    }

    /// Validates, rewards, seals and commits a candidate mined by `wallet`
    ///
    /// # Returns
    ///
    /// The committed block, or the reason it was refused. A refused block
    /// leaves the ledger untouched.
    pub fn submit(&mut self, wallet: &Wallet, block: Block) -> Result<Block, BlockchainError> {
        let block = match self.seal(wallet, block) {
            Ok(block) => block,
            Err(err) => {
                warn!("Rejected block from {}: {}", wallet.address(), err);
                return Err(err);
            }
        };

        let height = self.store.append(&block)?;
        info!(
            "Committed block {} ({} transactions) with hash {}",
            height,
            block.transactions.len(),
            block.hash
        );

        Ok(block)
    }

    fn seal(&self, wallet: &Wallet, mut block: Block) -> Result<Block, BlockchainError> {
        block.height = self.height()? + 1;

        if block.miner != *wallet.address() {
            return Err(ValidationError::MinerMismatch {
                miner: block.miner.clone(),
                signer: wallet.address().clone(),
            }
            .into());
        }

        // Placement is settled before the proof-of-work search
        validate_placement(self.store.as_ref(), &block, &self.params)?;
        let prior_height = block.height - 1;
        validate_transactions(self.store.as_ref(), &block, &self.params, prior_height)?;

        let reward = Transaction::storage_reward(
            self.last_hash()?,
            wallet.address().clone(),
            self.params.storage_reward,
        );
        self.add_transaction(&mut block, reward)?;
        block.finalize(wallet);

        validate_transactions(self.store.as_ref(), &block, &self.params, prior_height)?;
        validate_seal(&block)?;

        Ok(block)
    }

    /// Re-checks every stored block and reports each check's outcome
    ///
    /// Failed checks are recorded, never raised; only storage faults abort
    /// the walk. Blocks are judged by the position they are stored at, and
    /// each block's transactions are checked against balances as of the
    /// position below it.
    pub fn replay_and_report(&self) -> Result<ChainReport, BlockchainError> {
        let mut report = ChainReport::default();

        for height in 1..=self.height()? {
            let block = self.store.get(height)?;
            let mut entry = BlockReport::new(height, &block);

            if height == GENESIS_HEIGHT {
                entry.record(Check::Genesis, verdict(block.genesis_is_valid(), "genesis block undefined"));
                report.blocks.push(entry);
                continue;
            }

            // Only position 1 may carry the genesis exemptions
            let sealed = !block.is_genesis();

            entry.record(
                Check::Height,
                verdict(block.height == height, &format!("block claims height {}", block.height)),
            );
            entry.record(
                Check::Difficulty,
                verdict(
                    block.difficulty == self.params.difficulty,
                    &format!("expected {}, got {}", self.params.difficulty, block.difficulty),
                ),
            );
            entry.record(
                Check::Link,
                verdict(link_is_valid(self.store.as_ref(), &block, height)?, "previous hash mismatch"),
            );
            entry.record(Check::Hash, verdict(sealed && block.hash_is_valid(), "hash mismatch"));
            entry.record(Check::Signature, verdict(block.sign_is_valid(), "signature mismatch"));
            entry.record(Check::Proof, verdict(sealed && block.proof_is_valid(), "difficulty not met"));
            entry.record(Check::Mapping, verdict(block.mapping_is_valid(), "malformed balance snapshot"));

            let transactions = match validate_transactions(self.store.as_ref(), &block, &self.params, height - 1) {
                Ok(()) => Ok(()),
                Err(BlockchainError::Rejected(reason)) => Err(reason.to_string()),
                Err(err) => return Err(err),
            };
            entry.record(Check::Transactions, transactions);

            report.blocks.push(entry);
        }

        Ok(report)
    }
}
