use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Height gap: expected block {expected}, got {got}")]
    HeightGap { expected: u64, got: u64 },

    #[error("Duplicate block hash: {0}")]
    DuplicateHash(String),
}

/// Iterator over stored blocks from a height down to 1
pub type BlockIter<'a> = Box<dyn Iterator<Item = Result<Block, StorageError>> + 'a>;

/// An ordered, append-only log of committed blocks keyed by height
///
/// Heights are 1-based and gap-free: `append` only accepts the block at
/// `len() + 1`, and a failed append leaves the length unchanged.
pub trait LedgerStore: Send {
    /// Appends a block, returning the height it was stored at
    fn append(&mut self, block: &Block) -> Result<u64, StorageError>;

    /// Number of stored blocks (the height of the tip)
    fn len(&self) -> Result<u64, StorageError>;

    fn get(&self, height: u64) -> Result<Block, StorageError>;

    fn get_by_hash(&self, hash: &str) -> Result<Block, StorageError>;

    /// Blocks from `height` down to 1, lazily read
    fn scan_descending_from(&self, height: u64) -> BlockIter<'_>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Hash of the tip block
    fn last_hash(&self) -> Result<String, StorageError> {
        let height = self.len()?;
        if height == 0 {
            return Err(StorageError::NotFound("Ledger is empty".to_string()));
        }
        Ok(self.get(height)?.hash)
    }

    /// Blocks from 1 up to the tip
    fn blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = self
            .scan_descending_from(self.len()?)
            .collect::<Result<Vec<_>, _>>()?;
        blocks.reverse();
        Ok(blocks)
    }
}

fn check_next_height(len: u64, block: &Block) -> Result<u64, StorageError> {
    let expected = len + 1;
    if block.height != expected {
        return Err(StorageError::HeightGap {
            expected,
            got: block.height,
        });
    }
    Ok(expected)
}

fn decode_block(bytes: &[u8]) -> Result<Block, StorageError> {
    Block::from_bytes(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// Persistent ledger backed by sled
///
/// Blocks live in the `blocks` tree under their big-endian height, so the
/// tree's key order is height order. The `hashes` tree maps block hash to
/// height.
pub struct SledStore {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for the hash index
    hashes: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Opens (or creates) the ledger at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a throwaway ledger removed when dropped
    #[cfg(test)]
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let hashes = db.open_tree("hashes")?;

        Ok(Self { db, blocks, hashes })
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl LedgerStore for SledStore {
    fn append(&mut self, block: &Block) -> Result<u64, StorageError> {
        let height = check_next_height(self.len()?, block)?;

        if self.hashes.contains_key(block.hash.as_bytes())? {
            return Err(StorageError::DuplicateHash(block.hash.clone()));
        }

        let value = block
            .to_bytes()
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let key = height_key(height);

        let result: TransactionResult<()> =
            (&self.blocks, &self.hashes).transaction(|(blocks, hashes)| {
                blocks.insert(&key[..], value.as_slice())?;
                hashes.insert(block.hash.as_bytes(), &key[..])?;
                Ok(())
            });

        result.map_err(|e| match e {
            TransactionError::Storage(e) => StorageError::DatabaseError(e),
            TransactionError::Abort(()) => {
                StorageError::SerializationError("Append transaction aborted".to_string())
            }
        })?;

        // The block is committed once the transaction returns
        if let Err(err) = self.flush() {
            warn!("Stored block {} but flushing to disk failed: {}", height, err);
        }
        debug!("Stored block {} under hash {}", height, block.hash);

        Ok(height)
    }

    fn len(&self) -> Result<u64, StorageError> {
        match self.blocks.last()? {
            Some((key, _)) => {
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    StorageError::DeserializationError("Invalid height key".to_string())
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn get(&self, height: u64) -> Result<Block, StorageError> {
        match self.blocks.get(height_key(height))? {
            Some(value) => decode_block(&value),
            None => Err(StorageError::NotFound(format!("Block at height {} not found", height))),
        }
    }

    fn get_by_hash(&self, hash: &str) -> Result<Block, StorageError> {
        match self.hashes.get(hash.as_bytes())? {
            Some(key) => match self.blocks.get(key)? {
                Some(value) => decode_block(&value),
                None => Err(StorageError::NotFound(format!("Block with hash {} not found", hash))),
            },
            None => Err(StorageError::NotFound(format!("Block with hash {} not found", hash))),
        }
    }

    fn scan_descending_from(&self, height: u64) -> BlockIter<'_> {
        let iter = self
            .blocks
            .range(..=height_key(height))
            .rev()
            .map(|result| {
                let (_, value) = result?;
                decode_block(&value)
            });
        Box::new(iter)
    }
}

/// In-process ledger, lost on drop
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: Vec<Block>,
    hashes: HashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn append(&mut self, block: &Block) -> Result<u64, StorageError> {
        let height = check_next_height(self.blocks.len() as u64, block)?;

        if self.hashes.contains_key(&block.hash) {
            return Err(StorageError::DuplicateHash(block.hash.clone()));
        }

        self.hashes.insert(block.hash.clone(), height);
        self.blocks.push(block.clone());
        Ok(height)
    }

    fn len(&self) -> Result<u64, StorageError> {
        Ok(self.blocks.len() as u64)
    }

    fn get(&self, height: u64) -> Result<Block, StorageError> {
        height
            .checked_sub(1)
            .and_then(|index| self.blocks.get(index as usize))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Block at height {} not found", height)))
    }

    fn get_by_hash(&self, hash: &str) -> Result<Block, StorageError> {
        match self.hashes.get(hash) {
            Some(height) => self.get(*height),
            None => Err(StorageError::NotFound(format!("Block with hash {} not found", hash))),
        }
    }

    fn scan_descending_from(&self, height: u64) -> BlockIter<'_> {
        let end = (height as usize).min(self.blocks.len());
        Box::new(self.blocks[..end].iter().rev().cloned().map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::{Address, Wallet};
    use crate::blockchain::params::ChainParams;

    fn sample_chain(len: u64) -> Vec<Block> {
        let genesis = Block::genesis(Wallet::new().address().clone(), &ChainParams::default());
        let mut blocks = vec![genesis];
        for height in 2..=len {
            let prev_hash = blocks[blocks.len() - 1].hash.clone();
            let mut block = Block::new(height, Address::storage(), prev_hash, 0);
            block.balances.insert(Address::storage(), height);
            block.hash = block.calculate_hash();
            blocks.push(block);
        }
        blocks
    }

    fn exercise_store(store: &mut dyn LedgerStore) {
        assert!(store.is_empty().unwrap());
        assert!(matches!(store.last_hash(), Err(StorageError::NotFound(_))));

        let blocks = sample_chain(3);
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(store.append(block).unwrap(), i as u64 + 1);
        }

        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.last_hash().unwrap(), blocks[2].hash);
        assert_eq!(store.get(2).unwrap(), blocks[1]);
        assert_eq!(store.get_by_hash(&blocks[0].hash).unwrap(), blocks[0]);
        assert!(matches!(store.get(4), Err(StorageError::NotFound(_))));
        assert!(matches!(store.get(0), Err(StorageError::NotFound(_))));

        let heights: Vec<u64> = store
            .scan_descending_from(2)
            .map(|block| block.unwrap().height)
            .collect();
        assert_eq!(heights, vec![2, 1]);

        assert_eq!(store.blocks().unwrap(), blocks);
    }

    fn exercise_rejected_appends(store: &mut dyn LedgerStore) {
        let blocks = sample_chain(3);
        store.append(&blocks[0]).unwrap();

        let gap = store.append(&blocks[2]);
        assert!(matches!(gap, Err(StorageError::HeightGap { expected: 2, got: 3 })));

        let mut duplicate = blocks[1].clone();
        duplicate.hash = blocks[0].hash.clone();
        assert!(matches!(store.append(&duplicate), Err(StorageError::DuplicateHash(_))));

        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&mut MemoryStore::new());
        exercise_rejected_appends(&mut MemoryStore::new());
    }

    #[test]
    fn test_sled_store() {
        exercise_store(&mut SledStore::temporary().unwrap());
        exercise_rejected_appends(&mut SledStore::temporary().unwrap());
    }

    #[test]
    fn test_sled_store_appends_survive_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "snapshot-ledger-store-{}",
            hex::encode(crate::blockchain::crypto::random_bytes(8))
        ));
        let blocks = sample_chain(3);

        {
            let mut store = SledStore::new(&dir).unwrap();
            for block in &blocks {
                let height = store.append(block).unwrap();
                assert_eq!(store.len().unwrap(), height);
            }
        }

        let store = SledStore::new(&dir).unwrap();
        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.blocks().unwrap(), blocks);
        assert_eq!(store.get_by_hash(&blocks[2].hash).unwrap().height, 3);

        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sled_store_scan_reads_only_up_to_height() {
        let mut store = SledStore::temporary().unwrap();
        for block in sample_chain(5) {
            store.append(&block).unwrap();
        }

        let heights: Vec<u64> = store
            .scan_descending_from(3)
            .map(|block| block.unwrap().height)
            .collect();
        assert_eq!(heights, vec![3, 2, 1]);
        assert_eq!(store.scan_descending_from(0).count(), 0);
    }

    #[test]
    fn test_sled_store_reports_corrupt_block() {
        let mut store = SledStore::temporary().unwrap();
        for block in sample_chain(2) {
            store.append(&block).unwrap();
        }
        store.blocks.insert(height_key(2), &[0xffu8, 0x01][..]).unwrap();

        assert!(matches!(store.get(2), Err(StorageError::DeserializationError(_))));
        let first = store.scan_descending_from(2).next().unwrap();
        assert!(matches!(first, Err(StorageError::DeserializationError(_))));
    }
}
