use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::collections::BTreeMap;

use super::crypto::{self, Address, DigitalSignature, Wallet};
use super::params::{ChainParams, GENESIS_BLOCK};
use super::transaction::Transaction;

/// Height of the genesis block
pub const GENESIS_HEIGHT: u64 = 1;

/// Represents a block in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position in the ledger, 1-based
    pub height: u64,

    /// Hash of the block at `height - 1`, empty for genesis
    pub prev_hash: String,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Required leading zero bits of the proof digest
    pub difficulty: u8,

    /// Proof of work
    pub nonce: u64,

    /// Address credited with the storage reward
    pub miner: Address,

    /// Transactions in commit order
    pub transactions: Vec<Transaction>,

    /// Absolute balance of every address this block touches, as of this block
    #[schema(value_type = Object)]
    pub balances: BTreeMap<Address, u64>,

    /// Hash of the block (calculated), the sentinel for genesis
    pub hash: String,

    /// Miner's signature over `hash`
    pub signature: Option<DigitalSignature>,
}

impl Block {
    /// Creates an empty candidate block
    ///
    /// # Arguments
    ///
    /// * `height` - The height the block will be committed at
    /// * `miner` - The address receiving the storage reward
    /// * `prev_hash` - The hash of the previous block
    /// * `difficulty` - The proof-of-work target
    pub fn new(height: u64, miner: Address, prev_hash: String, difficulty: u8) -> Self {
        Block {
            height,
            prev_hash,
            timestamp: Utc::now(),
            difficulty,
            nonce: 0,
            miner,
            transactions: Vec::new(),
            balances: BTreeMap::new(),
            hash: String::new(),
            signature: None,
        }
    }

    /// Creates the genesis block funding storage and `receiver`
    ///
    /// Genesis is an axiom of the ledger: it carries the sentinel hash and
    /// no proof, signature, or transactions.
    pub fn genesis(receiver: Address, params: &ChainParams) -> Self {
        let mut block = Block::new(GENESIS_HEIGHT, Address(String::new()), String::new(), 0);
        block.hash = GENESIS_BLOCK.to_string();
        block.balances.insert(Address::storage(), params.storage_value);
        block.balances.insert(receiver, params.genesis_reward);
        block
    }

    pub fn is_genesis(&self) -> bool {
        self.height == GENESIS_HEIGHT
    }

    /// A genesis block is valid exactly when it carries the sentinel hash
    pub fn genesis_is_valid(&self) -> bool {
        self.is_genesis() && self.hash == GENESIS_BLOCK
    }

    /// Calculates the hash of the block
    ///
    /// Covers every field except `nonce`, `hash` and `signature`.
    pub fn calculate_hash(&self) -> String {
        let block_data = serde_json::json!({
            "height": self.height,
            "prev_hash": self.prev_hash,
            "timestamp": self.timestamp,
            "difficulty": self.difficulty,
            "miner": self.miner.0,
            "transactions": self.transactions,
            "balances": self.balances,
        });

        hex::encode(crypto::hash_sum(block_data.to_string().as_bytes()))
    }

    /// Seals a candidate: computes the hash, signs it and searches the proof
    pub fn finalize(&mut self, wallet: &Wallet) {
        self.hash = self.calculate_hash();
        self.signature = Some(wallet.sign(self.hash.as_bytes()));
        self.mine();
    }

    /// Searches for a nonce whose proof digest meets the difficulty
    pub fn mine(&mut self) {
        let mut nonce = 0u64;
        while !Self::meets_difficulty(&self.hash, nonce, self.difficulty) {
            nonce = nonce.wrapping_add(1);
        }
        log::debug!("Found proof {} for block {}", nonce, self.height);
        self.nonce = nonce;
    }

    fn proof_digest(hash: &str, nonce: u64) -> [u8; 32] {
        let mut data = Vec::with_capacity(hash.len() + 8);
        data.extend_from_slice(hash.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        crypto::hash_sum(&data)
    }

    fn meets_difficulty(hash: &str, nonce: u64, difficulty: u8) -> bool {
        crypto::leading_zero_bits(&Self::proof_digest(hash, nonce)) >= u32::from(difficulty)
    }

    pub fn hash_is_valid(&self) -> bool {
        if self.is_genesis() {
            return self.genesis_is_valid();
        }
        self.hash == self.calculate_hash()
    }

    pub fn sign_is_valid(&self) -> bool {
        match &self.signature {
            Some(signature) => crypto::verify_by_address(self.hash.as_bytes(), signature, &self.miner),
            None => false,
        }
    }

    pub fn proof_is_valid(&self) -> bool {
        if self.is_genesis() {
            return true;
        }
        Self::meets_difficulty(&self.hash, self.nonce, self.difficulty)
    }

    /// Structural check of the balance snapshot
    ///
    /// The storage address is always present and every other entry must be
    /// touched by one of the block's transactions.
    pub fn mapping_is_valid(&self) -> bool {
        if !self.balances.contains_key(&Address::storage()) {
            return false;
        }
        if self.is_genesis() {
            return true;
        }
        self.balances.keys().all(|address| {
            address.is_storage()
                || self
                    .transactions
                    .iter()
                    .any(|tx| tx.sender == *address || tx.receiver == *address)
        })
    }

    /// Number of storage reward transactions in the block
    pub fn storage_reward_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_storage_reward()).count()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_block(wallet: &Wallet, receiver: &Wallet) -> Block {
        let params = ChainParams::default();
        let mut block = Block::new(2, wallet.address().clone(), GENESIS_BLOCK.to_string(), 4);
        let tx = Transaction::new(receiver, GENESIS_BLOCK.to_string(), wallet.address().clone(), 5, 1).unwrap();
        block.transactions.push(tx);
        block.balances.insert(Address::storage(), params.storage_value + 1);
        block.balances.insert(receiver.address().clone(), params.genesis_reward - 6);
        block.balances.insert(wallet.address().clone(), 5);
        block.finalize(wallet);
        block
    }

    #[test]
    fn test_genesis_block() {
        let receiver = Wallet::new();
        let params = ChainParams::default();
        let genesis = Block::genesis(receiver.address().clone(), &params);

        assert!(genesis.is_genesis());
        assert!(genesis.genesis_is_valid());
        assert!(genesis.hash_is_valid());
        assert!(genesis.proof_is_valid());
        assert!(genesis.mapping_is_valid());
        assert_eq!(genesis.balances[&Address::storage()], params.storage_value);
        assert_eq!(genesis.balances[receiver.address()], params.genesis_reward);
    }

    #[test]
    fn test_genesis_with_other_hash_is_invalid() {
        let mut genesis = Block::genesis(Wallet::new().address().clone(), &ChainParams::default());
        genesis.hash = genesis.calculate_hash();
        assert!(!genesis.genesis_is_valid());
        assert!(!genesis.hash_is_valid());
    }

    #[test]
    fn test_finalized_block_is_valid() {
        let miner = Wallet::new();
        let sender = Wallet::new();
        let block = sealed_block(&miner, &sender);

        assert_eq!(block.hash.len(), 64);
        assert!(block.hash_is_valid());
        assert!(block.sign_is_valid());
        assert!(block.proof_is_valid());
        assert!(block.mapping_is_valid());
    }

    #[test]
    fn test_tampering_is_detected() {
        let miner = Wallet::new();
        let sender = Wallet::new();
        let block = sealed_block(&miner, &sender);

        let mut tampered = block.clone();
        tampered.balances.insert(miner.address().clone(), 500);
        assert!(!tampered.hash_is_valid());

        let mut resigned = block.clone();
        resigned.signature = Some(sender.sign(block.hash.as_bytes()));
        assert!(!resigned.sign_is_valid());

        let mut unproven = block.clone();
        unproven.difficulty = 255;
        assert!(!Block::meets_difficulty(&unproven.hash, unproven.nonce, unproven.difficulty));
    }

    #[test]
    fn test_mapping_rejects_untouched_address() {
        let miner = Wallet::new();
        let sender = Wallet::new();
        let mut block = sealed_block(&miner, &sender);

        block.balances.insert(Wallet::new().address().clone(), 7);
        assert!(!block.mapping_is_valid());

        block.balances.clear();
        assert!(!block.mapping_is_valid());
    }

    #[test]
    fn test_serialization_round_trip() {
        let miner = Wallet::new();
        let sender = Wallet::new();
        let block = sealed_block(&miner, &sender);

        let bytes = block.to_bytes().unwrap();
        let restored = Block::from_bytes(&bytes).unwrap();
        assert_eq!(restored, block);
        assert_eq!(restored.to_bytes().unwrap(), bytes);

        let genesis = Block::genesis(miner.address().clone(), &ChainParams::default());
        assert_eq!(Block::from_bytes(&genesis.to_bytes().unwrap()).unwrap(), genesis);
    }

    #[test]
    fn test_corrupt_bytes_fail_to_deserialize() {
        assert!(Block::from_bytes(&[1, 2, 3]).is_err());
    }
}
