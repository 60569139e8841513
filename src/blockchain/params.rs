use serde::{Deserialize, Serialize};

/// Hash recorded in the genesis block in place of a computed digest
pub const GENESIS_BLOCK: &str = "GENESIS-BLOCK";

/// The system account that collects fees and pays mining rewards
pub const STORAGE_CHAIN: &str = "STORAGE-CHAIN";

/// Initial supply held by the storage address
pub const STORAGE_VALUE: u64 = 100;

/// Amount credited to the genesis receiver
pub const GENESIS_REWARD: u64 = 100;

/// Reward paid from storage to the miner of every block
pub const STORAGE_REWARD: u64 = 1;

/// Required leading zero bits of the proof-of-work digest
pub const DIFFICULTY: u8 = 20;

/// Highest proof-of-work target a node accepts in its configuration
pub const MAX_DIFFICULTY: u8 = 32;

/// Maximum number of ordinary transactions per block
pub const TXS_LIMIT: usize = 2;

/// Length of the random nonce carried by every transaction
pub const RAND_BYTES: usize = 32;

/// Consensus parameters a chain is built and checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Proof-of-work target for non-genesis blocks
    pub difficulty: u8,

    /// Ordinary transaction cap per block
    pub txs_limit: usize,

    /// Reward per block
    pub storage_reward: u64,

    /// Storage balance at genesis
    pub storage_value: u64,

    /// Genesis receiver balance
    pub genesis_reward: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            difficulty: DIFFICULTY,
            txs_limit: TXS_LIMIT,
            storage_reward: STORAGE_REWARD,
            storage_value: STORAGE_VALUE,
            genesis_reward: GENESIS_REWARD,
        }
    }
}

impl ChainParams {
    /// Same parameters with a different proof-of-work target
    pub fn with_difficulty(self, difficulty: u8) -> Self {
        ChainParams { difficulty, ..self }
    }
}
