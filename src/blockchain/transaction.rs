use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{self, Address, DigitalSignature, Wallet};
use super::params::RAND_BYTES;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// A value transfer from `sender` to `receiver`
///
/// The sender pays `value + fee`; the fee accrues to the storage address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Random uniqueness token, never shared by two transactions of a block
    pub nonce: Vec<u8>,

    /// Hash of the chain tip when the transaction was created
    pub prev_block: String,

    /// Sender's address
    pub sender: Address,

    /// Receiver's address
    pub receiver: Address,

    /// Amount credited to the receiver
    pub value: u64,

    /// Amount diverted to the storage address
    pub fee: u64,

    /// Hash over the fields above, absent for the storage reward
    pub hash: Option<String>,

    /// Sender's signature over `hash`, absent for the storage reward
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a signed transfer from the wallet's address
    ///
    /// # Arguments
    ///
    /// * `wallet` - The sender's wallet
    /// * `prev_block` - Hash of the current chain tip
    /// * `receiver` - The receiving address
    /// * `value` - The amount to transfer
    /// * `fee` - The amount paid to storage
    pub fn new(
        wallet: &Wallet,
        prev_block: String,
        receiver: Address,
        value: u64,
        fee: u64,
    ) -> Result<Self, TransactionError> {
        if value == 0 {
            return Err(TransactionError::InvalidAmount(
                "Transfer value must be positive".to_string(),
            ));
        }

        let mut transaction = Transaction {
            nonce: crypto::random_bytes(RAND_BYTES),
            prev_block,
            sender: wallet.address().clone(),
            receiver,
            value,
            fee,
            hash: None,
            signature: None,
        };

        let hash = transaction.calculate_hash();
        transaction.signature = Some(wallet.sign(hash.as_bytes()));
        transaction.hash = Some(hash);

        Ok(transaction)
    }

    /// Creates the unsigned reward paid by storage to a block's miner
    pub fn storage_reward(prev_block: String, miner: Address, amount: u64) -> Self {
        Transaction {
            nonce: crypto::random_bytes(RAND_BYTES),
            prev_block,
            sender: Address::storage(),
            receiver: miner,
            value: amount,
            fee: 0,
            hash: None,
            signature: None,
        }
    }

    /// Calculates the hash of the transaction
    ///
    /// Covers every field except `hash` and `signature`.
    pub fn calculate_hash(&self) -> String {
        let data = serde_json::json!({
            "nonce": hex::encode(&self.nonce),
            "prev_block": self.prev_block,
            "sender": self.sender.0,
            "receiver": self.receiver.0,
            "value": self.value,
            "fee": self.fee,
        });

        hex::encode(crypto::hash_sum(data.to_string().as_bytes()))
    }

    pub fn is_storage_reward(&self) -> bool {
        self.sender.is_storage()
    }

    /// Gets the total amount debited from the sender (value + fee)
    pub fn total_amount(&self) -> Option<u64> {
        self.value.checked_add(self.fee)
    }

    pub fn hash_is_valid(&self) -> bool {
        match &self.hash {
            Some(hash) => *hash == self.calculate_hash(),
            None => false,
        }
    }

    pub fn sign_is_valid(&self) -> bool {
        match (&self.hash, &self.signature) {
            (Some(hash), Some(signature)) => {
                crypto::verify_by_address(hash.as_bytes(), signature, &self.sender)
            }
            _ => false,
        }
    }
}
