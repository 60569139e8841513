// Balance resolution
//
// Balances are read by scanning snapshots backward from a given height.

use log::debug;

use super::crypto::Address;
use super::storage::{LedgerStore, StorageError};

/// Balance of `address` as of block `at_height`
///
/// Walks from `at_height` down to genesis and returns the first snapshot
/// entry for the address. Blocks above `at_height` are never read, so a
/// candidate at height `h` is checked with `at_height = h - 1`. An address
/// no block has recorded holds zero.
pub fn balance_of(
    store: &dyn LedgerStore,
    address: &Address,
    at_height: u64,
) -> Result<u64, StorageError> {
    for block in store.scan_descending_from(at_height) {
        let block = block?;
        if let Some(balance) = block.balances.get(address) {
            return Ok(*balance);
        }
    }

    debug!("No balance recorded for {} at or below height {}", address, at_height);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::Block;
    use crate::blockchain::params::ChainParams;
    use crate::blockchain::storage::MemoryStore;

    fn snapshot(height: u64, prev_hash: &str, entries: &[(&Address, u64)]) -> Block {
        let mut block = Block::new(height, Address::storage(), prev_hash.to_string(), 0);
        for (address, balance) in entries {
            block.balances.insert((*address).clone(), *balance);
        }
        block.hash = block.calculate_hash();
        block
    }

    #[test]
    fn test_balance_resolves_latest_snapshot_within_height() {
        let alice = Address("alice".to_string());
        let bob = Address("bob".to_string());
        let params = ChainParams::default();

        let mut store = MemoryStore::new();
        let genesis = Block::genesis(alice.clone(), &params);
        store.append(&genesis).unwrap();
        let second = snapshot(2, &genesis.hash, &[(&alice, 60), (&bob, 40)]);
        store.append(&second).unwrap();
        let third = snapshot(3, &second.hash, &[(&bob, 25)]);
        store.append(&third).unwrap();

        assert_eq!(balance_of(&store, &alice, 1).unwrap(), params.genesis_reward);
        assert_eq!(balance_of(&store, &alice, 2).unwrap(), 60);
        assert_eq!(balance_of(&store, &alice, 3).unwrap(), 60);
        assert_eq!(balance_of(&store, &bob, 1).unwrap(), 0);
        assert_eq!(balance_of(&store, &bob, 2).unwrap(), 40);
        assert_eq!(balance_of(&store, &bob, 3).unwrap(), 25);
    }

    #[test]
    fn test_unknown_address_is_zero() {
        let mut store = MemoryStore::new();
        store
            .append(&Block::genesis(Address("alice".to_string()), &ChainParams::default()))
            .unwrap();

        assert_eq!(balance_of(&store, &Address("nobody".to_string()), 1).unwrap(), 0);
        assert_eq!(balance_of(&store, &Address::storage(), 0).unwrap(), 0);
    }
}
