use log::{info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::fmt;

use super::block::Block;

/// One independently re-checked property of a stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Genesis,
    Height,
    Difficulty,
    Link,
    Hash,
    Signature,
    Proof,
    Mapping,
    Transactions,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::Genesis => "genesis",
            Check::Height => "height",
            Check::Difficulty => "difficulty",
            Check::Link => "link",
            Check::Hash => "hash",
            Check::Signature => "signature",
            Check::Proof => "proof",
            Check::Mapping => "mapping",
            Check::Transactions => "transactions",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckResult {
    pub check: Check,
    pub passed: bool,

    /// Why the check failed
    pub detail: Option<String>,
}

/// Outcome of every check run against one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BlockReport {
    /// Position the block is stored at
    pub height: u64,
    pub hash: String,
    pub checks: Vec<CheckResult>,
}

impl BlockReport {
    pub fn new(height: u64, block: &Block) -> Self {
        BlockReport {
            height,
            hash: block.hash.clone(),
            checks: Vec::new(),
        }
    }

    /// Records and logs the outcome of `check`
    pub fn record(&mut self, check: Check, outcome: Result<(), String>) {
        match &outcome {
            Ok(()) => info!("[{}][SUCCESS] {} is valid", self.height, check),
            Err(reason) => warn!("[{}][FAILED] {} is not valid: {}", self.height, check, reason),
        }

        self.checks.push(CheckResult {
            check,
            passed: outcome.is_ok(),
            detail: outcome.err(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    #[cfg(test)]
    pub fn check(&self, check: Check) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }
}

/// Per-block results of a full replay of the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainReport {
    pub blocks: Vec<BlockReport>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.blocks.iter().all(BlockReport::is_valid)
    }

    /// Heights and checks that failed
    pub fn failures(&self) -> Vec<(u64, Check)> {
        self.blocks
            .iter()
            .flat_map(|b| {
                b.checks
                    .iter()
                    .filter(|c| !c.passed)
                    .map(move |c| (b.height, c.check))
            })
            .collect()
    }
}

/// Turns a predicate result into an outcome with a fixed failure reason
pub fn verdict(passed: bool, failure: &str) -> Result<(), String> {
    if passed {
        Ok(())
    } else {
        Err(failure.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::params::ChainParams;

    #[test]
    fn test_report_collects_failures() {
        let genesis = Block::genesis(Address::storage(), &ChainParams::default());
        let mut first = BlockReport::new(1, &genesis);
        first.record(Check::Genesis, Ok(()));

        let mut second = BlockReport::new(2, &genesis);
        assert_eq!(second.height, 2);
        second.record(Check::Hash, verdict(true, "hash mismatch"));
        second.record(Check::Proof, verdict(false, "proof too weak"));

        assert!(first.is_valid());
        assert!(!second.is_valid());
        assert_eq!(second.check(Check::Proof).unwrap().detail.as_deref(), Some("proof too weak"));
        assert!(second.check(Check::Hash).unwrap().detail.is_none());

        let report = ChainReport {
            blocks: vec![first, second],
        };
        assert!(!report.is_valid());
        assert_eq!(report.failures(), vec![(2, Check::Proof)]);
    }
}
