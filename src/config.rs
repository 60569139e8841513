use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::blockchain::params::MAX_DIFFICULTY;
use crate::blockchain::{Address, ChainParams};

/// Errors raised while reading the node configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Node settings read from the environment
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory holding the sled ledger (`LEDGER_DATA_DIR`)
    pub data_dir: PathBuf,

    /// HTTP bind address (`LEDGER_BIND`)
    pub bind: String,

    /// HTTP port (`LEDGER_PORT`)
    pub port: u16,

    /// Default log filter (`LEDGER_LOG`), overridden by `RUST_LOG`
    pub log_level: String,

    /// Address funded by genesis (`LEDGER_GENESIS_RECEIVER`)
    pub genesis_receiver: Option<Address>,

    /// Consensus parameters, difficulty from `LEDGER_DIFFICULTY` (at most 32)
    pub params: ChainParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("data/ledger"),
            bind: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            genesis_receiver: None,
            params: ChainParams::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = NodeConfig::default();

        if let Some(dir) = lookup("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup("LEDGER_BIND") {
            config.bind = bind;
        }
        if let Some(port) = lookup("LEDGER_PORT") {
            config.port = parse("LEDGER_PORT", port)?;
        }
        if let Some(level) = lookup("LEDGER_LOG") {
            config.log_level = level;
        }
        if let Some(receiver) = lookup("LEDGER_GENESIS_RECEIVER") {
            config.genesis_receiver = Some(parse("LEDGER_GENESIS_RECEIVER", receiver)?);
        }
        if let Some(difficulty) = lookup("LEDGER_DIFFICULTY") {
            let parsed: u8 = parse("LEDGER_DIFFICULTY", difficulty.clone())?;
            if parsed > MAX_DIFFICULTY {
                return Err(ConfigError::InvalidValue {
                    name: "LEDGER_DIFFICULTY",
                    value: difficulty,
                });
            }
            config.params = config.params.with_difficulty(parsed);
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::params::DIFFICULTY;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.params.difficulty, DIFFICULTY);
        assert!(config.genesis_receiver.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("LEDGER_DATA_DIR", "/tmp/ledger"),
            ("LEDGER_PORT", "9000"),
            ("LEDGER_DIFFICULTY", "8"),
            ("LEDGER_GENESIS_RECEIVER", "STORAGE-CHAIN"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.params.difficulty, 8);
        assert_eq!(config.genesis_receiver, Some(Address::storage()));
    }

    #[test]
    fn test_invalid_values() {
        let result = NodeConfig::from_lookup(lookup(&[("LEDGER_PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { name: "LEDGER_PORT", .. })));

        let result = NodeConfig::from_lookup(lookup(&[("LEDGER_GENESIS_RECEIVER", "not base58 0OIl")]));
        assert!(result.is_err());

        let result = NodeConfig::from_lookup(lookup(&[("LEDGER_DIFFICULTY", "33")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { name: "LEDGER_DIFFICULTY", .. })));

        let config = NodeConfig::from_lookup(lookup(&[("LEDGER_DIFFICULTY", "32")])).unwrap();
        assert_eq!(config.params.difficulty, MAX_DIFFICULTY);
    }
}
