use ember_primitives::{constants, Address, ChainConfig, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Genesis configuration, loaded once at first boot and applied atomically
/// as block zero.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Interval between slots in milliseconds.
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
    /// Number of slots per epoch, carried for the election layer.
    #[serde(default = "default_epoch_size")]
    pub epoch_size: u64,
    /// Timestamp of the genesis block in milliseconds.
    pub timestamp_ms: u64,
    /// Initial balances as decimal strings in the smallest unit.
    #[serde(default)]
    pub alloc: HashMap<Address, String>,
}

fn default_block_time_ms() -> u64 {
    constants::DEFAULT_BLOCK_TIME_MS
}

fn default_epoch_size() -> u64 {
    constants::DEFAULT_EPOCH_SIZE
}

/// Failures while loading or interpreting the genesis file.
#[derive(Debug, thiserror::Error)]
pub enum GenesisError {
    /// The file cannot be read.
    #[error("cannot read genesis file: {0}")]
    Io(String),
    /// The file is not the expected JSON shape.
    #[error("cannot parse genesis file: {0}")]
    Json(String),
    /// An allocation balance is not a decimal number.
    #[error("bad balance for {addr}: {value:?}")]
    BadBalance {
        /// The allocated address.
        addr: Address,
        /// The offending balance string.
        value: String,
    },
}

impl GenesisConfig {
    /// Load and parse the genesis file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenesisError> {
        let raw = std::fs::read_to_string(path).map_err(|err| GenesisError::Io(err.to_string()))?;
        Self::from_json(&raw)
    }

    /// Parse a genesis document.
    pub fn from_json(raw: &str) -> Result<Self, GenesisError> {
        serde_json::from_str(raw).map_err(|err| GenesisError::Json(err.to_string()))
    }

    /// Chain parameters derived from this genesis, with process defaults
    /// for everything the file does not carry.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            chain_id: self.chain_id,
            block_time_ms: self.block_time_ms,
            epoch_size: self.epoch_size,
            ..ChainConfig::default()
        }
    }

    /// The initial balance allocation in deterministic address order.
    pub fn allocations(&self) -> Result<Vec<(Address, U256)>, GenesisError> {
        let mut entries = Vec::with_capacity(self.alloc.len());
        for (addr, value) in &self.alloc {
            let balance = value
                .parse::<U256>()
                .map_err(|_| GenesisError::BadBalance {
                    addr: *addr,
                    value: value.clone(),
                })?;
            entries.push((*addr, balance));
        }
        entries.sort_unstable_by_key(|(addr, _)| *addr);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chainId": 1337,
        "blockTimeMs": 2000,
        "epochSize": 16,
        "timestampMs": 1700000000000,
        "alloc": {
            "0x00000000000000000000000000000000000000aa": "10000000000000000000",
            "0x00000000000000000000000000000000000000bb": "0"
        }
    }"#;

    #[test]
    fn parses_and_allocates() {
        let genesis = GenesisConfig::from_json(SAMPLE).unwrap();
        assert_eq!(genesis.chain_id, 1337);
        assert_eq!(genesis.block_time_ms, 2000);

        let alloc = genesis.allocations().unwrap();
        assert_eq!(alloc.len(), 2);
        assert_eq!(
            alloc[0],
            (
                Address::with_last_byte(0xaa),
                U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64))
            )
        );
        assert_eq!(alloc[1], (Address::with_last_byte(0xbb), U256::ZERO));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let genesis =
            GenesisConfig::from_json(r#"{"chainId": 7, "timestampMs": 1}"#).unwrap();
        assert_eq!(genesis.block_time_ms, constants::DEFAULT_BLOCK_TIME_MS);
        assert_eq!(genesis.epoch_size, constants::DEFAULT_EPOCH_SIZE);
        assert!(genesis.alloc.is_empty());
        assert_eq!(genesis.chain_config().chain_id, 7);
    }

    #[test]
    fn bad_balance_is_rejected() {
        let genesis = GenesisConfig::from_json(
            r#"{"chainId": 1, "timestampMs": 1,
                "alloc": {"0x00000000000000000000000000000000000000aa": "ten"}}"#,
        )
        .unwrap();
        assert!(matches!(
            genesis.allocations(),
            Err(GenesisError::BadBalance { .. })
        ));
    }
}
