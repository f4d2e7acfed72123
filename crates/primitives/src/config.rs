//! Process-wide chain parameters.

use crate::{
    constants::{
        DEFAULT_BLOCK_GAS_LIMIT, DEFAULT_BLOCK_TIME_MS, DEFAULT_COMMITTEE_SIZE,
        DEFAULT_EPOCH_SIZE, DEFAULT_MAX_TXS_PER_BLOCK, WEI_PER_UNIT,
    },
    U256,
};

/// Chain parameters fixed for the lifetime of the process.
///
/// `epoch_size` and `committee_size` are carried for the proposer election
/// layer, which lives outside this workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    /// EIP-155 chain id folded into every signature.
    pub chain_id: u64,
    /// Interval between slots in milliseconds.
    pub block_time_ms: u64,
    /// Number of slots per epoch.
    pub epoch_size: u64,
    /// Committee size used by the election layer.
    pub committee_size: usize,
    /// Reward credited to the proposer of every block, in the smallest unit.
    pub proposer_reward: U256,
    /// Upper bound on transactions included in one block.
    pub max_txs_per_block: usize,
    /// Upper bound on cumulative `gas_limit` per block.
    pub block_gas_limit: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            block_time_ms: DEFAULT_BLOCK_TIME_MS,
            epoch_size: DEFAULT_EPOCH_SIZE,
            committee_size: DEFAULT_COMMITTEE_SIZE,
            proposer_reward: WEI_PER_UNIT,
            max_txs_per_block: DEFAULT_MAX_TXS_PER_BLOCK,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
        }
    }
}
