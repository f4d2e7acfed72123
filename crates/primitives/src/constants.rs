//! Protocol-wide constants.

use crate::U256;

/// Intrinsic gas charged for a plain value transfer.
pub const TX_GAS: u64 = 21_000;

/// Smallest-denomination units per whole coin, 10^18.
pub const WEI_PER_UNIT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Default interval between slots in milliseconds.
pub const DEFAULT_BLOCK_TIME_MS: u64 = 12_000;

/// Default number of slots per epoch.
pub const DEFAULT_EPOCH_SIZE: u64 = 32;

/// Default committee size carried for the election layer.
pub const DEFAULT_COMMITTEE_SIZE: usize = 4;

/// Default upper bound on transactions included in one block.
pub const DEFAULT_MAX_TXS_PER_BLOCK: usize = 1_000;

/// Default upper bound on cumulative gas per block.
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 30_000_000;
