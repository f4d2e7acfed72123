//! Primitive types shared across the emberchain node.

pub use alloy_primitives::{
    self, hex, keccak256, Address, Bloom, BloomInput, Bytes, Log, LogData, B256, U256,
};
pub use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};

mod account;
mod block;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod parse;
pub mod rlp;
mod receipt;
mod transaction;

pub use account::Account;
pub use block::{Block, BlockHeader, GENESIS_PARENT_HASH};
pub use config::ChainConfig;
pub use crypto::TxSignature;
pub use receipt::{logs_bloom, Receipt};
pub use transaction::Transaction;

/// Block numbers are plain 64-bit counters.
pub type BlockNumber = u64;
/// Transaction hashes are 32-byte Keccak digests.
pub type TxHash = B256;
