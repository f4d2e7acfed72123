use ember_kv::KvError;
use ember_primitives::{Address, B256};
use ember_trie::TrieError;

/// Failures of the state repository and manager.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    /// The trie rebuilt from persisted rows does not hash to the requested
    /// root.
    #[error("state root mismatch: expected {expected}, rebuilt {actual}")]
    RootMismatch {
        /// Root the caller asked for.
        expected: B256,
        /// Root of the trie rebuilt from the persisted rows.
        actual: B256,
    },
    /// The caller required an account that does not exist.
    #[error("account {0} not found")]
    AccountNotFound(Address),
    /// No journal frame is active.
    #[error("no active journal frame")]
    EmptyJournal,
    /// A persisted row cannot be decoded.
    #[error("corrupt state row: {0}")]
    Corrupt(String),
    /// Trie structure failure.
    #[error(transparent)]
    Trie(#[from] TrieError),
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] KvError),
}
