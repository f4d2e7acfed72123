use crate::GenesisError;
use ember_chain::ChainError;
use ember_pool::PoolError;
use ember_primitives::{TxHash, U256};
use ember_state::StateError;

/// Transaction admission failures, surfaced to the submitter without any
/// state mutation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The signature does not recover to the claimed sender.
    #[error("bad signature")]
    BadSignature,
    /// The same transaction hash is already pooled.
    #[error("transaction {0} already known")]
    DuplicateHash(TxHash),
    /// The nonce is below the sender's on-chain nonce.
    #[error("nonce {got} below account nonce {expected}")]
    NonceTooLow {
        /// Nonce carried by the rejected transaction.
        got: u64,
        /// The sender's current on-chain nonce.
        expected: u64,
    },
    /// The sender already has a pooled transaction with this nonce.
    #[error("sender already has a pooled transaction with nonce {0}")]
    NonceConflict(u64),
    /// The gas price is zero.
    #[error("gas price must be positive")]
    GasUnderpriced,
    /// The gas limit is below the intrinsic transfer cost.
    #[error("gas limit {0} below the intrinsic 21000")]
    GasUnderlimit(u64),
    /// The sender balance cannot cover `value + gas_price * gas_limit`.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Total the sender must be able to pay.
        required: U256,
        /// The sender's current balance.
        available: U256,
    },
    /// State read failure during validation.
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<PoolError> for AdmissionError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::DuplicateHash(hash) => Self::DuplicateHash(hash),
            PoolError::NonceTooLow { got, expected } => Self::NonceTooLow { got, expected },
            PoolError::NonceConflict(nonce) => Self::NonceConflict(nonce),
        }
    }
}

/// Block production failures; every one of them rolls the journal back and
/// leaves the next slot to retry.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// Another block attempt is still running.
    #[error("another block attempt is already running")]
    Busy,
    /// The parent of the block under construction is missing.
    #[error("no parent block below height {0}")]
    NoParent(u64),
    /// The persisted tip cannot be reconciled with the state repository.
    #[error("corrupt chain tip: {0}")]
    CorruptTip(String),
    /// State access failure.
    #[error(transparent)]
    State(#[from] StateError),
    /// Chain store failure.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Genesis configuration failure.
    #[error(transparent)]
    Genesis(#[from] GenesisError),
}

/// Query facade failures.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// State access failure.
    #[error(transparent)]
    State(#[from] StateError),
    /// Chain store failure.
    #[error(transparent)]
    Chain(#[from] ChainError),
}
