use ember_kv::KeyValueStore;
use ember_primitives::{constants::TX_GAS, Address, Bytes, Log, Transaction, U256};
use ember_state::{StateDb, StateError, StateManager};
use std::fmt::Debug;

/// Immutable context of the block being built.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionContext {
    /// Chain id the transactions were signed for.
    pub chain_id: u64,
    /// Height of the block under construction.
    pub block_number: u64,
    /// Timestamp of the block under construction.
    pub timestamp_ms: u64,
    /// Address credited with fees.
    pub proposer: Address,
}

/// What a successfully applied transaction produced.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    /// Gas actually consumed.
    pub gas_used: u64,
    /// Log records emitted during execution.
    pub logs: Vec<Log>,
    /// Deployed contract address, on successful creation only.
    pub contract_address: Option<Address>,
}

/// Reasons a single transaction fails at execution time.
///
/// Everything except [`ExecutionError::State`] produces a status-0 receipt;
/// a state failure aborts the whole block attempt instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The balance no longer covers `value + fee`, typically because an
    /// earlier transaction in the same block drained it.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Total the sender must pay.
        required: U256,
        /// Balance at execution time.
        available: U256,
    },
    /// The account nonce moved between selection and execution.
    #[error("nonce mismatch: transaction {tx_nonce}, account {account_nonce}")]
    NonceMismatch {
        /// Nonce carried by the transaction.
        tx_nonce: u64,
        /// The account's nonce at execution time.
        account_nonce: u64,
    },
    /// Fee arithmetic overflowed 256 bits.
    #[error("fee overflow")]
    FeeOverflow,
    /// This executor cannot run the transaction kind.
    #[error("contract execution is not available")]
    VmUnavailable,
    /// State access failed; aborts the slot rather than the transaction.
    #[error(transparent)]
    State(#[from] StateError),
}

/// The pluggable execution seam.
///
/// The block producer drives any implementation through the journaled
/// state manager; the contract virtual machine is one such implementation
/// living outside this workspace.
pub trait TransactionExecutor<S: KeyValueStore>: Debug + Send + Sync {
    /// Apply `tx` to the journaled state and report the observed outcome.
    fn execute(
        &self,
        tx: &Transaction,
        ctx: &ExecutionContext,
        state: &mut StateManager<S>,
    ) -> Result<ExecutionOutcome, ExecutionError>;

    /// Read-only call into contract state, no state change.
    ///
    /// The default engine has no virtual machine and returns empty output.
    fn call(
        &self,
        _to: Address,
        _data: &Bytes,
        _from: Option<Address>,
        _state: &StateDb<S>,
    ) -> Result<Bytes, StateError> {
        Ok(Bytes::new())
    }
}

/// The built-in pure value-transfer path: debit `value + gas * price` from
/// the sender, credit the recipient and the proposer, bump the nonce.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferExecutor;

impl<S: KeyValueStore> TransactionExecutor<S> for TransferExecutor {
    fn execute(
        &self,
        tx: &Transaction,
        ctx: &ExecutionContext,
        state: &mut StateManager<S>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(recipient) = tx.to else {
            return Err(ExecutionError::VmUnavailable);
        };

        let mut sender = state.account(tx.from)?.unwrap_or_default();
        if tx.nonce != sender.nonce {
            return Err(ExecutionError::NonceMismatch {
                tx_nonce: tx.nonce,
                account_nonce: sender.nonce,
            });
        }

        let gas_used = TX_GAS;
        let fee = tx
            .gas_price
            .checked_mul(U256::from(gas_used))
            .ok_or(ExecutionError::FeeOverflow)?;
        let required = tx
            .value
            .checked_add(fee)
            .ok_or(ExecutionError::FeeOverflow)?;
        if sender.balance < required {
            return Err(ExecutionError::InsufficientBalance {
                required,
                available: sender.balance,
            });
        }

        sender.balance -= required;
        sender.nonce += 1;
        state.set_account(tx.from, sender);
        state.credit(recipient, tx.value)?;
        state.credit(ctx.proposer, fee)?;

        Ok(ExecutionOutcome {
            gas_used,
            logs: Vec::new(),
            contract_address: None,
        })
    }
}
