//! Execution core of the node: the pluggable transaction executor, the
//! transaction service, the slot-driven block producer, and the query
//! facade consumed by the outer RPC layer.

pub mod api;
mod error;
mod executor;
mod genesis;
mod node;
mod producer;
mod service;

pub use error::{AdmissionError, NodeError, ProducerError};
pub use executor::{
    ExecutionContext, ExecutionError, ExecutionOutcome, TransactionExecutor, TransferExecutor,
};
pub use genesis::{GenesisConfig, GenesisError};
pub use node::{LogEntry, LogFilter, Node, TxView};
pub use producer::{BlockProducer, SlotClock};
pub use service::{TxOptions, TxService};

use ember_pool::TxPool;
use ember_state::StateManager;
use std::sync::{Arc, Mutex, RwLock};

/// Shared handle to the journaled state manager.
pub type SharedState<S> = Arc<RwLock<StateManager<S>>>;

/// Shared handle to the transaction pool.
pub type SharedPool = Arc<Mutex<TxPool>>;
