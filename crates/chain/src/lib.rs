//! Content-addressed block storage over a KV namespace.

mod store;

pub use store::{ChainError, ChainStore, TxLookup};
