//! Umbrella crate for the emberchain libraries.

pub use ember_chain as chain;
pub use ember_core as core;
pub use ember_kv as kv;
pub use ember_pool as pool;
pub use ember_primitives as primitives;
pub use ember_state as state;
pub use ember_trie as trie;
