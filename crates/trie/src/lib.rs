//! In-memory Merkle Patricia Trie.
//!
//! Every node is held in memory and fully resolved; the root hash commits
//! to the entire structure. Branch nodes cannot carry values, matching the
//! construction of account and index tries in this system.

use alloy_primitives::{keccak256, B256};
use alloy_trie::EMPTY_ROOT_HASH;

mod mpt;

pub use mpt::{to_encoded_path, to_nibs, MptNode, MptNodeData, NodeRef, TrieError};

/// Root of the trie mapping `rlp(index)` to the given RLP-encoded values,
/// in iteration order starting at index zero.
///
/// Used for the transactions and receipts roots of a block; an empty
/// iterator yields the well-known empty-trie root.
pub fn ordered_trie_root<I>(items: I) -> B256
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let mut trie = MptNode::default();
    for (index, value) in items.into_iter().enumerate() {
        trie.insert(&alloy_rlp::encode(index as u64), value)
            .expect("rlp index keys are prefix-free");
    }
    trie.hash()
}

/// Root of the trie mapping `keccak256(key)` to the given RLP-encoded
/// values.
pub fn hashed_trie_root<K, I>(entries: I) -> B256
where
    K: AsRef<[u8]>,
    I: IntoIterator<Item = (K, Vec<u8>)>,
{
    let mut trie = MptNode::default();
    for (key, value) in entries {
        trie.insert(keccak256(key.as_ref()).as_slice(), value)
            .expect("hashed keys are fixed width");
    }
    trie.hash()
}

/// The well-known root hash of an empty trie.
pub const fn empty_root() -> B256 {
    EMPTY_ROOT_HASH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_iterators_hash_to_empty_root() {
        assert_eq!(ordered_trie_root(std::iter::empty()), empty_root());
        assert_eq!(
            hashed_trie_root(std::iter::empty::<(&[u8], Vec<u8>)>()),
            empty_root()
        );
    }

    #[test]
    fn ordered_root_depends_on_order() {
        let a = alloy_rlp::encode(1u64);
        let b = alloy_rlp::encode(2u64);
        let forward = ordered_trie_root(vec![a.clone(), b.clone()]);
        let backward = ordered_trie_root(vec![b, a]);
        assert_ne!(forward, backward);
    }
}
