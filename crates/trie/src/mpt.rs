// The trie node representation in this module is modified from the
// original implementation of Zeth.
//
// Reference: https://github.com/risc0/zeth
//
// Copyright 2023 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use alloy_primitives::{keccak256, B256};
use alloy_rlp::{Decodable, Encodable, Header, EMPTY_STRING_CODE};
use alloy_trie::EMPTY_ROOT_HASH;
use std::sync::Mutex;
use std::{cmp, iter, mem};

/// A node of the in-memory Merkle Patricia Trie.
///
/// The node caches its own reference (inline bytes or Keccak digest) and
/// invalidates the cache on every mutation, so repeated root computations
/// after localized changes stay cheap.
#[derive(Debug, Default)]
pub struct MptNode {
    data: MptNodeData,
    cached_ref: Mutex<Option<NodeRef>>,
}

/// The payload of a trie node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MptNodeData {
    /// The empty trie.
    #[default]
    Null,
    /// Up to sixteen children indexed by nibble; branches carry no value.
    Branch([Option<Box<MptNode>>; 16]),
    /// Encoded path suffix and the stored value.
    Leaf(Vec<u8>, Vec<u8>),
    /// Encoded shared path prefix and the single child below it.
    Extension(Vec<u8>, Box<MptNode>),
}

/// How a node is referenced from its parent: short encodings are inlined,
/// longer ones are referenced by their Keccak digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRef {
    /// Direct RLP encoding, shorter than 32 bytes.
    Bytes(Vec<u8>),
    /// Keccak-256 digest of the RLP encoding.
    Digest(B256),
}

/// Structural trie failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrieError {
    /// A key is a strict prefix of another key; branches cannot carry
    /// values in this construction.
    #[error("branch node cannot carry a value")]
    ValueInBranch,
}

impl Clone for MptNode {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            cached_ref: Mutex::new(self.cached_ref.lock().unwrap().clone()),
        }
    }
}

impl PartialEq for MptNode {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for MptNode {}

impl From<MptNodeData> for MptNode {
    fn from(data: MptNodeData) -> Self {
        Self {
            data,
            cached_ref: Mutex::new(None),
        }
    }
}

impl Encodable for MptNode {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match &self.data {
            MptNodeData::Null => {
                out.put_u8(EMPTY_STRING_CODE);
            }
            MptNodeData::Branch(children) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                children.iter().for_each(|child| match child {
                    Some(node) => node.ref_encode(out),
                    None => out.put_u8(EMPTY_STRING_CODE),
                });
                // the canonical layout reserves a value slot in branches
                out.put_u8(EMPTY_STRING_CODE);
            }
            MptNodeData::Leaf(path, value) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                path.as_slice().encode(out);
                value.as_slice().encode(out);
            }
            MptNodeData::Extension(path, child) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                path.as_slice().encode(out);
                child.ref_encode(out);
            }
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl MptNode {
    /// True when this node represents the empty trie.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self.data, MptNodeData::Null)
    }

    /// The underlying node payload.
    #[inline]
    pub fn as_data(&self) -> &MptNodeData {
        &self.data
    }

    /// The 256-bit commitment to the whole trie below this node.
    #[inline]
    pub fn hash(&self) -> B256 {
        match self.data {
            MptNodeData::Null => EMPTY_ROOT_HASH,
            _ => match self.reference() {
                NodeRef::Digest(digest) => digest,
                NodeRef::Bytes(bytes) => keccak256(bytes),
            },
        }
    }

    /// Reference of this node as seen from a parent node.
    pub fn reference(&self) -> NodeRef {
        self.cached_ref
            .lock()
            .unwrap()
            .get_or_insert_with(|| self.compute_ref())
            .clone()
    }

    fn compute_ref(&self) -> NodeRef {
        match &self.data {
            MptNodeData::Null => NodeRef::Bytes(vec![EMPTY_STRING_CODE]),
            _ => {
                let encoded = alloy_rlp::encode(self);
                if encoded.len() < 32 {
                    NodeRef::Bytes(encoded)
                } else {
                    NodeRef::Digest(keccak256(encoded))
                }
            }
        }
    }

    fn ref_encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self.reference() {
            NodeRef::Bytes(bytes) => out.put_slice(&bytes),
            NodeRef::Digest(digest) => {
                out.put_u8(EMPTY_STRING_CODE + 32);
                out.put_slice(digest.as_slice());
            }
        }
    }

    fn ref_length(&self) -> usize {
        match self.reference() {
            NodeRef::Bytes(bytes) => bytes.len(),
            NodeRef::Digest(_) => 1 + 32,
        }
    }

    fn payload_length(&self) -> usize {
        match &self.data {
            MptNodeData::Null => 0,
            MptNodeData::Branch(children) => {
                1 + children
                    .iter()
                    .map(|child| child.as_ref().map_or(1, |node| node.ref_length()))
                    .sum::<usize>()
            }
            MptNodeData::Leaf(path, value) => {
                path.as_slice().length() + value.as_slice().length()
            }
            MptNodeData::Extension(path, child) => {
                path.as_slice().length() + child.ref_length()
            }
        }
    }

    fn invalidate_ref_cache(&mut self) {
        self.cached_ref.lock().unwrap().take();
    }

    /// The value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.get_at(&to_nibs(key))
    }

    /// The RLP-decoded value stored under `key`, if any.
    pub fn get_rlp<T: Decodable>(&self, key: &[u8]) -> alloy_rlp::Result<Option<T>> {
        match self.get(key) {
            Some(mut bytes) => Ok(Some(T::decode(&mut bytes)?)),
            None => Ok(None),
        }
    }

    fn get_at(&self, key_nibs: &[u8]) -> Option<&[u8]> {
        match &self.data {
            MptNodeData::Null => None,
            MptNodeData::Branch(children) => {
                let (index, tail) = key_nibs.split_first()?;
                children[*index as usize].as_ref()?.get_at(tail)
            }
            MptNodeData::Leaf(path, value) => {
                (path_nibs(path) == key_nibs).then_some(value.as_slice())
            }
            MptNodeData::Extension(path, child) => key_nibs
                .strip_prefix(path_nibs(path).as_slice())
                .and_then(|tail| child.get_at(tail)),
        }
    }

    /// Insert an already RLP-encoded value; returns `false` when the trie
    /// is unchanged.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<bool, TrieError> {
        self.insert_at(&to_nibs(key), value)
    }

    /// RLP-encode `value` and insert it.
    pub fn insert_rlp(&mut self, key: &[u8], value: impl Encodable) -> Result<bool, TrieError> {
        self.insert_at(&to_nibs(key), alloy_rlp::encode(&value))
    }

    fn insert_at(&mut self, key_nibs: &[u8], value: Vec<u8>) -> Result<bool, TrieError> {
        match &mut self.data {
            MptNodeData::Null => {
                self.data = MptNodeData::Leaf(to_encoded_path(key_nibs, true), value);
            }
            MptNodeData::Branch(children) => {
                let Some((index, tail)) = key_nibs.split_first() else {
                    return Err(TrieError::ValueInBranch);
                };
                let child = &mut children[*index as usize];
                match child {
                    Some(node) => {
                        if !node.insert_at(tail, value)? {
                            return Ok(false);
                        }
                    }
                    None => {
                        *child = Some(Box::new(
                            MptNodeData::Leaf(to_encoded_path(tail, true), value).into(),
                        ));
                    }
                }
            }
            MptNodeData::Leaf(path, old_value) => {
                let self_nibs = path_nibs(path);
                let common_len = lcp(&self_nibs, key_nibs);
                if common_len == self_nibs.len() && common_len == key_nibs.len() {
                    if *old_value == value {
                        return Ok(false);
                    }
                    *old_value = value;
                } else if common_len == self_nibs.len() || common_len == key_nibs.len() {
                    return Err(TrieError::ValueInBranch);
                } else {
                    let split_point = common_len + 1;
                    let mut children: [Option<Box<MptNode>>; 16] = Default::default();
                    children[self_nibs[common_len] as usize] = Some(Box::new(
                        MptNodeData::Leaf(
                            to_encoded_path(&self_nibs[split_point..], true),
                            mem::take(old_value),
                        )
                        .into(),
                    ));
                    children[key_nibs[common_len] as usize] = Some(Box::new(
                        MptNodeData::Leaf(to_encoded_path(&key_nibs[split_point..], true), value)
                            .into(),
                    ));
                    let branch = MptNodeData::Branch(children);
                    if common_len > 0 {
                        self.data = MptNodeData::Extension(
                            to_encoded_path(&self_nibs[..common_len], false),
                            Box::new(branch.into()),
                        );
                    } else {
                        self.data = branch;
                    }
                }
            }
            MptNodeData::Extension(path, existing_child) => {
                let self_nibs = path_nibs(path);
                let common_len = lcp(&self_nibs, key_nibs);
                if common_len == self_nibs.len() {
                    if !existing_child.insert_at(&key_nibs[common_len..], value)? {
                        return Ok(false);
                    }
                } else if common_len == key_nibs.len() {
                    return Err(TrieError::ValueInBranch);
                } else {
                    let split_point = common_len + 1;
                    let mut children: [Option<Box<MptNode>>; 16] = Default::default();
                    children[self_nibs[common_len] as usize] = if split_point < self_nibs.len() {
                        Some(Box::new(
                            MptNodeData::Extension(
                                to_encoded_path(&self_nibs[split_point..], false),
                                mem::take(existing_child),
                            )
                            .into(),
                        ))
                    } else {
                        Some(mem::take(existing_child))
                    };
                    children[key_nibs[common_len] as usize] = Some(Box::new(
                        MptNodeData::Leaf(to_encoded_path(&key_nibs[split_point..], true), value)
                            .into(),
                    ));
                    let branch = MptNodeData::Branch(children);
                    if common_len > 0 {
                        self.data = MptNodeData::Extension(
                            to_encoded_path(&self_nibs[..common_len], false),
                            Box::new(branch.into()),
                        );
                    } else {
                        self.data = branch;
                    }
                }
            }
        }

        self.invalidate_ref_cache();
        Ok(true)
    }

    /// Remove `key` from the trie; returns `false` when it was absent.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool, TrieError> {
        self.remove_at(&to_nibs(key))
    }

    fn remove_at(&mut self, key_nibs: &[u8]) -> Result<bool, TrieError> {
        match &mut self.data {
            MptNodeData::Null => return Ok(false),
            MptNodeData::Branch(children) => {
                let Some((index, tail)) = key_nibs.split_first() else {
                    return Err(TrieError::ValueInBranch);
                };
                let child = &mut children[*index as usize];
                match child {
                    Some(node) => {
                        if !node.remove_at(tail)? {
                            return Ok(false);
                        }
                        if node.is_empty() {
                            *child = None;
                        }
                    }
                    None => return Ok(false),
                }

                let mut remaining = children.iter_mut().enumerate().filter(|(_, n)| n.is_some());
                // a branch always retains at least one child after a removal
                let (index, node) = remaining.next().unwrap();
                if remaining.next().is_none() {
                    // only one child is left, fold the branch away
                    let mut orphan = node.take().unwrap();
                    match &mut orphan.data {
                        MptNodeData::Leaf(path, value) => {
                            let nibs: Vec<_> =
                                iter::once(index as u8).chain(path_nibs(path)).collect();
                            self.data = MptNodeData::Leaf(
                                to_encoded_path(&nibs, true),
                                mem::take(value),
                            );
                        }
                        MptNodeData::Extension(path, child) => {
                            let nibs: Vec<_> =
                                iter::once(index as u8).chain(path_nibs(path)).collect();
                            self.data = MptNodeData::Extension(
                                to_encoded_path(&nibs, false),
                                mem::take(child),
                            );
                        }
                        MptNodeData::Branch(_) => {
                            self.data = MptNodeData::Extension(
                                to_encoded_path(&[index as u8], false),
                                orphan,
                            );
                        }
                        MptNodeData::Null => unreachable!(),
                    }
                }
            }
            MptNodeData::Leaf(path, _) => {
                if path_nibs(path) != key_nibs {
                    return Ok(false);
                }
                self.data = MptNodeData::Null;
            }
            MptNodeData::Extension(path, child) => {
                let mut self_nibs = path_nibs(path);
                let Some(tail) = key_nibs.strip_prefix(self_nibs.as_slice()) else {
                    return Ok(false);
                };
                if !child.remove_at(tail)? {
                    return Ok(false);
                }

                // an extension must keep pointing at a branch; fold anything
                // shorter into this node
                match &mut child.data {
                    MptNodeData::Null => {
                        self.data = MptNodeData::Null;
                    }
                    MptNodeData::Leaf(path, value) => {
                        self_nibs.extend(path_nibs(path));
                        self.data = MptNodeData::Leaf(
                            to_encoded_path(&self_nibs, true),
                            mem::take(value),
                        );
                    }
                    MptNodeData::Extension(path, node) => {
                        self_nibs.extend(path_nibs(path));
                        self.data = MptNodeData::Extension(
                            to_encoded_path(&self_nibs, false),
                            mem::take(node),
                        );
                    }
                    MptNodeData::Branch(_) => {}
                }
            }
        }

        self.invalidate_ref_cache();
        Ok(true)
    }
}

/// Split a byte slice into its nibbles, high half first.
pub fn to_nibs(slice: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(2 * slice.len());
    for byte in slice {
        result.push(byte >> 4);
        result.push(byte & 0xf);
    }
    result
}

/// Pack nibbles into the hex-prefix path encoding; `is_leaf` selects the
/// leaf or extension flag.
pub fn to_encoded_path(mut nibs: &[u8], is_leaf: bool) -> Vec<u8> {
    let mut prefix = (is_leaf as u8) * 0x20;
    if nibs.len() % 2 != 0 {
        prefix += 0x10 + nibs[0];
        nibs = &nibs[1..];
    }
    iter::once(prefix)
        .chain(nibs.chunks_exact(2).map(|byte| (byte[0] << 4) + byte[1]))
        .collect()
}

fn path_nibs(path: &[u8]) -> Vec<u8> {
    let (prefix, tail) = path.split_first().unwrap();
    let is_odd = prefix & (1 << 4) != 0;

    let mut result = Vec::with_capacity(2 * tail.len() + is_odd as usize);
    if is_odd {
        result.push(prefix & 0xf);
    }
    for nib in tail {
        result.push(nib >> 4);
        result.push(nib & 0xf);
    }
    result
}

fn lcp(a: &[u8], b: &[u8]) -> usize {
    for (i, (a, b)) in iter::zip(a, b).enumerate() {
        if a != b {
            return i;
        }
    }
    cmp::min(a.len(), b.len())
}
