//! Transaction pool with pending and queued partitions.
//!
//! *Pending* transactions are executable now: their nonces extend the
//! sender's on-chain nonce contiguously. *Queued* transactions wait for a
//! nonce gap to close and are promoted the moment it does. The pool is
//! purely in-memory; the owner guards it with a single mutex.

use ember_primitives::{Address, Transaction, TxHash, U256};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

/// Admission failures raised by the pool itself.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
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
}

/// A pooled transaction with its arrival stamp.
#[derive(Clone, Debug)]
pub struct PoolTx {
    /// The transaction itself.
    pub tx: Transaction,
    /// Hash of the transaction, computed once on admission.
    pub hash: TxHash,
    /// Arrival stamp used to break gas-price ties, earliest first.
    pub arrival: u64,
    pending: bool,
}

impl PoolTx {
    /// True when the transaction sits in the pending partition.
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Iteration key of the pending partition: highest gas price first,
/// earliest arrival wins ties.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingKey {
    gas_price: U256,
    arrival: u64,
    hash: TxHash,
}

impl Ord for PendingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .gas_price
            .cmp(&self.gas_price)
            .then(self.arrival.cmp(&other.arrival))
            .then(self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for PendingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-sender bookkeeping.
///
/// `chain_nonce + pending` is the nonce the sender's next pending
/// transaction must carry; the value is invariant under block inclusion,
/// which bumps `chain_nonce` exactly as it shrinks `pending`.
#[derive(Clone, Copy, Debug, Default)]
struct SenderInfo {
    chain_nonce: u64,
    pending: u64,
    total: u64,
}

/// The dual-partition transaction pool.
#[derive(Debug, Default)]
pub struct TxPool {
    all: HashMap<TxHash, PoolTx>,
    pending: BTreeSet<PendingKey>,
    queued: BTreeSet<(Address, u64, TxHash)>,
    index: HashMap<(Address, u64), TxHash>,
    senders: HashMap<Address, SenderInfo>,
    arrivals: u64,
}

impl TxPool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pooled transactions across both partitions.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// True when nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Number of pending transactions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of queued transactions.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// True when `hash` is pooled in either partition.
    pub fn contains(&self, hash: &TxHash) -> bool {
        self.all.contains_key(hash)
    }

    /// The pooled entry for `hash`, if any.
    pub fn get(&self, hash: &TxHash) -> Option<&PoolTx> {
        self.all.get(hash)
    }

    /// Number of pooled transactions from `sender`, both partitions.
    pub fn sender_entries(&self, sender: Address) -> u64 {
        self.senders.get(&sender).map(|info| info.total).unwrap_or(0)
    }

    /// True when `sender` already has a pooled transaction with `nonce`.
    pub fn has_nonce(&self, sender: Address, nonce: u64) -> bool {
        self.index.contains_key(&(sender, nonce))
    }

    /// Admit a transaction given the sender's current on-chain nonce.
    ///
    /// The transaction lands in *pending* when its nonce extends the
    /// sender's contiguous run, otherwise in *queued*; each successful add
    /// re-runs promotion for the sender.
    pub fn add(&mut self, tx: Transaction, on_chain_nonce: u64) -> Result<(), PoolError> {
        let hash = tx.hash();
        if self.all.contains_key(&hash) {
            return Err(PoolError::DuplicateHash(hash));
        }
        if tx.nonce < on_chain_nonce {
            return Err(PoolError::NonceTooLow {
                got: tx.nonce,
                expected: on_chain_nonce,
            });
        }
        let sender = tx.from;
        if self.index.contains_key(&(sender, tx.nonce)) {
            return Err(PoolError::NonceConflict(tx.nonce));
        }

        let info = self.senders.entry(sender).or_default();
        info.chain_nonce = on_chain_nonce;
        let pending = tx.nonce == info.chain_nonce + info.pending;
        info.total += 1;

        let arrival = self.arrivals;
        self.arrivals += 1;

        if pending {
            self.senders.get_mut(&sender).expect("entry above").pending += 1;
            self.pending.insert(PendingKey {
                gas_price: tx.gas_price,
                arrival,
                hash,
            });
        } else {
            self.queued.insert((sender, tx.nonce, hash));
        }
        self.index.insert((sender, tx.nonce), hash);
        self.all.insert(
            hash,
            PoolTx {
                tx,
                hash,
                arrival,
                pending,
            },
        );
        trace!(%hash, %sender, pending, "pooled transaction");

        self.promote(sender);
        Ok(())
    }

    /// Move queued transactions of `sender` whose nonces have become
    /// contiguous onto the end of the pending run.
    fn promote(&mut self, sender: Address) {
        loop {
            let Some(info) = self.senders.get(&sender).copied() else {
                return;
            };
            let expected = info.chain_nonce + info.pending;
            let Some(&hash) = self.index.get(&(sender, expected)) else {
                return;
            };
            let entry = self.all.get_mut(&hash).expect("indexed entries exist");
            if entry.pending {
                return;
            }
            entry.pending = true;
            self.queued.remove(&(sender, expected, hash));
            self.pending.insert(PendingKey {
                gas_price: entry.tx.gas_price,
                arrival: entry.arrival,
                hash,
            });
            self.senders.get_mut(&sender).expect("entry above").pending += 1;
            trace!(%hash, %sender, nonce = expected, "promoted transaction");
        }
    }

    /// Select pending transactions for a block: descending gas price,
    /// per-sender nonce order, stopping at `max_count` transactions or when
    /// the next candidate would push cumulative `gas_limit` past `max_gas`.
    ///
    /// Selected entries stay pooled until [`TxPool::remove_many`].
    pub fn take_for_block(&self, max_count: usize, max_gas: u64) -> Vec<Transaction> {
        let mut selected = Vec::new();
        let mut taken: HashSet<TxHash> = HashSet::new();
        let mut next_nonce: HashMap<Address, u64> = HashMap::new();
        let mut gas_total = 0u64;

        'outer: loop {
            let mut progressed = false;
            for key in &self.pending {
                if selected.len() >= max_count {
                    break 'outer;
                }
                if taken.contains(&key.hash) {
                    continue;
                }
                let entry = &self.all[&key.hash];
                let sender = entry.tx.from;
                let next = next_nonce.entry(sender).or_insert_with(|| {
                    self.senders
                        .get(&sender)
                        .map(|info| info.chain_nonce)
                        .unwrap_or(entry.tx.nonce)
                });
                if entry.tx.nonce != *next {
                    // a cheaper lower nonce of this sender must go first
                    continue;
                }
                if gas_total.saturating_add(entry.tx.gas_limit) > max_gas {
                    break 'outer;
                }
                gas_total += entry.tx.gas_limit;
                *next += 1;
                taken.insert(key.hash);
                selected.push(entry.tx.clone());
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        selected
    }

    /// Drop the given hashes from both partitions, then re-run promotion
    /// for every affected sender. Unknown hashes are ignored.
    ///
    /// Removed pending entries are assumed to have been included in a
    /// block, advancing the sender's tracked on-chain nonce.
    pub fn remove_many(&mut self, hashes: &[TxHash]) {
        let mut touched: HashSet<Address> = HashSet::new();
        for hash in hashes {
            let Some(entry) = self.all.remove(hash) else {
                continue;
            };
            let sender = entry.tx.from;
            self.index.remove(&(sender, entry.tx.nonce));
            let info = self.senders.get_mut(&sender).expect("entry for pooled tx");
            info.total -= 1;
            if entry.pending {
                self.pending.remove(&PendingKey {
                    gas_price: entry.tx.gas_price,
                    arrival: entry.arrival,
                    hash: *hash,
                });
                info.pending -= 1;
                // idempotent against an add() that already refreshed the
                // on-chain nonce from committed state
                info.chain_nonce = info.chain_nonce.max(entry.tx.nonce + 1);
            } else {
                self.queued.remove(&(sender, entry.tx.nonce, *hash));
            }
            if info.total == 0 {
                self.senders.remove(&sender);
            }
            touched.insert(sender);
        }
        for sender in touched {
            self.promote(sender);
        }
    }
}
