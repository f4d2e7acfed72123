use alloy_rlp::{length_of_length, Decodable, Encodable, Header};
use ember_kv::{KeyValueStore, KvError, WriteBatch};
use ember_primitives::{Block, BlockHeader, Receipt, Transaction, TxHash, B256};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::debug;

/// Default capacity of the header cache.
const HEADER_CACHE_CAPACITY: usize = 10_000;

/// Single-byte key prefixes of the chain namespace.
mod keys {
    use ember_primitives::{TxHash, B256};

    /// `"H" ++ u64_be(num) -> hash`, the canonical number index.
    pub(super) fn canonical(number: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(b'H');
        key.extend_from_slice(&number.to_be_bytes());
        key
    }

    /// `"n" ++ hash -> u64_be(num)`, the reverse index.
    pub(super) fn number(hash: B256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'n');
        key.extend_from_slice(hash.as_slice());
        key
    }

    /// `"h" ++ u64_be(num) ++ hash -> rlp(header)`.
    pub(super) fn header(number: u64, hash: B256) -> Vec<u8> {
        let mut key = Vec::with_capacity(41);
        key.push(b'h');
        key.extend_from_slice(&number.to_be_bytes());
        key.extend_from_slice(hash.as_slice());
        key
    }

    /// `"b" ++ u64_be(num) ++ hash -> rlp(body)`.
    pub(super) fn body(number: u64, hash: B256) -> Vec<u8> {
        let mut key = Vec::with_capacity(41);
        key.push(b'b');
        key.extend_from_slice(&number.to_be_bytes());
        key.extend_from_slice(hash.as_slice());
        key
    }

    /// `"r" ++ tx_hash -> rlp(receipt)`.
    pub(super) fn receipt(tx_hash: TxHash) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'r');
        key.extend_from_slice(tx_hash.as_slice());
        key
    }

    /// `"l" ++ tx_hash -> rlp([block_hash, block_number, tx_index])`.
    pub(super) fn lookup(tx_hash: TxHash) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'l');
        key.extend_from_slice(tx_hash.as_slice());
        key
    }

    /// The chain tip pointer.
    pub(super) const TIP: &[u8] = b"LastBlock";
}

/// Failures of the chain store.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] KvError),
    /// A persisted row cannot be decoded.
    #[error("corrupt chain row: {0}")]
    Corrupt(String),
}

/// Where a mined transaction lives: block hash, block number, index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxLookup {
    /// Hash of the enclosing block.
    pub block_hash: B256,
    /// Number of the enclosing block.
    pub block_number: u64,
    /// Index of the transaction inside the block.
    pub tx_index: u64,
}

impl TxLookup {
    fn payload_length(&self) -> usize {
        self.block_hash.length() + self.block_number.length() + self.tx_index.length()
    }
}

impl Encodable for TxLookup {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.block_hash.encode(out);
        self.block_number.encode(out);
        self.tx_index.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for TxLookup {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let this = Self {
            block_hash: B256::decode(buf)?,
            block_number: u64::decode(buf)?,
            tx_index: u64::decode(buf)?,
        };
        let consumed = started_len - buf.len();
        if consumed != header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: header.payload_length,
                got: consumed,
            });
        }
        Ok(this)
    }
}

/// Block header/body/receipt layout over a KV namespace, with an LRU header
/// cache in front of the disk rows.
///
/// `save_block` writes every row of a block plus the tip pointer in one
/// atomic batch; a reader that observes the new tip observes the complete
/// block. The header cache is only updated after the batch commits.
#[derive(Debug)]
pub struct ChainStore<S> {
    store: S,
    header_cache: Mutex<LruCache<B256, BlockHeader>>,
}

impl<S: KeyValueStore> ChainStore<S> {
    /// Open over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            header_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(HEADER_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Persist a block, its receipts, and the tip pointer atomically.
    pub fn save_block(&self, block: &Block, receipts: &[Receipt]) -> Result<(), ChainError> {
        let hash = block.hash();
        let number = block.number();

        let mut batch = WriteBatch::new();
        batch.put(keys::canonical(number), hash.to_vec());
        batch.put(keys::number(hash), number.to_be_bytes().to_vec());
        batch.put(keys::header(number, hash), alloy_rlp::encode(&block.header));
        batch.put(keys::body(number, hash), alloy_rlp::encode(&block.transactions));
        for receipt in receipts {
            batch.put(keys::receipt(receipt.tx_hash), alloy_rlp::encode(receipt));
        }
        for (index, tx) in block.transactions.iter().enumerate() {
            let lookup = TxLookup {
                block_hash: hash,
                block_number: number,
                tx_index: index as u64,
            };
            batch.put(keys::lookup(tx.hash()), alloy_rlp::encode(lookup));
        }
        batch.put(keys::TIP.to_vec(), hash.to_vec());

        self.store.write_batch(batch)?;
        debug!(number, %hash, txs = block.transactions.len(), "block persisted");

        // only a committed block may enter the cache
        self.header_cache
            .lock()
            .expect("cache lock poisoned")
            .put(hash, block.header.clone());
        Ok(())
    }

    /// Hash of the chain tip, `None` before genesis.
    pub fn tip_hash(&self) -> Result<Option<B256>, ChainError> {
        match self.store.get(keys::TIP)? {
            Some(raw) if raw.len() == 32 => Ok(Some(B256::from_slice(&raw))),
            Some(_) => Err(ChainError::Corrupt("tip pointer is not 32 bytes".into())),
            None => Ok(None),
        }
    }

    /// Height of the chain tip, `None` before genesis.
    pub fn chain_height(&self) -> Result<Option<u64>, ChainError> {
        match self.tip_hash()? {
            Some(hash) => Ok(self.block_number(hash)?),
            None => Ok(None),
        }
    }

    /// Number of the block with `hash` via the reverse index.
    pub fn block_number(&self, hash: B256) -> Result<Option<u64>, ChainError> {
        match self.store.get(&keys::number(hash))? {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| ChainError::Corrupt("number row is not 8 bytes".into()))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Canonical hash at `number`.
    pub fn canonical_hash(&self, number: u64) -> Result<Option<B256>, ChainError> {
        match self.store.get(&keys::canonical(number))? {
            Some(raw) if raw.len() == 32 => Ok(Some(B256::from_slice(&raw))),
            Some(_) => Err(ChainError::Corrupt("canonical row is not 32 bytes".into())),
            None => Ok(None),
        }
    }

    /// Header of the block with `hash`, preferring the cache.
    pub fn find_header(&self, number: u64, hash: B256) -> Result<Option<BlockHeader>, ChainError> {
        if let Some(header) = self
            .header_cache
            .lock()
            .expect("cache lock poisoned")
            .get(&hash)
        {
            return Ok(Some(header.clone()));
        }
        match self.store.get(&keys::header(number, hash))? {
            Some(raw) => {
                let header = BlockHeader::decode(&mut raw.as_slice())
                    .map_err(|err| ChainError::Corrupt(err.to_string()))?;
                self.header_cache
                    .lock()
                    .expect("cache lock poisoned")
                    .put(hash, header.clone());
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    /// Canonical header at `number`.
    pub fn find_header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, ChainError> {
        match self.canonical_hash(number)? {
            Some(hash) => self.find_header(number, hash),
            None => Ok(None),
        }
    }

    /// Canonical block at `number`; the body always comes from disk.
    pub fn find_by_number(&self, number: u64) -> Result<Option<Block>, ChainError> {
        let Some(hash) = self.canonical_hash(number)? else {
            return Ok(None);
        };
        self.assemble(number, hash)
    }

    /// Block with `hash`, via the reverse index.
    pub fn find_by_hash(&self, hash: B256) -> Result<Option<Block>, ChainError> {
        let Some(number) = self.block_number(hash)? else {
            return Ok(None);
        };
        self.assemble(number, hash)
    }

    /// The chain tip block, `None` before genesis.
    pub fn find_latest(&self) -> Result<Option<Block>, ChainError> {
        match self.tip_hash()? {
            Some(hash) => self.find_by_hash(hash),
            None => Ok(None),
        }
    }

    fn assemble(&self, number: u64, hash: B256) -> Result<Option<Block>, ChainError> {
        let Some(header) = self.find_header(number, hash)? else {
            return Ok(None);
        };
        let Some(raw) = self.store.get(&keys::body(number, hash))? else {
            return Ok(None);
        };
        let transactions = Vec::<Transaction>::decode(&mut raw.as_slice())
            .map_err(|err| ChainError::Corrupt(err.to_string()))?;
        Ok(Some(Block {
            header,
            transactions,
        }))
    }

    /// Receipt of a mined transaction.
    pub fn find_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, ChainError> {
        match self.store.get(&keys::receipt(tx_hash))? {
            Some(raw) => Receipt::decode(&mut raw.as_slice())
                .map(Some)
                .map_err(|err| ChainError::Corrupt(err.to_string())),
            None => Ok(None),
        }
    }

    /// Location of a mined transaction.
    pub fn find_tx_lookup(&self, tx_hash: TxHash) -> Result<Option<TxLookup>, ChainError> {
        match self.store.get(&keys::lookup(tx_hash))? {
            Some(raw) => TxLookup::decode(&mut raw.as_slice())
                .map(Some)
                .map_err(|err| ChainError::Corrupt(err.to_string())),
            None => Ok(None),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
