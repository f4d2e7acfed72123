use crate::{keccak256, Address, Bloom, Transaction, B256};
use alloy_rlp::{length_of_length, Decodable, Encodable, Header};

/// Parent hash carried by the genesis block.
pub const GENESIS_PARENT_HASH: B256 = B256::ZERO;

/// Block header; its Keccak-256 RLP digest is the block hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Height of the block, genesis is zero.
    pub number: u64,
    /// Hash of the parent header, zero for genesis.
    pub parent_hash: B256,
    /// Proposal time in milliseconds since the Unix epoch, strictly greater
    /// than the parent's.
    pub timestamp_ms: u64,
    /// Address credited with fees and the block reward.
    pub proposer: Address,
    /// State-trie root after executing the block.
    pub state_root: B256,
    /// Root of the trie keyed by `rlp(index) -> rlp(tx)`.
    pub transactions_root: B256,
    /// Root of the trie keyed by `rlp(index) -> rlp(receipt)`.
    pub receipts_root: B256,
    /// OR of all per-receipt bloom filters.
    pub logs_bloom: Bloom,
    /// Number of transactions in the body.
    pub transaction_count: u64,
}

impl BlockHeader {
    /// Block hash: Keccak-256 of the RLP-encoded header.
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    fn payload_length(&self) -> usize {
        self.number.length()
            + self.parent_hash.length()
            + self.timestamp_ms.length()
            + self.proposer.length()
            + self.state_root.length()
            + self.transactions_root.length()
            + self.receipts_root.length()
            + self.logs_bloom.length()
            + self.transaction_count.length()
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.number.encode(out);
        self.parent_hash.encode(out);
        self.timestamp_ms.encode(out);
        self.proposer.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.transaction_count.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for BlockHeader {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let this = Self {
            number: u64::decode(buf)?,
            parent_hash: B256::decode(buf)?,
            timestamp_ms: u64::decode(buf)?,
            proposer: Address::decode(buf)?,
            state_root: B256::decode(buf)?,
            transactions_root: B256::decode(buf)?,
            receipts_root: B256::decode(buf)?,
            logs_bloom: Bloom::decode(buf)?,
            transaction_count: u64::decode(buf)?,
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

/// A block: header plus the ordered transaction list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// The sealed header.
    pub header: BlockHeader,
    /// Transactions in execution order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Hash of the enclosed header.
    #[inline]
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Height of the enclosed header.
    #[inline]
    pub fn number(&self) -> u64 {
        self.header.number
    }
}
