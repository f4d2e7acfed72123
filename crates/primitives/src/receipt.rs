use crate::{
    transaction::decode_opt_address, Address, Bloom, BloomInput, Log, B256,
};
use alloy_rlp::{length_of_length, Decodable, Encodable, Header, EMPTY_STRING_CODE};

/// Post-execution record of one transaction inside a block.
///
/// One canonical RLP encoding is used both for persistence and as the value
/// in the receipts trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: B256,
    /// Position of the transaction within its block.
    pub tx_index: u64,
    /// Hash of the enclosing block.
    pub block_hash: B256,
    /// Number of the enclosing block.
    pub block_number: u64,
    /// Transaction sender.
    pub from: Address,
    /// Transaction recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Execution status: `true` for success, `false` for a reverted charge.
    pub success: bool,
    /// Gas consumed by this transaction alone.
    pub gas_used: u64,
    /// Gas consumed by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Deployed contract address, set only on successful creation.
    pub contract_address: Option<Address>,
    /// Ordered log records emitted during execution.
    pub logs: Vec<Log>,
    /// 2048-bit filter over the log addresses and topics.
    pub logs_bloom: Bloom,
}

impl Receipt {
    /// Consensus encoding used as the value in the receipts trie:
    /// `rlp([status, cumulative_gas_used, logs_bloom, logs])`.
    ///
    /// The per-chain context (block hash, indices) is excluded so the root
    /// can be sealed into the header that defines that context.
    pub fn rlp_consensus(&self) -> Vec<u8> {
        let payload_length = self.success.length()
            + self.cumulative_gas_used.length()
            + self.logs_bloom.length()
            + self.logs.length();
        let mut out = Vec::with_capacity(payload_length + length_of_length(payload_length));
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.success.encode(&mut out);
        self.cumulative_gas_used.encode(&mut out);
        self.logs_bloom.encode(&mut out);
        self.logs.encode(&mut out);
        out
    }

    fn payload_length(&self) -> usize {
        self.tx_hash.length()
            + self.tx_index.length()
            + self.block_hash.length()
            + self.block_number.length()
            + self.from.length()
            + opt_length(&self.to)
            + self.success.length()
            + self.gas_used.length()
            + self.cumulative_gas_used.length()
            + opt_length(&self.contract_address)
            + self.logs.length()
            + self.logs_bloom.length()
    }
}

fn opt_length(addr: &Option<Address>) -> usize {
    match addr {
        Some(addr) => addr.length(),
        None => 1,
    }
}

fn encode_opt(addr: &Option<Address>, out: &mut dyn alloy_rlp::BufMut) {
    match addr {
        Some(addr) => addr.encode(out),
        None => out.put_u8(EMPTY_STRING_CODE),
    }
}

impl Encodable for Receipt {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx_hash.encode(out);
        self.tx_index.encode(out);
        self.block_hash.encode(out);
        self.block_number.encode(out);
        self.from.encode(out);
        encode_opt(&self.to, out);
        self.success.encode(out);
        self.gas_used.encode(out);
        self.cumulative_gas_used.encode(out);
        encode_opt(&self.contract_address, out);
        self.logs.encode(out);
        self.logs_bloom.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for Receipt {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let this = Self {
            tx_hash: B256::decode(buf)?,
            tx_index: u64::decode(buf)?,
            block_hash: B256::decode(buf)?,
            block_number: u64::decode(buf)?,
            from: Address::decode(buf)?,
            to: decode_opt_address(buf)?,
            success: bool::decode(buf)?,
            gas_used: u64::decode(buf)?,
            cumulative_gas_used: u64::decode(buf)?,
            contract_address: decode_opt_address(buf)?,
            logs: Vec::<Log>::decode(buf)?,
            logs_bloom: Bloom::decode(buf)?,
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

/// Fold log addresses and topics into a 2048-bit bloom filter.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::default();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_slice()));
        for topic in log.topics() {
            bloom.accrue(BloomInput::Raw(topic.as_slice()));
        }
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogData;

    fn sample_log() -> Log {
        Log {
            address: Address::with_last_byte(9),
            data: LogData::new_unchecked(
                vec![B256::with_last_byte(1), B256::with_last_byte(2)],
                crate::Bytes::from(vec![0xaa, 0xbb]),
            ),
        }
    }

    #[test]
    fn rlp_roundtrip() {
        let logs = vec![sample_log()];
        let receipt = Receipt {
            tx_hash: B256::with_last_byte(3),
            tx_index: 1,
            block_hash: B256::with_last_byte(4),
            block_number: 10,
            from: Address::with_last_byte(1),
            to: None,
            success: true,
            gas_used: 21_000,
            cumulative_gas_used: 42_000,
            contract_address: Some(Address::with_last_byte(7)),
            logs_bloom: logs_bloom(&logs),
            logs,
        };
        let encoded = alloy_rlp::encode(&receipt);
        assert_eq!(encoded.len(), receipt.length());
        assert_eq!(Receipt::decode(&mut encoded.as_slice()).unwrap(), receipt);
    }

    #[test]
    fn bloom_covers_address_and_topics() {
        let log = sample_log();
        let bloom = logs_bloom([&log]);
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_slice())));
        for topic in log.topics() {
            assert!(bloom.contains_input(BloomInput::Raw(topic.as_slice())));
        }
        assert!(!bloom.contains_input(BloomInput::Raw(
            Address::with_last_byte(0x55).as_slice()
        )));
    }
}
