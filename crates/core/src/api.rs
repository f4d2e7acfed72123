//! Boundary records for the external query surface.
//!
//! Quantities render as lowercase `0x`-prefixed hex strings; addresses and
//! hashes are fixed-width lowercase hex. The outer RPC layer serialises
//! these records verbatim.

use crate::node::{LogEntry, TxView};
use ember_chain::TxLookup;
use ember_primitives::{hex, Account, Address, Block, Receipt, Transaction, B256, U256};
use serde::Serialize;

/// Render a 64-bit quantity as `0x`-prefixed hex.
pub fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Render a 256-bit quantity as `0x`-prefixed hex.
pub fn quantity_u256(value: U256) -> String {
    format!("{value:#x}")
}

/// Render bytes as `0x`-prefixed lowercase hex.
pub fn data(bytes: impl AsRef<[u8]>) -> String {
    hex::encode_prefixed(bytes)
}

fn address(addr: Address) -> String {
    hex::encode_prefixed(addr)
}

fn hash(value: B256) -> String {
    hex::encode_prefixed(value)
}

/// Account record at the API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Account address.
    pub address: String,
    /// Balance in the smallest unit.
    pub balance: String,
    /// Transaction count.
    pub nonce: String,
    /// Storage trie root.
    pub storage_root: String,
    /// Code hash.
    pub code_hash: String,
}

impl AccountRecord {
    /// Render an account.
    pub fn new(addr: Address, account: &Account) -> Self {
        Self {
            address: address(addr),
            balance: quantity_u256(account.balance),
            nonce: quantity(account.nonce),
            storage_root: hash(account.storage_root),
            code_hash: hash(account.code_hash),
        }
    }
}

/// Transaction record at the API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Transaction hash.
    pub hash: String,
    /// Sender address.
    pub from: String,
    /// Recipient address, absent for contract creation.
    pub to: Option<String>,
    /// Transferred value.
    pub value: String,
    /// Sender nonce.
    pub nonce: String,
    /// Gas price.
    pub gas_price: String,
    /// Gas limit.
    pub gas_limit: String,
    /// Call data.
    pub input: String,
    /// Signature `v`.
    pub v: String,
    /// Signature `r`.
    pub r: String,
    /// Signature `s`.
    pub s: String,
    /// Number of the enclosing block, absent while pending.
    pub block_number: Option<String>,
    /// Hash of the enclosing block, absent while pending.
    pub block_hash: Option<String>,
    /// Index inside the enclosing block, absent while pending.
    pub transaction_index: Option<String>,
}

impl TransactionRecord {
    /// Render a transaction with optional inclusion context.
    pub fn new(tx: &Transaction, lookup: Option<&TxLookup>) -> Self {
        Self {
            hash: hash(tx.hash()),
            from: address(tx.from),
            to: tx.to.map(address),
            value: quantity_u256(tx.value),
            nonce: quantity(tx.nonce),
            gas_price: quantity_u256(tx.gas_price),
            gas_limit: quantity(tx.gas_limit),
            input: data(&tx.data),
            v: quantity(tx.signature.v),
            r: quantity_u256(tx.signature.r),
            s: quantity_u256(tx.signature.s),
            block_number: lookup.map(|l| quantity(l.block_number)),
            block_hash: lookup.map(|l| hash(l.block_hash)),
            transaction_index: lookup.map(|l| quantity(l.tx_index)),
        }
    }
}

impl From<&TxView> for TransactionRecord {
    fn from(view: &TxView) -> Self {
        match view {
            TxView::Pending(tx) => Self::new(tx, None),
            TxView::Mined { tx, lookup } => Self::new(tx, Some(lookup)),
        }
    }
}

/// Receipt record at the API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    /// Transaction hash.
    pub transaction_hash: String,
    /// Index inside the block.
    pub transaction_index: String,
    /// Hash of the enclosing block.
    pub block_hash: String,
    /// Number of the enclosing block.
    pub block_number: String,
    /// Sender address.
    pub from: String,
    /// Recipient address, absent for contract creation.
    pub to: Option<String>,
    /// `0x1` on success, `0x0` on a reverted charge.
    pub status: String,
    /// Gas consumed by this transaction.
    pub gas_used: String,
    /// Gas consumed by the block so far.
    pub cumulative_gas_used: String,
    /// Deployed contract address, if any.
    pub contract_address: Option<String>,
    /// Emitted logs.
    pub logs: Vec<LogRecord>,
    /// Bloom filter over the logs.
    pub logs_bloom: String,
}

impl From<&Receipt> for ReceiptRecord {
    fn from(receipt: &Receipt) -> Self {
        Self {
            transaction_hash: hash(receipt.tx_hash),
            transaction_index: quantity(receipt.tx_index),
            block_hash: hash(receipt.block_hash),
            block_number: quantity(receipt.block_number),
            from: address(receipt.from),
            to: receipt.to.map(address),
            status: quantity(receipt.success as u64),
            gas_used: quantity(receipt.gas_used),
            cumulative_gas_used: quantity(receipt.cumulative_gas_used),
            contract_address: receipt.contract_address.map(address),
            logs: receipt
                .logs
                .iter()
                .enumerate()
                .map(|(index, log)| LogRecord {
                    address: address(log.address),
                    topics: log.topics().iter().map(|topic| hash(*topic)).collect(),
                    data: data(&log.data.data),
                    block_number: quantity(receipt.block_number),
                    block_hash: hash(receipt.block_hash),
                    transaction_hash: hash(receipt.tx_hash),
                    transaction_index: quantity(receipt.tx_index),
                    log_index: quantity(index as u64),
                })
                .collect(),
            logs_bloom: data(receipt.logs_bloom),
        }
    }
}

/// Log record at the API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Emitting contract address.
    pub address: String,
    /// Indexed topics.
    pub topics: Vec<String>,
    /// Unindexed payload.
    pub data: String,
    /// Number of the enclosing block.
    pub block_number: String,
    /// Hash of the enclosing block.
    pub block_hash: String,
    /// Hash of the emitting transaction.
    pub transaction_hash: String,
    /// Index of the emitting transaction.
    pub transaction_index: String,
    /// Position of the log within its receipt.
    pub log_index: String,
}

impl From<&LogEntry> for LogRecord {
    fn from(entry: &LogEntry) -> Self {
        Self {
            address: address(entry.log.address),
            topics: entry.log.topics().iter().map(|topic| hash(*topic)).collect(),
            data: data(&entry.log.data.data),
            block_number: quantity(entry.block_number),
            block_hash: hash(entry.block_hash),
            transaction_hash: hash(entry.tx_hash),
            transaction_index: quantity(entry.tx_index),
            log_index: quantity(entry.log_index),
        }
    }
}

/// Block record at the API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    /// Block hash.
    pub hash: String,
    /// Block height.
    pub number: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Proposal time in milliseconds.
    pub timestamp_ms: String,
    /// Proposer address.
    pub proposer: String,
    /// State trie root.
    pub state_root: String,
    /// Transactions trie root.
    pub transactions_root: String,
    /// Receipts trie root.
    pub receipts_root: String,
    /// Bloom filter over the block's logs.
    pub logs_bloom: String,
    /// Number of transactions.
    pub transaction_count: String,
    /// The enclosed transactions.
    pub transactions: Vec<TransactionRecord>,
}

impl From<&Block> for BlockRecord {
    fn from(block: &Block) -> Self {
        let block_hash = block.hash();
        Self {
            hash: hash(block_hash),
            number: quantity(block.header.number),
            parent_hash: hash(block.header.parent_hash),
            timestamp_ms: quantity(block.header.timestamp_ms),
            proposer: address(block.header.proposer),
            state_root: hash(block.header.state_root),
            transactions_root: hash(block.header.transactions_root),
            receipts_root: hash(block.header.receipts_root),
            logs_bloom: data(block.header.logs_bloom),
            transaction_count: quantity(block.header.transaction_count),
            transactions: block
                .transactions
                .iter()
                .enumerate()
                .map(|(index, tx)| {
                    TransactionRecord::new(
                        tx,
                        Some(&TxLookup {
                            block_hash,
                            block_number: block.header.number,
                            tx_index: index as u64,
                        }),
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_primitives::{Account, KECCAK_EMPTY};

    #[test]
    fn quantities_render_as_lowercase_hex() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(21_000), "0x5208");
        assert_eq!(quantity_u256(U256::from(255u64)), "0xff");
    }

    #[test]
    fn account_record_is_fully_prefixed() {
        let record = AccountRecord::new(Address::with_last_byte(0xaa), &Account::empty());
        assert_eq!(
            record.address,
            "0x00000000000000000000000000000000000000aa"
        );
        assert_eq!(record.balance, "0x0");
        assert_eq!(record.nonce, "0x0");
        assert_eq!(record.code_hash, data(KECCAK_EMPTY));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["codeHash"], record.code_hash.as_str());
    }
}
