use crate::{
    executor::TransactionExecutor, AdmissionError, NodeError, SharedPool, SharedState, TxOptions,
    TxService,
};
use ember_chain::{ChainStore, TxLookup};
use ember_kv::KeyValueStore;
use ember_primitives::{
    Account, Address, Block, Bloom, BloomInput, Bytes, ChainConfig, Log, Receipt, Transaction,
    TxHash, B256, U256,
};
use k256::ecdsa::SigningKey;
use std::sync::Arc;

/// Where a transaction currently lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxView {
    /// Still pooled, waiting for a slot.
    Pending(Transaction),
    /// Included in a block.
    Mined {
        /// The transaction itself.
        tx: Transaction,
        /// Its location on the chain.
        lookup: TxLookup,
    },
}

/// Log query over an inclusive block range.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    /// First block of the range.
    pub from_block: u64,
    /// Last block of the range, clamped to the chain height.
    pub to_block: u64,
    /// Addresses to match; empty matches every address.
    pub addresses: Vec<Address>,
    /// Positional topic filters; an empty position matches anything.
    pub topics: Vec<Vec<B256>>,
}

impl LogFilter {
    /// Cheap pre-check against a block-level bloom: false means the block
    /// provably holds no matching log.
    fn matches_bloom(&self, bloom: &Bloom) -> bool {
        if !self.addresses.is_empty()
            && !self
                .addresses
                .iter()
                .any(|addr| bloom.contains_input(BloomInput::Raw(addr.as_slice())))
        {
            return false;
        }
        for candidates in &self.topics {
            if candidates.is_empty() {
                continue;
            }
            if !candidates
                .iter()
                .any(|topic| bloom.contains_input(BloomInput::Raw(topic.as_slice())))
            {
                return false;
            }
        }
        true
    }

    fn matches_log(&self, log: &Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        for (position, candidates) in self.topics.iter().enumerate() {
            if candidates.is_empty() {
                continue;
            }
            match log.topics().get(position) {
                Some(topic) if candidates.contains(topic) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A matched log with its chain context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// The log record itself.
    pub log: Log,
    /// Number of the enclosing block.
    pub block_number: u64,
    /// Hash of the enclosing block.
    pub block_hash: B256,
    /// Hash of the emitting transaction.
    pub tx_hash: TxHash,
    /// Index of the emitting transaction in its block.
    pub tx_index: u64,
    /// Position of the log within its receipt.
    pub log_index: u64,
}

/// The query surface consumed by the outer RPC layer.
///
/// Reads go through the repository and the chain store; submissions go
/// through the transaction service. Unknown lookups return `None`.
#[derive(Debug)]
pub struct Node<S, E> {
    chain: Arc<ChainStore<S>>,
    state: SharedState<S>,
    pool: SharedPool,
    service: TxService<S>,
    executor: E,
}

impl<S, E> Node<S, E>
where
    S: KeyValueStore,
    E: TransactionExecutor<S>,
{
    /// Wire the facade to its collaborators.
    pub fn new(
        chain: Arc<ChainStore<S>>,
        state: SharedState<S>,
        pool: SharedPool,
        executor: E,
        config: ChainConfig,
    ) -> Self {
        let service = TxService::new(state.clone(), pool.clone(), config);
        Self {
            chain,
            state,
            pool,
            service,
            executor,
        }
    }

    /// The transaction service behind this facade.
    pub fn service(&self) -> &TxService<S> {
        &self.service
    }

    /// The account record of `addr`, if it exists.
    pub fn get_account(&self, addr: Address) -> Result<Option<Account>, NodeError> {
        Ok(self
            .state
            .read()
            .expect("state lock poisoned")
            .db()
            .account(addr)?)
    }

    /// Balance of `addr`, zero for unknown accounts.
    pub fn get_balance(&self, addr: Address) -> Result<U256, NodeError> {
        Ok(self
            .get_account(addr)?
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    /// Nonce of `addr`, zero for unknown accounts.
    pub fn get_nonce(&self, addr: Address) -> Result<u64, NodeError> {
        Ok(self
            .get_account(addr)?
            .map(|account| account.nonce)
            .unwrap_or_default())
    }

    /// Build and sign a transaction with the node's wallet service.
    pub fn sign_tx(
        &self,
        key: &SigningKey,
        to: Option<Address>,
        value: U256,
        opts: TxOptions,
    ) -> Result<Transaction, AdmissionError> {
        self.service.sign_transaction(key, to, value, opts)
    }

    /// Validate and pool a signed transaction.
    pub fn submit_tx(&self, tx: Transaction) -> Result<TxHash, AdmissionError> {
        self.service.submit(tx)
    }

    /// A transaction by hash, pending or mined.
    pub fn get_tx(&self, hash: TxHash) -> Result<Option<TxView>, NodeError> {
        if let Some(entry) = self.pool.lock().expect("pool lock poisoned").get(&hash) {
            return Ok(Some(TxView::Pending(entry.tx.clone())));
        }
        let Some(lookup) = self.chain.find_tx_lookup(hash)? else {
            return Ok(None);
        };
        let Some(block) = self.chain.find_by_hash(lookup.block_hash)? else {
            return Ok(None);
        };
        Ok(block
            .transactions
            .into_iter()
            .nth(lookup.tx_index as usize)
            .map(|tx| TxView::Mined { tx, lookup }))
    }

    /// The receipt of a mined transaction.
    pub fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, NodeError> {
        Ok(self.chain.find_receipt(hash)?)
    }

    /// Logs in a block range, using the header blooms to skip blocks that
    /// provably contain no match.
    pub fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, NodeError> {
        let mut entries = Vec::new();
        let Some(height) = self.chain.chain_height()? else {
            return Ok(entries);
        };
        for number in filter.from_block..=filter.to_block.min(height) {
            let Some(header) = self.chain.find_header_by_number(number)? else {
                continue;
            };
            if !filter.matches_bloom(&header.logs_bloom) {
                continue;
            }
            let Some(block) = self.chain.find_by_number(number)? else {
                continue;
            };
            let block_hash = block.hash();
            for tx in &block.transactions {
                let Some(receipt) = self.chain.find_receipt(tx.hash())? else {
                    continue;
                };
                for (log_index, log) in receipt.logs.iter().enumerate() {
                    if filter.matches_log(log) {
                        entries.push(LogEntry {
                            log: log.clone(),
                            block_number: number,
                            block_hash,
                            tx_hash: receipt.tx_hash,
                            tx_index: receipt.tx_index,
                            log_index: log_index as u64,
                        });
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Canonical block at `number`.
    pub fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, NodeError> {
        Ok(self.chain.find_by_number(number)?)
    }

    /// Block with `hash`.
    pub fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>, NodeError> {
        Ok(self.chain.find_by_hash(hash)?)
    }

    /// The chain tip block.
    pub fn get_latest_block(&self) -> Result<Option<Block>, NodeError> {
        Ok(self.chain.find_latest()?)
    }

    /// Height of the chain tip, `None` before genesis.
    pub fn chain_height(&self) -> Result<Option<u64>, NodeError> {
        Ok(self.chain.chain_height()?)
    }

    /// Contract code installed at `addr`, `None` for plain accounts.
    pub fn get_contract_code(&self, addr: Address) -> Result<Option<Bytes>, NodeError> {
        Ok(self
            .state
            .read()
            .expect("state lock poisoned")
            .db()
            .code_of(addr)?)
    }

    /// Read-only contract call through the execution seam; no state change.
    pub fn call_contract(
        &self,
        to: Address,
        data: &Bytes,
        from: Option<Address>,
    ) -> Result<Bytes, NodeError> {
        let state = self.state.read().expect("state lock poisoned");
        Ok(self.executor.call(to, data, from, state.db())?)
    }
}
