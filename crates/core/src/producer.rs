use crate::{
    executor::{ExecutionContext, ExecutionError, TransactionExecutor},
    GenesisConfig, ProducerError, SharedPool, SharedState,
};
use ember_chain::ChainStore;
use ember_kv::KeyValueStore;
use ember_primitives::{
    logs_bloom, Address, Block, BlockHeader, Bloom, ChainConfig, Receipt, Transaction,
    EMPTY_ROOT_HASH, GENESIS_PARENT_HASH,
};
use ember_state::{StateError, StateManager};
use ember_trie::ordered_trie_root;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Emits one tick per slot on a bounded channel.
///
/// The channel holds a single tick: when the producer is still busy with
/// the previous slot, the new tick is dropped and that slot is skipped.
#[derive(Debug)]
pub struct SlotClock;

impl SlotClock {
    /// Start the clock task; it stops once `shutdown` is set.
    pub fn spawn(block_time_ms: u64, shutdown: Arc<AtomicBool>) -> mpsc::Receiver<u64> {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(block_time_ms.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately, the chain starts one slot in
            interval.tick().await;
            let mut slot = 0u64;
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                slot += 1;
                match tick_tx.try_send(slot) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!(slot, "consumer still busy, dropping tick");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        tick_rx
    }
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Slot-driven block assembly over the journaled state.
///
/// Each attempt either persists a complete block (chain rows in one atomic
/// batch, then the flattened journal) or rolls the journal back; no partial
/// slot ever survives.
#[derive(Debug)]
pub struct BlockProducer<S, E> {
    chain: Arc<ChainStore<S>>,
    state: SharedState<S>,
    pool: SharedPool,
    executor: E,
    config: ChainConfig,
    genesis: GenesisConfig,
    proposer: Address,
    building: AtomicBool,
}

impl<S, E> BlockProducer<S, E>
where
    S: KeyValueStore,
    E: TransactionExecutor<S>,
{
    /// Wire the producer to its collaborators.
    pub fn new(
        chain: Arc<ChainStore<S>>,
        state: SharedState<S>,
        pool: SharedPool,
        executor: E,
        config: ChainConfig,
        genesis: GenesisConfig,
        proposer: Address,
    ) -> Self {
        Self {
            chain,
            state,
            pool,
            executor,
            config,
            genesis,
            proposer,
            building: AtomicBool::new(false),
        }
    }

    /// Consume slot ticks until the channel closes or `shutdown` is set.
    pub async fn run(&self, mut ticks: mpsc::Receiver<u64>, shutdown: Arc<AtomicBool>) {
        while let Some(slot) = ticks.recv().await {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match self.try_produce() {
                Ok(block) => {
                    info!(
                        slot,
                        number = block.number(),
                        hash = %block.hash(),
                        txs = block.transactions.len(),
                        "sealed block"
                    );
                }
                Err(ProducerError::Busy) => {
                    warn!(slot, "previous attempt still running, skipping slot");
                }
                Err(err) => {
                    error!(slot, %err, "block attempt failed");
                }
            }
        }
        debug!("producer loop stopped");
    }

    /// Run one block attempt now, unless one is already in flight.
    pub fn try_produce(&self) -> Result<Block, ProducerError> {
        if self.building.swap(true, Ordering::SeqCst) {
            return Err(ProducerError::Busy);
        }
        let result = self.produce_inner();
        if result.is_err() {
            self.state
                .write()
                .expect("state lock poisoned")
                .rollback_block();
        }
        self.building.store(false, Ordering::SeqCst);
        result
    }

    fn produce_inner(&self) -> Result<Block, ProducerError> {
        let Some(parent) = self.chain.find_latest()? else {
            return self.produce_genesis();
        };

        let mut state = self.state.write().expect("state lock poisoned");
        state.begin_block();

        let txs = self
            .pool
            .lock()
            .expect("pool lock poisoned")
            .take_for_block(self.config.max_txs_per_block, self.config.block_gas_limit);

        let ctx = ExecutionContext {
            chain_id: self.config.chain_id,
            block_number: parent.number() + 1,
            timestamp_ms: now_ms().max(parent.header.timestamp_ms + 1),
            proposer: self.proposer,
        };

        let mut receipts = self.apply_transactions(&mut state, &txs, &ctx)?;
        state.credit(self.proposer, self.config.proposer_reward)?;

        let transactions_root = ordered_trie_root(txs.iter().map(Transaction::rlp_signed));
        let receipts_root = ordered_trie_root(receipts.iter().map(Receipt::rlp_consensus));
        let block_bloom = receipts
            .iter()
            .fold(Bloom::default(), |acc, receipt| acc | receipt.logs_bloom);
        let state_root = state.current_root()?;

        let header = BlockHeader {
            number: ctx.block_number,
            parent_hash: parent.hash(),
            timestamp_ms: ctx.timestamp_ms,
            proposer: self.proposer,
            state_root,
            transactions_root,
            receipts_root,
            logs_bloom: block_bloom,
            transaction_count: txs.len() as u64,
        };
        let block = Block {
            header,
            transactions: txs,
        };
        let block_hash = block.hash();
        for receipt in &mut receipts {
            receipt.block_hash = block_hash;
        }

        self.chain.save_block(&block, &receipts)?;
        state.commit_block()?;
        drop(state);

        let included: Vec<_> = receipts.iter().map(|receipt| receipt.tx_hash).collect();
        self.pool
            .lock()
            .expect("pool lock poisoned")
            .remove_many(&included);
        Ok(block)
    }

    fn produce_genesis(&self) -> Result<Block, ProducerError> {
        let mut state = self.state.write().expect("state lock poisoned");
        state.begin_block();
        for (addr, balance) in self.genesis.allocations()? {
            state.credit(addr, balance)?;
        }
        let state_root = state.current_root()?;

        let header = BlockHeader {
            number: 0,
            parent_hash: GENESIS_PARENT_HASH,
            timestamp_ms: self.genesis.timestamp_ms,
            proposer: Address::ZERO,
            state_root,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            logs_bloom: Bloom::default(),
            transaction_count: 0,
        };
        let block = Block {
            header,
            transactions: Vec::new(),
        };

        self.chain.save_block(&block, &[])?;
        state.commit_block()?;
        info!(hash = %block.hash(), "genesis block sealed");
        Ok(block)
    }

    /// Execute transactions in order, one checkpoint each: success commits
    /// the checkpoint, failure reverts it and charges the full gas limit,
    /// capped at what the sender still has.
    ///
    /// The returned receipts carry a zero block hash; the caller fills it
    /// in after sealing the header.
    fn apply_transactions(
        &self,
        state: &mut StateManager<S>,
        txs: &[Transaction],
        ctx: &ExecutionContext,
    ) -> Result<Vec<Receipt>, ProducerError> {
        let mut receipts = Vec::with_capacity(txs.len());
        let mut cumulative_gas_used = 0u64;

        for (index, tx) in txs.iter().enumerate() {
            state.checkpoint();
            match self.executor.execute(tx, ctx, state) {
                Ok(outcome) => {
                    state.commit_checkpoint();
                    cumulative_gas_used += outcome.gas_used;
                    let logs_bloom = logs_bloom(&outcome.logs);
                    receipts.push(Receipt {
                        tx_hash: tx.hash(),
                        tx_index: index as u64,
                        block_hash: Default::default(),
                        block_number: ctx.block_number,
                        from: tx.from,
                        to: tx.to,
                        success: true,
                        gas_used: outcome.gas_used,
                        cumulative_gas_used,
                        contract_address: outcome.contract_address,
                        logs: outcome.logs,
                        logs_bloom,
                    });
                }
                Err(ExecutionError::State(err)) => return Err(err.into()),
                Err(err) => {
                    trace!(hash = %tx.hash(), %err, "transaction reverted, charging gas");
                    state.revert_checkpoint()?;
                    self.charge_failed(state, tx, ctx)?;
                    cumulative_gas_used += tx.gas_limit;
                    receipts.push(Receipt {
                        tx_hash: tx.hash(),
                        tx_index: index as u64,
                        block_hash: Default::default(),
                        block_number: ctx.block_number,
                        from: tx.from,
                        to: tx.to,
                        success: false,
                        gas_used: tx.gas_limit,
                        cumulative_gas_used,
                        contract_address: None,
                        logs: Vec::new(),
                        logs_bloom: Bloom::default(),
                    });
                }
            }
        }
        Ok(receipts)
    }

    /// A reverted transaction still consumes its nonce and pays for the gas
    /// it reserved, up to the sender's remaining balance.
    fn charge_failed(
        &self,
        state: &mut StateManager<S>,
        tx: &Transaction,
        ctx: &ExecutionContext,
    ) -> Result<(), StateError> {
        let mut sender = state.account(tx.from)?.unwrap_or_default();
        let fee = tx.fee().unwrap_or(sender.balance);
        let charged = fee.min(sender.balance);
        sender.balance -= charged;
        sender.nonce += 1;
        state.set_account(tx.from, sender);
        state.credit(ctx.proposer, charged)
    }

    /// Align the state repository with the persisted chain tip.
    ///
    /// After a crash between `save_block` and the state commit, the rows
    /// still describe the parent; in that case the tip block is re-executed
    /// once (bounded replay) and committed. Any other divergence is a
    /// corrupt tip and aborts startup.
    pub fn recover_state(&self) -> Result<(), ProducerError> {
        let Some(tip) = self.chain.find_latest()? else {
            return Ok(());
        };
        let mut state = self.state.write().expect("state lock poisoned");
        let rebuilt = match state.db_mut().set_state_root(tip.header.state_root) {
            Ok(()) => return Ok(()),
            Err(StateError::RootMismatch { actual, .. }) => actual,
            Err(err) => return Err(err.into()),
        };
        warn!(
            number = tip.number(),
            expected = %tip.header.state_root,
            %rebuilt,
            "state lags the chain tip, replaying the tip block"
        );

        if tip.number() == 0 {
            if rebuilt != EMPTY_ROOT_HASH {
                return Err(ProducerError::CorruptTip(format!(
                    "genesis state root {rebuilt} is neither sealed nor empty"
                )));
            }
            state.begin_block();
            for (addr, balance) in self.genesis.allocations()? {
                state.credit(addr, balance)?;
            }
        } else {
            let parent = self
                .chain
                .find_header_by_number(tip.number() - 1)?
                .ok_or(ProducerError::NoParent(tip.number()))?;
            if rebuilt != parent.state_root {
                return Err(ProducerError::CorruptTip(format!(
                    "state root {rebuilt} matches neither the tip nor its parent"
                )));
            }
            let ctx = ExecutionContext {
                chain_id: self.config.chain_id,
                block_number: tip.number(),
                timestamp_ms: tip.header.timestamp_ms,
                proposer: tip.header.proposer,
            };
            state.begin_block();
            self.apply_transactions(&mut state, &tip.transactions, &ctx)?;
            state.credit(tip.header.proposer, self.config.proposer_reward)?;
        }

        let replayed = state.current_root()?;
        if replayed != tip.header.state_root {
            state.rollback_block();
            return Err(ProducerError::CorruptTip(format!(
                "replaying block {} yields {replayed}, tip claims {}",
                tip.number(),
                tip.header.state_root
            )));
        }
        state.commit_block()?;
        info!(number = tip.number(), "state replayed up to the chain tip");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransferExecutor, TxOptions, TxService};
    use ember_kv::{KeyValueStoreGet, MemoryStore, SledStore};
    use ember_pool::TxPool;
    use ember_primitives::{constants::TX_GAS, crypto::generate_keypair, hex, Account, U256};
    use ember_state::StateDb;
    use std::sync::{Mutex, RwLock};

    const PROPOSER: Address = Address::with_last_byte(0xbb);

    struct Harness<S: KeyValueStore> {
        chain: Arc<ChainStore<S>>,
        state: SharedState<S>,
        pool: SharedPool,
        producer: BlockProducer<S, TransferExecutor>,
        service: TxService<S>,
    }

    fn genesis_with(allocs: &[(Address, &str)]) -> GenesisConfig {
        GenesisConfig {
            chain_id: 1337,
            block_time_ms: 50,
            epoch_size: 32,
            timestamp_ms: 1_700_000_000_000,
            alloc: allocs
                .iter()
                .map(|(addr, value)| (*addr, value.to_string()))
                .collect(),
        }
    }

    fn harness<S: KeyValueStore>(
        chain_store: S,
        state_store: S,
        genesis: GenesisConfig,
    ) -> Harness<S> {
        let config = genesis.chain_config();
        let chain = Arc::new(ChainStore::new(chain_store));
        let state: SharedState<S> = Arc::new(RwLock::new(StateManager::new(
            StateDb::open(state_store).unwrap(),
        )));
        let pool: SharedPool = Arc::new(Mutex::new(TxPool::new()));
        let producer = BlockProducer::new(
            chain.clone(),
            state.clone(),
            pool.clone(),
            TransferExecutor,
            config.clone(),
            genesis,
            PROPOSER,
        );
        let service = TxService::new(state.clone(), pool.clone(), config);
        Harness {
            chain,
            state,
            pool,
            producer,
            service,
        }
    }

    fn gwei() -> U256 {
        U256::from(1_000_000_000u64)
    }

    fn balance_of<S: KeyValueStore>(h: &Harness<S>, addr: Address) -> U256 {
        h.state
            .read()
            .unwrap()
            .db()
            .account(addr)
            .unwrap()
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    #[test]
    fn fresh_chain_single_transfer() {
        let (key, alice) = generate_keypair();
        let bob = Address::with_last_byte(0x02);
        let h = harness(
            MemoryStore::new(),
            MemoryStore::new(),
            genesis_with(&[(alice, "10000000000000000000")]),
        );

        let genesis_block = h.producer.try_produce().unwrap();
        assert_eq!(genesis_block.number(), 0);
        assert_eq!(genesis_block.header.parent_hash, GENESIS_PARENT_HASH);
        assert_eq!(genesis_block.header.transactions_root, EMPTY_ROOT_HASH);

        let value = U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64));
        let tx = h
            .service
            .sign_transaction(
                &key,
                Some(bob),
                value,
                TxOptions {
                    gas_price: Some(gwei()),
                    ..Default::default()
                },
            )
            .unwrap();
        let tx_hash = h.service.submit(tx).unwrap();

        let block = h.producer.try_produce().unwrap();
        assert_eq!(block.number(), 1);
        assert_eq!(block.transactions.len(), 1);

        let fee = gwei() * U256::from(TX_GAS);
        let initial = U256::from(10u64).pow(U256::from(19u64));
        assert_eq!(balance_of(&h, bob), value);
        assert_eq!(balance_of(&h, alice), initial - value - fee);
        assert_eq!(
            balance_of(&h, PROPOSER),
            fee + ChainConfig::default().proposer_reward
        );
        assert_eq!(
            h.state
                .read()
                .unwrap()
                .db()
                .account(alice)
                .unwrap()
                .unwrap()
                .nonce,
            1
        );

        let receipt = h.chain.find_receipt(tx_hash).unwrap().unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.gas_used, TX_GAS);
        assert_eq!(receipt.tx_index, 0);
        assert_eq!(receipt.block_hash, block.hash());

        // the sealed roots are reproducible from the block contents
        assert_eq!(
            block.header.transactions_root,
            ordered_trie_root(block.transactions.iter().map(Transaction::rlp_signed))
        );
        assert_eq!(
            block.header.receipts_root,
            ordered_trie_root([receipt.rlp_consensus()])
        );
        assert_eq!(
            block.header.state_root,
            h.state.read().unwrap().db().state_root()
        );

        // the pool was drained and the canonical index agrees with the tip
        assert!(h.pool.lock().unwrap().is_empty());
        assert_eq!(
            h.chain.find_by_number(1).unwrap().unwrap().hash(),
            h.chain.find_latest().unwrap().unwrap().hash()
        );
    }

    #[test]
    fn nonce_gap_promotion_orders_inclusion() {
        let (key, alice) = generate_keypair();
        let h = harness(
            MemoryStore::new(),
            MemoryStore::new(),
            genesis_with(&[(alice, "10000000000000000000")]),
        );
        h.producer.try_produce().unwrap();

        let tx1 = h
            .service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(0x03)),
                U256::from(1u64),
                TxOptions {
                    nonce: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        let tx0 = h
            .service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(0x04)),
                U256::from(1u64),
                TxOptions {
                    nonce: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();

        h.service.submit(tx1.clone()).unwrap();
        {
            let pool = h.pool.lock().unwrap();
            assert_eq!((pool.pending_len(), pool.queued_len()), (0, 1));
        }
        h.service.submit(tx0.clone()).unwrap();
        {
            let pool = h.pool.lock().unwrap();
            assert_eq!((pool.pending_len(), pool.queued_len()), (2, 0));
        }

        let block = h.producer.try_produce().unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].nonce, 0);
        assert_eq!(block.transactions[1].nonce, 1);

        let receipt0 = h.chain.find_receipt(tx0.hash()).unwrap().unwrap();
        let receipt1 = h.chain.find_receipt(tx1.hash()).unwrap().unwrap();
        assert_eq!((receipt0.tx_index, receipt1.tx_index), (0, 1));
        assert_eq!(receipt1.cumulative_gas_used, 2 * TX_GAS);
    }

    #[test]
    fn empty_block_still_rewards_the_proposer() {
        let h = harness(MemoryStore::new(), MemoryStore::new(), genesis_with(&[]));
        let genesis_block = h.producer.try_produce().unwrap();
        let block = h.producer.try_produce().unwrap();

        assert_eq!(block.number(), 1);
        assert!(block.transactions.is_empty());
        assert_eq!(block.header.transactions_root, EMPTY_ROOT_HASH);
        assert_eq!(block.header.receipts_root, EMPTY_ROOT_HASH);
        assert!(block.header.timestamp_ms > genesis_block.header.timestamp_ms);
        assert_eq!(
            balance_of(&h, PROPOSER),
            ChainConfig::default().proposer_reward
        );
    }

    #[test]
    fn drained_sender_gets_a_reverted_receipt() {
        let (key, alice) = generate_keypair();
        let h = harness(
            MemoryStore::new(),
            MemoryStore::new(),
            genesis_with(&[(alice, "1000000000000000000")]),
        );
        h.producer.try_produce().unwrap();

        let initial = U256::from(10u64).pow(U256::from(18u64));
        let fee = gwei() * U256::from(TX_GAS);
        // after the first transfer exactly one fee is left, which cannot
        // cover the second transfer's value plus its fee
        let tx0 = h
            .service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(0x05)),
                initial - fee - fee,
                TxOptions {
                    gas_price: Some(gwei()),
                    ..Default::default()
                },
            )
            .unwrap();
        let tx1 = h
            .service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(0x06)),
                fee,
                TxOptions {
                    gas_price: Some(gwei()),
                    ..Default::default()
                },
            )
            .unwrap();
        h.service.submit(tx0.clone()).unwrap();
        h.service.submit(tx1.clone()).unwrap();

        let block = h.producer.try_produce().unwrap();
        assert_eq!(block.transactions.len(), 2);

        let receipt0 = h.chain.find_receipt(tx0.hash()).unwrap().unwrap();
        let receipt1 = h.chain.find_receipt(tx1.hash()).unwrap().unwrap();
        assert!(receipt0.success);
        assert!(!receipt1.success);
        // a reverted transaction is charged its full gas limit
        assert_eq!(receipt1.gas_used, tx1.gas_limit);
        assert_eq!(receipt1.cumulative_gas_used, TX_GAS + tx1.gas_limit);

        // the failed value transfer did not land, the fee did
        assert_eq!(balance_of(&h, Address::with_last_byte(0x06)), U256::ZERO);
        assert_eq!(balance_of(&h, alice), U256::ZERO);
        assert_eq!(
            h.state
                .read()
                .unwrap()
                .db()
                .account(alice)
                .unwrap()
                .unwrap()
                .nonce,
            2
        );

        // supply is conserved: initial allocation plus one block reward
        let supply = balance_of(&h, alice)
            + balance_of(&h, Address::with_last_byte(0x05))
            + balance_of(&h, Address::with_last_byte(0x06))
            + balance_of(&h, PROPOSER);
        assert_eq!(supply, initial + ChainConfig::default().proposer_reward);
    }

    #[test]
    fn restart_preserves_chain_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let chain_path = dir.path().join("chaindata");
        let state_path = dir.path().join("state");
        let (key, alice) = generate_keypair();
        let bob = Address::with_last_byte(0x07);
        let genesis = genesis_with(&[(alice, "10000000000000000000")]);

        let (tip_before, alice_before, bob_before) = {
            let h = harness(
                SledStore::open(&chain_path).unwrap(),
                SledStore::open(&state_path).unwrap(),
                genesis.clone(),
            );
            h.producer.try_produce().unwrap();
            for _ in 0..5 {
                let tx = h
                    .service
                    .sign_transaction(
                        &key,
                        Some(bob),
                        U256::from(1_000u64),
                        TxOptions::default(),
                    )
                    .unwrap();
                h.service.submit(tx).unwrap();
                h.producer.try_produce().unwrap();
            }
            assert_eq!(h.chain.chain_height().unwrap(), Some(5));
            h.chain.store().flush().unwrap();
            h.state.read().unwrap().db().store().flush().unwrap();
            (
                h.chain.find_latest().unwrap().unwrap().hash(),
                balance_of(&h, alice),
                balance_of(&h, bob),
            )
        };

        let h = harness(
            SledStore::open(&chain_path).unwrap(),
            SledStore::open(&state_path).unwrap(),
            genesis,
        );
        h.producer.recover_state().unwrap();
        assert_eq!(h.chain.chain_height().unwrap(), Some(5));
        assert_eq!(
            h.chain.find_latest().unwrap().unwrap().hash(),
            tip_before
        );
        assert_eq!(balance_of(&h, alice), alice_before);
        assert_eq!(balance_of(&h, bob), bob_before);
        assert_eq!(balance_of(&h, bob), U256::from(5_000u64));
    }

    #[test]
    fn crash_between_block_and_state_commit_replays_the_tip() {
        let chain_mem = MemoryStore::new();
        let state_mem = MemoryStore::new();
        let snapshot = MemoryStore::new();
        let (key, alice) = generate_keypair();
        let bob = Address::with_last_byte(0x08);
        let genesis = genesis_with(&[(alice, "10000000000000000000")]);

        let tip = {
            let h = harness(&chain_mem, &state_mem, genesis.clone());
            h.producer.try_produce().unwrap();

            // snapshot the state rows as they were before block 1
            for (k, v) in state_mem.scan_prefix(b"").unwrap() {
                snapshot.put(&k, &v).unwrap();
            }

            let tx = h
                .service
                .sign_transaction(&key, Some(bob), U256::from(1_000u64), TxOptions::default())
                .unwrap();
            h.service.submit(tx).unwrap();
            h.producer.try_produce().unwrap()
        };

        // a reboot whose state lags the tip by one block replays it
        let h = harness(&chain_mem, &snapshot, genesis);
        h.producer.recover_state().unwrap();
        assert_eq!(
            h.state.read().unwrap().db().state_root(),
            tip.header.state_root
        );
        assert_eq!(balance_of(&h, bob), U256::from(1_000u64));
    }

    #[test]
    fn missing_state_under_a_genesis_tip_is_replayed() {
        let chain_mem = MemoryStore::new();
        let state_mem = MemoryStore::new();
        let fresh = MemoryStore::new();
        let (_, alice) = generate_keypair();
        let genesis = genesis_with(&[(alice, "10000000000000000000")]);

        let tip = {
            let h = harness(&chain_mem, &state_mem, genesis.clone());
            h.producer.try_produce().unwrap()
        };

        let h = harness(&chain_mem, &fresh, genesis);
        h.producer.recover_state().unwrap();
        assert_eq!(
            h.state.read().unwrap().db().state_root(),
            tip.header.state_root
        );
        assert_eq!(
            balance_of(&h, alice),
            U256::from(10u64).pow(U256::from(19u64))
        );
    }

    #[test]
    fn unrelated_state_under_the_tip_is_corrupt() {
        let chain_mem = MemoryStore::new();
        let state_mem = MemoryStore::new();
        let (_, alice) = generate_keypair();
        let genesis = genesis_with(&[(alice, "10000000000000000000")]);
        {
            let h = harness(&chain_mem, &state_mem, genesis.clone());
            h.producer.try_produce().unwrap();
        }

        // rows that belong to neither the tip nor an empty repository
        let bogus = MemoryStore::new();
        let stray = Account {
            balance: U256::from(9u64),
            ..Account::empty()
        };
        bogus
            .put(
                format!("account:{}", hex::encode(Address::with_last_byte(0x99))).as_bytes(),
                hex::encode(alloy_rlp::encode(stray)).as_bytes(),
            )
            .unwrap();

        let h = harness(&chain_mem, &bogus, genesis);
        assert!(matches!(
            h.producer.recover_state(),
            Err(ProducerError::CorruptTip(_))
        ));
    }

    #[test]
    fn overlapping_attempts_are_rejected() {
        let h = harness(MemoryStore::new(), MemoryStore::new(), genesis_with(&[]));
        h.producer.building.store(true, Ordering::SeqCst);
        assert!(matches!(h.producer.try_produce(), Err(ProducerError::Busy)));
        h.producer.building.store(false, Ordering::SeqCst);
        h.producer.try_produce().unwrap();
    }

    #[tokio::test]
    async fn slot_clock_ticks_then_stops_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut ticks = SlotClock::spawn(5, shutdown.clone());
        let first = ticks.recv().await.unwrap();
        assert!(first >= 1);
        shutdown.store(true, Ordering::SeqCst);
        while ticks.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn run_seals_a_block_per_tick() {
        let h = harness(MemoryStore::new(), MemoryStore::new(), genesis_with(&[]));
        let (tick_tx, tick_rx) = mpsc::channel(1);
        tick_tx.send(1).await.unwrap();
        drop(tick_tx);
        h.producer
            .run(tick_rx, Arc::new(AtomicBool::new(false)))
            .await;
        assert_eq!(h.chain.chain_height().unwrap(), Some(0));
    }
}
