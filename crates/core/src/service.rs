use crate::{AdmissionError, SharedPool, SharedState};
use ember_kv::KeyValueStore;
use ember_primitives::{
    constants::TX_GAS,
    crypto::{self, address_of},
    Address, Bytes, ChainConfig, Transaction, TxHash, TxSignature, U256,
};
use k256::ecdsa::SigningKey;
use tracing::debug;

/// Fallback gas price for locally signed transactions, one gwei.
const DEFAULT_GAS_PRICE: u64 = 1_000_000_000;

/// Optional fields of a locally signed transaction.
#[derive(Clone, Debug, Default)]
pub struct TxOptions {
    /// Explicit nonce; derived from state and pool when absent.
    pub nonce: Option<u64>,
    /// Gas price, defaults to one gwei.
    pub gas_price: Option<U256>,
    /// Gas limit, defaults to the intrinsic transfer cost.
    pub gas_limit: Option<u64>,
    /// Call data, defaults to empty.
    pub data: Option<Bytes>,
}

/// Signs transactions and admits them into the pool.
///
/// Validation reads state through the repository only; the in-flight block
/// journal is never consulted.
#[derive(Debug)]
pub struct TxService<S> {
    state: SharedState<S>,
    pool: SharedPool,
    config: ChainConfig,
}

impl<S> Clone for TxService<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            pool: self.pool.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: KeyValueStore> TxService<S> {
    /// Wire the service to its collaborators.
    pub fn new(state: SharedState<S>, pool: SharedPool, config: ChainConfig) -> Self {
        Self {
            state,
            pool,
            config,
        }
    }

    /// The chain parameters the service validates against.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Build and sign a transaction from `key`.
    ///
    /// The nonce defaults to the sender's on-chain nonce plus the number of
    /// transactions the sender already has pooled, so consecutive calls
    /// produce a contiguous run.
    pub fn sign_transaction(
        &self,
        key: &SigningKey,
        to: Option<Address>,
        value: U256,
        opts: TxOptions,
    ) -> Result<Transaction, AdmissionError> {
        let from = address_of(key.verifying_key());
        let nonce = match opts.nonce {
            Some(nonce) => nonce,
            None => {
                let on_chain = self.on_chain_nonce(from)?;
                let pooled = self.pool.lock().expect("pool lock poisoned").sender_entries(from);
                on_chain + pooled
            }
        };

        let mut tx = Transaction {
            from,
            to,
            value,
            nonce,
            gas_price: opts.gas_price.unwrap_or(U256::from(DEFAULT_GAS_PRICE)),
            gas_limit: opts.gas_limit.unwrap_or(TX_GAS),
            data: opts.data.unwrap_or_default(),
            signature: TxSignature::default(),
        };
        tx.signature = crypto::sign_hash(
            tx.signing_hash(self.config.chain_id),
            key,
            self.config.chain_id,
        )
        .map_err(|_| AdmissionError::BadSignature)?;
        Ok(tx)
    }

    /// Validate `tx` and hand it to the pool.
    ///
    /// The pipeline stops at the first failure: signature, nonce, gas,
    /// balance; nothing is mutated on rejection.
    pub fn submit(&self, tx: Transaction) -> Result<TxHash, AdmissionError> {
        let hash = tx.hash();

        // 1. signature
        if tx.from == Address::ZERO {
            return Err(AdmissionError::BadSignature);
        }
        match tx.recover(self.config.chain_id) {
            Ok(signer) if signer == tx.from => {}
            _ => return Err(AdmissionError::BadSignature),
        }

        // 2. nonce, against state and the pool
        let account = self
            .state
            .read()
            .expect("state lock poisoned")
            .db()
            .account(tx.from)?;
        let on_chain_nonce = account.as_ref().map(|a| a.nonce).unwrap_or(0);
        {
            let pool = self.pool.lock().expect("pool lock poisoned");
            if pool.contains(&hash) {
                return Err(AdmissionError::DuplicateHash(hash));
            }
            if tx.nonce < on_chain_nonce {
                return Err(AdmissionError::NonceTooLow {
                    got: tx.nonce,
                    expected: on_chain_nonce,
                });
            }
            if pool.has_nonce(tx.from, tx.nonce) {
                return Err(AdmissionError::NonceConflict(tx.nonce));
            }
        }

        // 3. gas
        if tx.gas_price.is_zero() {
            return Err(AdmissionError::GasUnderpriced);
        }
        if tx.gas_limit < TX_GAS {
            return Err(AdmissionError::GasUnderlimit(tx.gas_limit));
        }

        // 4. balance
        let available = account.map(|a| a.balance).unwrap_or_default();
        let required = tx.cost().ok_or(AdmissionError::InsufficientFunds {
            required: U256::MAX,
            available,
        })?;
        if available < required {
            return Err(AdmissionError::InsufficientFunds {
                required,
                available,
            });
        }

        self.pool
            .lock()
            .expect("pool lock poisoned")
            .add(tx, on_chain_nonce)?;
        debug!(%hash, "transaction admitted");
        Ok(hash)
    }

    fn on_chain_nonce(&self, addr: Address) -> Result<u64, AdmissionError> {
        Ok(self
            .state
            .read()
            .expect("state lock poisoned")
            .db()
            .account(addr)?
            .map(|a| a.nonce)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_kv::MemoryStore;
    use ember_pool::TxPool;
    use ember_primitives::{crypto::generate_keypair, Account};
    use ember_state::{StateDb, StateManager};
    use std::sync::{Arc, Mutex, RwLock};

    fn service_with_balance(
        addr: Address,
        balance: U256,
    ) -> (TxService<MemoryStore>, SharedPool) {
        let mut db = StateDb::open(MemoryStore::new()).unwrap();
        db.save_account(
            addr,
            &Account {
                balance,
                ..Account::empty()
            },
        )
        .unwrap();
        let state: SharedState<MemoryStore> = Arc::new(RwLock::new(StateManager::new(db)));
        let pool: SharedPool = Arc::new(Mutex::new(TxPool::new()));
        let service = TxService::new(state, pool.clone(), ChainConfig::default());
        (service, pool)
    }

    fn funded() -> U256 {
        // plenty for value + fee
        U256::from(10u64).pow(U256::from(19u64))
    }

    #[test]
    fn sign_and_submit_roundtrip() {
        let (key, addr) = generate_keypair();
        let (service, pool) = service_with_balance(addr, funded());

        let tx = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1_000u64),
                TxOptions::default(),
            )
            .unwrap();
        assert_eq!(tx.from, addr);
        assert_eq!(tx.nonce, 0);

        let hash = service.submit(tx.clone()).unwrap();
        assert_eq!(hash, tx.hash());
        assert_eq!(pool.lock().unwrap().len(), 1);

        // consecutive signing accounts for the pooled transaction
        let next = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions::default(),
            )
            .unwrap();
        assert_eq!(next.nonce, 1);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (key, addr) = generate_keypair();
        let (service, pool) = service_with_balance(addr, funded());
        let mut tx = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions::default(),
            )
            .unwrap();
        tx.signature.r ^= U256::from(1u64);
        assert_eq!(service.submit(tx), Err(AdmissionError::BadSignature));
        assert_eq!(pool.lock().unwrap().len(), 0);
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let (key, addr) = generate_keypair();
        let (service, pool) = service_with_balance(addr, funded());
        let tx = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions::default(),
            )
            .unwrap();
        service.submit(tx.clone()).unwrap();
        assert_eq!(
            service.submit(tx.clone()),
            Err(AdmissionError::DuplicateHash(tx.hash()))
        );
        assert_eq!(pool.lock().unwrap().len(), 1);
    }

    #[test]
    fn gas_bounds_are_enforced() {
        let (key, addr) = generate_keypair();
        let (service, _) = service_with_balance(addr, funded());

        let underlimit = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions {
                    gas_limit: Some(TX_GAS - 1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            service.submit(underlimit),
            Err(AdmissionError::GasUnderlimit(TX_GAS - 1))
        );

        let underpriced = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions {
                    gas_price: Some(U256::ZERO),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            service.submit(underpriced),
            Err(AdmissionError::GasUnderpriced)
        );

        // the boundary itself is accepted
        let at_limit = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions {
                    gas_limit: Some(TX_GAS),
                    ..Default::default()
                },
            )
            .unwrap();
        service.submit(at_limit).unwrap();
    }

    #[test]
    fn poor_sender_is_rejected_without_side_effects() {
        let (key, addr) = generate_keypair();
        let (service, pool) = service_with_balance(addr, U256::from(100u64));
        let tx = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(50u64),
                TxOptions {
                    gas_price: Some(U256::from(1u64)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            service.submit(tx),
            Err(AdmissionError::InsufficientFunds { .. })
        ));
        assert_eq!(pool.lock().unwrap().len(), 0);
        // the balance is untouched
        assert_eq!(
            service
                .state
                .read()
                .unwrap()
                .db()
                .account(addr)
                .unwrap()
                .unwrap()
                .balance,
            U256::from(100u64)
        );
    }

    #[test]
    fn nonce_conflict_is_detected() {
        let (key, addr) = generate_keypair();
        let (service, _) = service_with_balance(addr, funded());
        let first = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(2)),
                U256::from(1u64),
                TxOptions::default(),
            )
            .unwrap();
        service.submit(first).unwrap();

        // different payload, same (sender, nonce)
        let conflicting = service
            .sign_transaction(
                &key,
                Some(Address::with_last_byte(3)),
                U256::from(2u64),
                TxOptions {
                    nonce: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            service.submit(conflicting),
            Err(AdmissionError::NonceConflict(0))
        );
    }
}
