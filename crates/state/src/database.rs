use crate::StateError;
use alloy_rlp::Decodable;
use ember_kv::{KeyValueStore, WriteBatch};
use ember_primitives::{
    hex, keccak256, parse::parse_address, Account, Address, Bytes, B256, KECCAK_EMPTY, U256,
};
use ember_trie::MptNode;

const ACCOUNT_PREFIX: &str = "account:";
const CODE_PREFIX: &str = "code:";
const CODEHASH_PREFIX: &str = "account_codehash:";
const STORAGE_PREFIX: &str = "storage:";

/// Account repository over a KV namespace, with the account trie held in
/// memory.
///
/// Rows are `account:<hex address> -> hex(rlp([nonce, balance,
/// storage_root, code_hash]))`; the trie maps `keccak256(address)` to the
/// same RLP payload, so the root can always be rebuilt from the rows alone.
#[derive(Debug)]
pub struct StateDb<S> {
    store: S,
    trie: MptNode,
}

impl<S: KeyValueStore> StateDb<S> {
    /// Open over `store`, rebuilding the account trie from persisted rows.
    pub fn open(store: S) -> Result<Self, StateError> {
        let mut this = Self {
            store,
            trie: MptNode::default(),
        };
        this.rebuild_trie()?;
        Ok(this)
    }

    fn rebuild_trie(&mut self) -> Result<(), StateError> {
        let mut trie = MptNode::default();
        for (key, value) in self.store.scan_prefix(ACCOUNT_PREFIX.as_bytes())? {
            let addr = address_of_row(&key)?;
            let rlp = decode_hex_row(&value)?;
            trie.insert(keccak256(addr).as_slice(), rlp)?;
        }
        self.trie = trie;
        Ok(())
    }

    /// The account stored under `addr`, if any.
    pub fn account(&self, addr: Address) -> Result<Option<Account>, StateError> {
        match self.store.get(&account_key(addr))? {
            Some(row) => {
                let rlp = decode_hex_row(&row)?;
                let account = Account::decode(&mut rlp.as_slice())
                    .map_err(|err| StateError::Corrupt(err.to_string()))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// The account stored under `addr`, failing when absent.
    pub fn require_account(&self, addr: Address) -> Result<Account, StateError> {
        self.account(addr)?
            .ok_or(StateError::AccountNotFound(addr))
    }

    /// Persist one account and update the trie.
    pub fn save_account(&mut self, addr: Address, account: &Account) -> Result<(), StateError> {
        let rlp = alloy_rlp::encode(account);
        self.trie.insert(keccak256(addr).as_slice(), rlp.clone())?;
        self.store
            .put(&account_key(addr), hex::encode(&rlp).as_bytes())?;
        Ok(())
    }

    /// Persist many accounts as one atomic batch and update the trie.
    pub fn save_accounts(
        &mut self,
        accounts: &[(Address, Account)],
    ) -> Result<(), StateError> {
        let mut batch = WriteBatch::new();
        for (addr, account) in accounts {
            let rlp = alloy_rlp::encode(account);
            self.trie.insert(keccak256(addr).as_slice(), rlp.clone())?;
            batch.put(account_key(*addr), hex::encode(&rlp).into_bytes());
        }
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// Root of the account trie.
    pub fn state_root(&self) -> B256 {
        self.trie.hash()
    }

    /// Root the trie would have after overlaying `accounts`, without
    /// persisting anything.
    pub fn root_with<'a, I>(&self, accounts: I) -> Result<B256, StateError>
    where
        I: IntoIterator<Item = (&'a Address, &'a Account)>,
    {
        let mut scratch = self.trie.clone();
        for (addr, account) in accounts {
            scratch.insert(keccak256(addr).as_slice(), alloy_rlp::encode(account))?;
        }
        Ok(scratch.hash())
    }

    /// Rebuild the trie by replaying all account rows and require that it
    /// hashes to `expected`.
    pub fn set_state_root(&mut self, expected: B256) -> Result<(), StateError> {
        self.rebuild_trie()?;
        let actual = self.trie.hash();
        if actual != expected {
            return Err(StateError::RootMismatch { expected, actual });
        }
        Ok(())
    }

    /// Contract code by its hash.
    pub fn code_by_hash(&self, code_hash: B256) -> Result<Option<Bytes>, StateError> {
        if code_hash == KECCAK_EMPTY {
            return Ok(Some(Bytes::new()));
        }
        Ok(self.store.get(&code_key(code_hash))?.map(Bytes::from))
    }

    /// Contract code installed at `addr`, `None` for plain accounts.
    pub fn code_of(&self, addr: Address) -> Result<Option<Bytes>, StateError> {
        match self.account(addr)? {
            Some(account) if account.has_code() => self.code_by_hash(account.code_hash),
            _ => Ok(None),
        }
    }

    /// Install contract code and index it by address; returns the code hash.
    pub fn save_code(&mut self, addr: Address, code: &[u8]) -> Result<B256, StateError> {
        let code_hash = keccak256(code);
        let mut batch = WriteBatch::new();
        batch.put(code_key(code_hash), code.to_vec());
        batch.put(
            format!("{CODEHASH_PREFIX}{}", hex::encode(addr)).into_bytes(),
            hex::encode(code_hash).into_bytes(),
        );
        self.store.write_batch(batch)?;
        Ok(code_hash)
    }

    /// A contract storage slot, `None` when never written.
    pub fn storage_at(&self, addr: Address, slot: B256) -> Result<Option<U256>, StateError> {
        match self.store.get(&storage_key(addr, slot))? {
            Some(row) => {
                let bytes = decode_hex_row(&row)?;
                Ok(Some(U256::from_be_slice(&bytes)))
            }
            None => Ok(None),
        }
    }

    /// Write a contract storage slot.
    pub fn set_storage(
        &mut self,
        addr: Address,
        slot: B256,
        value: U256,
    ) -> Result<(), StateError> {
        self.store.put(
            &storage_key(addr, slot),
            hex::encode(value.to_be_bytes::<32>()).as_bytes(),
        )?;
        Ok(())
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

fn account_key(addr: Address) -> Vec<u8> {
    format!("{ACCOUNT_PREFIX}{}", hex::encode(addr)).into_bytes()
}

fn code_key(code_hash: B256) -> Vec<u8> {
    format!("{CODE_PREFIX}{}", hex::encode(code_hash)).into_bytes()
}

fn storage_key(addr: Address, slot: B256) -> Vec<u8> {
    format!(
        "{STORAGE_PREFIX}{}:{}",
        hex::encode(addr),
        hex::encode(slot)
    )
    .into_bytes()
}

fn address_of_row(key: &[u8]) -> Result<Address, StateError> {
    let hex_part = key
        .strip_prefix(ACCOUNT_PREFIX.as_bytes())
        .ok_or_else(|| StateError::Corrupt("account row key without prefix".into()))?;
    let text = std::str::from_utf8(hex_part)
        .map_err(|err| StateError::Corrupt(err.to_string()))?;
    parse_address(text).map_err(|err| StateError::Corrupt(err.to_string()))
}

fn decode_hex_row(value: &[u8]) -> Result<Vec<u8>, StateError> {
    hex::decode(value).map_err(|err| StateError::Corrupt(err.to_string()))
}
