use crate::{StateDb, StateError};
use ember_kv::KeyValueStore;
use ember_primitives::{Account, Address, B256, U256};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::trace;

/// Default capacity of the read cache.
const READ_CACHE_CAPACITY: usize = 1024;

/// One reversible scope of mutation: address to account snapshot, where
/// `None` is a tombstone that reads as absent.
type Frame = HashMap<Address, Option<Account>>;

/// Journaled, checkpointable view over the state repository.
///
/// Reads resolve top-down through the journal stack, then the LRU read
/// cache, then the repository. Writes always land in the top frame; the
/// repository is only touched by [`StateManager::commit_block`], which
/// persists the flattened journal as one atomic batch.
///
/// The journal belongs to the block producer between `begin_block` and
/// `commit_block`/`rollback_block`; concurrent readers go through
/// [`StateManager::db`] instead.
#[derive(Debug)]
pub struct StateManager<S> {
    db: StateDb<S>,
    frames: Vec<Frame>,
    cache: Mutex<LruCache<Address, Option<Account>>>,
}

impl<S: KeyValueStore> StateManager<S> {
    /// Wrap a repository with an empty journal.
    pub fn new(db: StateDb<S>) -> Self {
        Self {
            db,
            frames: Vec::new(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(READ_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Read-only access to the underlying repository, bypassing the
    /// journal.
    pub fn db(&self) -> &StateDb<S> {
        &self.db
    }

    /// Mutable repository access, used by boot-time recovery before any
    /// journal is opened.
    pub fn db_mut(&mut self) -> &mut StateDb<S> {
        &mut self.db
    }

    /// Number of open journal frames.
    pub fn journal_depth(&self) -> usize {
        self.frames.len()
    }

    /// Reset the journal to a single fresh frame. Called by the producer
    /// exactly once per block attempt.
    pub fn begin_block(&mut self) {
        self.frames.clear();
        self.frames.push(Frame::new());
    }

    /// Push a new frame; nestable to any depth.
    pub fn checkpoint(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Pop the top frame and overlay its entries onto the frame below.
    /// Popping the only remaining frame is a no-op; persistence happens in
    /// [`StateManager::commit_block`].
    pub fn commit_checkpoint(&mut self) {
        if self.frames.len() < 2 {
            return;
        }
        let top = self.frames.pop().expect("checked above");
        let below = self.frames.last_mut().expect("checked above");
        below.extend(top);
    }

    /// Pop and discard the top frame.
    pub fn revert_checkpoint(&mut self) -> Result<(), StateError> {
        self.frames.pop().ok_or(StateError::EmptyJournal)?;
        Ok(())
    }

    /// Resolve an account: journal top-down, read cache, then repository.
    pub fn account(&self, addr: Address) -> Result<Option<Account>, StateError> {
        for frame in self.frames.iter().rev() {
            if let Some(entry) = frame.get(&addr) {
                return Ok(*entry);
            }
        }
        if let Some(entry) = self.cache.lock().expect("cache lock poisoned").get(&addr) {
            return Ok(*entry);
        }
        let loaded = self.db.account(addr)?;
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .put(addr, loaded);
        Ok(loaded)
    }

    /// Write an account snapshot into the top frame, opening a frame when
    /// none is active.
    pub fn set_account(&mut self, addr: Address, account: Account) {
        self.top_frame().insert(addr, Some(account));
    }

    /// Mark an account as absent for the rest of this journal. Tombstones
    /// are never persisted; committed state keeps the last saved record.
    pub fn remove_account(&mut self, addr: Address) {
        self.top_frame().insert(addr, None);
    }

    /// Add `amount` to an account balance, materialising the account on
    /// first write.
    pub fn credit(&mut self, addr: Address, amount: U256) -> Result<(), StateError> {
        let mut account = self.account(addr)?.unwrap_or_default();
        account.balance = account.balance.saturating_add(amount);
        self.set_account(addr, account);
        Ok(())
    }

    fn top_frame(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::new());
        }
        self.frames.last_mut().expect("frame just pushed")
    }

    fn flatten(&self) -> Vec<(Address, Account)> {
        let mut flat: Frame = Frame::new();
        for frame in &self.frames {
            flat.extend(frame);
        }
        let mut entries: Vec<(Address, Account)> = flat
            .into_iter()
            .filter_map(|(addr, entry)| entry.map(|account| (addr, account)))
            .collect();
        // deterministic persistence order
        entries.sort_unstable_by_key(|(addr, _)| *addr);
        entries
    }

    /// Root the state trie would have if the journal were committed now.
    pub fn current_root(&self) -> Result<B256, StateError> {
        let flat = self.flatten();
        self.db.root_with(flat.iter().map(|(addr, account)| (addr, account)))
    }

    /// Flatten the journal top-over-bottom and persist every surviving
    /// entry as one atomic batch, then clear the journal and drop the
    /// touched addresses from the read cache.
    pub fn commit_block(&mut self) -> Result<(), StateError> {
        let flat = self.flatten();
        trace!(accounts = flat.len(), "committing journal");
        self.db.save_accounts(&flat)?;
        self.frames.clear();
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        for (addr, _) in &flat {
            cache.pop(addr);
        }
        Ok(())
    }

    /// Discard the whole journal without touching the repository.
    pub fn rollback_block(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_kv::MemoryStore;
    use ember_primitives::EMPTY_ROOT_HASH;

    fn manager() -> StateManager<MemoryStore> {
        StateManager::new(StateDb::open(MemoryStore::new()).unwrap())
    }

    fn addr(byte: u8) -> Address {
        Address::with_last_byte(byte)
    }

    fn funded(balance: u64) -> Account {
        Account {
            balance: U256::from(balance),
            ..Account::empty()
        }
    }

    #[test]
    fn writes_stay_in_journal_until_commit() {
        let mut sm = manager();
        sm.begin_block();
        sm.set_account(addr(1), funded(10));
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(10)));
        // the repository has not been touched
        assert_eq!(sm.db().account(addr(1)).unwrap(), None);
        assert_eq!(sm.db().state_root(), EMPTY_ROOT_HASH);

        sm.commit_block().unwrap();
        assert_eq!(sm.journal_depth(), 0);
        assert_eq!(sm.db().account(addr(1)).unwrap(), Some(funded(10)));
    }

    #[test]
    fn nested_checkpoints_overlay_top_down() {
        let mut sm = manager();
        sm.begin_block();
        sm.set_account(addr(1), funded(1));
        sm.checkpoint();
        sm.set_account(addr(1), funded(2));
        sm.checkpoint();
        sm.set_account(addr(1), funded(3));

        // the top frame wins on read
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(3)));

        sm.revert_checkpoint().unwrap();
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(2)));

        sm.commit_checkpoint();
        assert_eq!(sm.journal_depth(), 1);
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(2)));
    }

    #[test]
    fn commit_checkpoint_on_single_frame_is_noop() {
        let mut sm = manager();
        sm.begin_block();
        sm.set_account(addr(1), funded(1));
        sm.commit_checkpoint();
        assert_eq!(sm.journal_depth(), 1);
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(1)));
    }

    #[test]
    fn revert_on_empty_journal_fails() {
        let mut sm = manager();
        assert_eq!(sm.revert_checkpoint(), Err(StateError::EmptyJournal));
    }

    #[test]
    fn tombstone_reads_absent_and_is_not_persisted() {
        let mut sm = manager();
        sm.begin_block();
        sm.set_account(addr(1), funded(5));
        sm.commit_block().unwrap();

        sm.begin_block();
        sm.remove_account(addr(1));
        assert_eq!(sm.account(addr(1)).unwrap(), None);
        sm.commit_block().unwrap();
        // the record survives in the repository
        assert_eq!(sm.db().account(addr(1)).unwrap(), Some(funded(5)));
    }

    #[test]
    fn rollback_discards_everything() {
        let mut sm = manager();
        sm.begin_block();
        sm.set_account(addr(1), funded(5));
        sm.checkpoint();
        sm.set_account(addr(2), funded(6));
        sm.rollback_block();
        assert_eq!(sm.journal_depth(), 0);
        assert_eq!(sm.account(addr(1)).unwrap(), None);
        assert_eq!(sm.db().state_root(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn current_root_matches_committed_root() {
        let mut sm = manager();
        sm.begin_block();
        sm.credit(addr(1), U256::from(7u64)).unwrap();
        sm.credit(addr(2), U256::from(9u64)).unwrap();
        let projected = sm.current_root().unwrap();
        assert_ne!(projected, EMPTY_ROOT_HASH);
        sm.commit_block().unwrap();
        assert_eq!(sm.db().state_root(), projected);
    }

    #[test]
    fn cache_is_refreshed_after_commit() {
        let mut sm = manager();
        sm.begin_block();
        sm.set_account(addr(1), funded(1));
        sm.commit_block().unwrap();
        // populate the cache
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(1)));

        sm.begin_block();
        sm.set_account(addr(1), funded(2));
        sm.commit_block().unwrap();
        // the dirty entry was dropped, not served stale
        assert_eq!(sm.account(addr(1)).unwrap(), Some(funded(2)));
    }

    #[test]
    fn credit_materialises_on_first_write() {
        let mut sm = manager();
        sm.begin_block();
        // a pure read does not materialise
        assert_eq!(sm.account(addr(3)).unwrap(), None);
        sm.commit_block().unwrap();
        assert_eq!(sm.db().account(addr(3)).unwrap(), None);

        sm.begin_block();
        sm.credit(addr(3), U256::from(1u64)).unwrap();
        sm.commit_block().unwrap();
        assert_eq!(sm.db().account(addr(3)).unwrap(), Some(funded(1)));
    }
}
