//! The ledger: sole owner of the chain and the pending pool.
//!
//! Mutating operations (`add_transaction`, `mine_block`, `load`, `save`) are serialized
//! by a writer lock. Chain and pool live together behind one `RwLock`, so readers always
//! see them in a matching state; a mine holds only the writer lock while searching
//! for a proof and takes the write lock once, to append the block and clear the pool.

use crate::constants::{MINING_REWARD, MINING_SENDER, POW_TARGET_DIFFICULTY};
use crate::mine::proof_of_work_parallel;
use crate::pow::{self, SearchError};
use crate::store::{Snapshot, SnapshotStore, StorageError};
use crate::verify::{verify_chain, verify_signature, verify_transaction, ConsensusParams};
use crate::{hash_block, Amount, Balance, Block, Transaction};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub difficulty: u32,
    pub mining_reward: Amount,
    /// Identity credited by mining. Without one the ledger cannot mine.
    pub hosting_identity: Option<String>,
    pub parallel_mining: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: POW_TARGET_DIFFICULTY,
            mining_reward: MINING_REWARD,
            hosting_identity: None,
            parallel_mining: false,
        }
    }
}

impl LedgerConfig {
    pub fn with_hosting_identity(mut self, identity: impl Into<String>) -> Self {
        self.hosting_identity = Some(identity.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn consensus(&self) -> ConsensusParams {
        ConsensusParams {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
        }
    }
}

/// Why a transaction was not admitted. The ledger is unchanged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: Balance, requested: Amount },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("sender `MINING` is reserved for mining rewards")]
    ReservedSender,
}

/// Why no block was mined. The ledger is unchanged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MineError {
    #[error("no hosting identity configured")]
    NoHostingIdentity,

    #[error("pending transaction #{position} failed signature verification")]
    InvalidPooledTransaction { position: usize },

    #[error("mining cancelled")]
    Cancelled,

    #[error("no proof exists for the current pool")]
    Exhausted,
}

impl From<SearchError> for MineError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Cancelled => MineError::Cancelled,
            SearchError::Exhausted => MineError::Exhausted,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("snapshot chain failed verification")]
    InvalidChain,

    #[error("snapshot pending transaction #{position} is invalid")]
    InvalidPendingTransaction { position: usize },
}

#[derive(Debug, Error)]
#[error("failed to save snapshot: {0}")]
pub struct SaveError(#[from] pub StorageError);

/// A state change that has been applied in memory, plus the outcome of persisting it.
/// A failed save never rolls the change back; call [`Ledger::save`] to retry.
#[must_use]
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub saved: Result<(), SaveError>,
}

impl<T> Committed<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn is_saved(&self) -> bool {
        self.saved.is_ok()
    }
}

#[derive(Clone, Debug)]
struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
}

impl LedgerState {
    fn genesis() -> Self {
        Self {
            chain: vec![Block::genesis()],
            pending: vec![],
        }
    }

    fn tip(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    /// Received over committed blocks, minus sent over committed blocks and the pool.
    fn balance(&self, identity: &str) -> Balance {
        let committed = self.chain.iter().flat_map(|block| &block.transactions);
        let received: Balance = committed
            .clone()
            .filter(|tx| tx.recipient() == identity)
            .map(|tx| Balance::from(tx.amount()))
            .sum();
        let sent: Balance = committed
            .chain(&self.pending)
            .filter(|tx| tx.sender() == identity)
            .map(|tx| Balance::from(tx.amount()))
            .sum();
        received - sent
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            chain: self.chain.clone(),
            pending: self.pending.clone(),
        }
    }
}

/// Cancel flags of every proof search that has started, queued ones included.
#[derive(Default)]
struct Searches {
    flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Searches {
    fn register(&self) -> SearchGuard<'_> {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().push(flag.clone());
        SearchGuard {
            searches: self,
            flag,
        }
    }

    fn cancel_all(&self) -> usize {
        let flags = self.flags.lock();
        for flag in flags.iter() {
            flag.store(true, Ordering::SeqCst);
        }
        flags.len()
    }
}

/// Deregisters its search on drop.
struct SearchGuard<'a> {
    searches: &'a Searches,
    flag: Arc<AtomicBool>,
}

impl SearchGuard<'_> {
    fn cancel(&self) -> &AtomicBool {
        &self.flag
    }
}

impl Drop for SearchGuard<'_> {
    fn drop(&mut self) {
        self.searches
            .flags
            .lock()
            .retain(|flag| !Arc::ptr_eq(flag, &self.flag));
    }
}

pub struct Ledger<S: SnapshotStore + ?Sized> {
    config: LedgerConfig,
    state: RwLock<LedgerState>,
    writer: Mutex<()>,
    searches: Searches,
    store: Arc<S>,
}

impl<S: SnapshotStore + ?Sized> Ledger<S> {
    /// A ledger at genesis with an empty pool. Nothing is read from `store`.
    pub fn new(config: LedgerConfig, store: Arc<S>) -> Self {
        Self {
            config,
            state: RwLock::new(LedgerState::genesis()),
            writer: Mutex::new(()),
            searches: Searches::default(),
            store,
        }
    }

    /// Like [`Ledger::new`], then loads the stored snapshot. A snapshot that cannot be
    /// loaded is logged and the ledger starts from genesis.
    pub fn open(config: LedgerConfig, store: Arc<S>) -> Self {
        let ledger = Self::new(config, store);
        if let Err(err) = ledger.load() {
            warn!(error = %err, "could not load snapshot, starting from genesis");
        }
        ledger
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn hosting_identity(&self) -> Option<&str> {
        self.config.hosting_identity.as_deref()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn chain(&self) -> Vec<Block> {
        self.state.read().chain.clone()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.read().pending.clone()
    }

    pub fn last_block(&self) -> Block {
        self.state.read().tip().clone()
    }

    /// Number of blocks, genesis included.
    pub fn block_count(&self) -> usize {
        self.state.read().chain.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.read().snapshot()
    }

    pub fn get_balance(&self, identity: &str) -> Balance {
        self.state.read().balance(identity)
    }

    /// Balance of the hosting identity, `None` when the ledger has none.
    pub fn host_balance(&self) -> Option<Balance> {
        self.hosting_identity().map(|id| self.get_balance(id))
    }

    /// Runs the full-chain integrity check over the current chain.
    pub fn verify(&self) -> bool {
        let chain = self.chain();
        verify_chain(&chain, &self.config.consensus())
    }

    pub fn add_transaction(
        &self,
        sender: &str,
        recipient: &str,
        signature: &str,
        amount: Amount,
    ) -> Result<Committed<Transaction>, RejectReason> {
        if sender == MINING_SENDER {
            warn!(recipient, amount, "rejected transaction from reserved sender");
            return Err(RejectReason::ReservedSender);
        }
        let tx = Transaction::transfer(sender, recipient, signature, amount);

        let _writer = self.writer.lock();
        let snapshot = {
            let mut state = self.state.write();
            if !verify_transaction(&tx, |id| state.balance(id)) {
                let available = state.balance(sender);
                warn!(sender, available, amount, "rejected transaction: insufficient balance");
                return Err(RejectReason::InsufficientBalance {
                    available,
                    requested: amount,
                });
            }
            if !verify_signature(&tx) {
                warn!(sender, recipient, amount, "rejected transaction: invalid signature");
                return Err(RejectReason::InvalidSignature);
            }
            state.pending.push(tx.clone());
            debug!(sender, recipient, amount, pending = state.pending.len(), "transaction admitted");
            state.snapshot()
        };

        let saved = self.persist(&snapshot);
        Ok(Committed { value: tx, saved })
    }

    /// Smallest proof for the current pool on top of the current tip.
    pub fn proof_of_work(&self) -> Result<u64, MineError> {
        let search = self.searches.register();
        let (pending, last_hash) = {
            let state = self.state.read();
            (state.pending.clone(), hash_block(state.tip()))
        };
        self.search_proof(&pending, &last_hash, search.cancel())
    }

    pub fn mine_block(&self) -> Result<Committed<Block>, MineError> {
        let hosting = self
            .hosting_identity()
            .ok_or(MineError::NoHostingIdentity)?;

        // Registered before queueing on the writer lock, so a cancel issued while
        // waiting still applies.
        let search = self.searches.register();
        let _writer = self.writer.lock();
        let (mut transactions, index, previous_hash) = {
            let state = self.state.read();
            (
                state.pending.clone(),
                state.chain.len() as u64,
                hash_block(state.tip()),
            )
        };

        // Fail closed: one bad pooled transaction aborts the whole attempt.
        if let Some(position) = transactions.iter().position(|tx| !verify_signature(tx)) {
            warn!(position, "refusing to mine: pooled transaction has an invalid signature");
            return Err(MineError::InvalidPooledTransaction { position });
        }

        let proof = self.search_proof(&transactions, &previous_hash, search.cancel())?;
        transactions.push(Transaction::reward(hosting, self.config.mining_reward));
        let block = Block::new(index, previous_hash, transactions, proof);

        let snapshot = {
            let mut state = self.state.write();
            state.chain.push(block.clone());
            state.pending.clear();
            state.snapshot()
        };
        info!(
            index = block.index,
            proof = block.proof,
            transactions = block.transactions.len(),
            "mined block"
        );

        let saved = self.persist(&snapshot);
        Ok(Committed {
            value: block,
            saved,
        })
    }

    /// Aborts every proof-of-work search that is running or waiting to run. Searches
    /// started afterwards are unaffected.
    pub fn cancel_mining(&self) {
        let cancelled = self.searches.cancel_all();
        debug!(cancelled, "cancel requested");
    }

    /// Replaces chain and pool with the stored snapshot, all or nothing. A missing
    /// snapshot leaves the ledger as it is.
    pub fn load(&self) -> Result<(), LoadError> {
        let _writer = self.writer.lock();
        let Some(snapshot) = self.store.load_snapshot()? else {
            info!("no snapshot stored, keeping current state");
            return Ok(());
        };
        self.check_snapshot(&snapshot)?;

        let (blocks, pending) = (snapshot.chain.len(), snapshot.pending.len());
        *self.state.write() = LedgerState {
            chain: snapshot.chain,
            pending: snapshot.pending,
        };
        info!(blocks, pending, "loaded snapshot");
        Ok(())
    }

    /// Persists the current state. Holds the writer lock so a save can never land
    /// after, and overwrite, a newer commit.
    pub fn save(&self) -> Result<(), SaveError> {
        let _writer = self.writer.lock();
        let snapshot = self.snapshot();
        self.persist(&snapshot)
    }

    fn check_snapshot(&self, snapshot: &Snapshot) -> Result<(), LoadError> {
        if !verify_chain(&snapshot.chain, &self.config.consensus()) {
            return Err(LoadError::InvalidChain);
        }
        if let Some(position) = snapshot
            .pending
            .iter()
            .position(|tx| tx.is_reward() || !verify_signature(tx))
        {
            return Err(LoadError::InvalidPendingTransaction { position });
        }
        Ok(())
    }

    fn search_proof(
        &self,
        txs: &[Transaction],
        last_hash: &str,
        cancel: &AtomicBool,
    ) -> Result<u64, MineError> {
        let difficulty = self.config.difficulty;
        let proof = if self.config.parallel_mining {
            proof_of_work_parallel(txs, last_hash, difficulty, cancel)
        } else {
            pow::proof_of_work(txs, last_hash, difficulty, cancel)
        };
        proof.map_err(|err| {
            info!(error = %err, "proof-of-work search ended without a proof");
            err.into()
        })
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), SaveError> {
        self.store.save_snapshot(snapshot).map_err(|err| {
            warn!(error = %err, "failed to save snapshot");
            SaveError(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, Wallet};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn wallet(seed: u8) -> Wallet {
        Wallet::from_secret_bytes(&[seed; 32]).unwrap()
    }

    fn ledger_for(host: &Wallet) -> Ledger<MemoryStore> {
        let config = LedgerConfig::default().with_hosting_identity(host.identity());
        Ledger::new(config, Arc::new(MemoryStore::default()))
    }

    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
            Err(StorageError::Backend("unavailable".into()))
        }

        fn save_snapshot(&self, _: &Snapshot) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk full".into()))
        }
    }

    /// Parks the first save inside the store until the test releases it.
    struct GatedStore {
        inner: MemoryStore,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl GatedStore {
        fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let store = Self {
                inner: MemoryStore::default(),
                gate: Mutex::new(Some((entered_tx, release_rx))),
            };
            (store, entered_rx, release_tx)
        }
    }

    impl SnapshotStore for GatedStore {
        fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
            self.inner.load_snapshot()
        }

        fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
            let gate = self.gate.lock().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.inner.save_snapshot(snapshot)
        }
    }

    #[test]
    fn new_ledger_starts_at_genesis() {
        let ledger = ledger_for(&wallet(1));
        assert_eq!(ledger.chain(), vec![Block::genesis()]);
        assert!(ledger.pending_transactions().is_empty());
        assert_eq!(ledger.get_balance("nobody"), 0);
        assert!(ledger.verify());
    }

    #[test]
    fn spend_scenario_matches_exact_arithmetic() {
        let a = wallet(1);
        let b = wallet(2);
        let ledger = ledger_for(&a);
        assert_eq!(ledger.host_balance(), Some(0));

        let sig = a.sign(b.identity(), 5);
        let rejected = ledger.add_transaction(a.identity(), b.identity(), &sig, 5);
        assert_eq!(
            rejected.unwrap_err(),
            RejectReason::InsufficientBalance {
                available: 0,
                requested: 5
            }
        );

        ledger.mine_block().unwrap().saved.unwrap();
        assert_eq!(ledger.get_balance(a.identity()), 10);

        ledger
            .add_transaction(a.identity(), b.identity(), &sig, 5)
            .unwrap()
            .saved
            .unwrap();
        assert_eq!(ledger.get_balance(a.identity()), 5);
        // Pending credits are not spendable yet.
        assert_eq!(ledger.get_balance(b.identity()), 0);

        ledger.mine_block().unwrap().saved.unwrap();
        assert_eq!(ledger.get_balance(a.identity()), 15);
        assert_eq!(ledger.get_balance(b.identity()), 5);
        assert!(ledger.verify());
    }

    #[test]
    fn accepted_transfer_moves_exactly_its_amount() {
        let a = wallet(1);
        let b = wallet(2);
        let ledger = ledger_for(&a);
        ledger.mine_block().unwrap().saved.unwrap();
        ledger.mine_block().unwrap().saved.unwrap();

        let (sender_before, recipient_before) =
            (ledger.get_balance(a.identity()), ledger.get_balance(b.identity()));
        let tx = a.transfer(b.identity(), 7);
        let _ = ledger
            .add_transaction(tx.sender(), tx.recipient(), tx.signature(), 7)
            .unwrap();
        assert_eq!(ledger.get_balance(a.identity()), sender_before - 7);

        ledger.mine_block().unwrap().saved.unwrap();
        assert_eq!(ledger.get_balance(b.identity()), recipient_before + 7);
    }

    #[test]
    fn pending_spends_count_against_the_sender() {
        let a = wallet(1);
        let ledger = ledger_for(&a);
        ledger.mine_block().unwrap().saved.unwrap();

        let _ = ledger
            .add_transaction(a.identity(), "bob", &a.sign("bob", 6), 6)
            .unwrap();
        let second = ledger.add_transaction(a.identity(), "carol", &a.sign("carol", 6), 6);
        assert!(matches!(
            second,
            Err(RejectReason::InsufficientBalance { available: 4, requested: 6 })
        ));
        assert_eq!(ledger.pending_transactions().len(), 1);
    }

    #[test]
    fn bad_signature_is_rejected_without_mutation() {
        let a = wallet(1);
        let mallory = wallet(9);
        let ledger = ledger_for(&a);
        ledger.mine_block().unwrap().saved.unwrap();
        let before = ledger.snapshot();

        let forged = mallory.sign("bob", 5);
        assert_eq!(
            ledger
                .add_transaction(a.identity(), "bob", &forged, 5)
                .unwrap_err(),
            RejectReason::InvalidSignature
        );
        assert_eq!(
            ledger
                .add_transaction(a.identity(), "bob", "", 5)
                .unwrap_err(),
            RejectReason::InvalidSignature
        );
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn reserved_sender_cannot_be_submitted() {
        let ledger = ledger_for(&wallet(1));
        assert_eq!(
            ledger
                .add_transaction(MINING_SENDER, "bob", "", 1_000)
                .unwrap_err(),
            RejectReason::ReservedSender
        );
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn mined_block_holds_pool_plus_one_reward() {
        let a = wallet(1);
        let ledger = ledger_for(&a);
        ledger.mine_block().unwrap().saved.unwrap();
        let tx = a.transfer("bob", 3);
        let _ = ledger
            .add_transaction(tx.sender(), tx.recipient(), tx.signature(), 3)
            .unwrap();

        let pool = ledger.pending_transactions();
        let tip = ledger.last_block();
        let block = ledger.mine_block().unwrap().into_inner();

        let mut expected = pool;
        expected.push(Transaction::reward(a.identity(), MINING_REWARD));
        assert_eq!(block.transactions, expected);
        assert_eq!(block.index, 2);
        assert_eq!(block.previous_hash, hash_block(&tip));
        assert_eq!(ledger.block_count(), 3);
        assert!(ledger.pending_transactions().is_empty());
        assert!(pow::valid_proof(
            &block.transactions[..1],
            &block.previous_hash,
            block.proof,
            POW_TARGET_DIFFICULTY
        ));
    }

    #[test]
    fn mining_needs_a_hosting_identity() {
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(MemoryStore::default()));
        assert_eq!(ledger.mine_block().unwrap_err(), MineError::NoHostingIdentity);
        assert_eq!(ledger.host_balance(), None);
        assert_eq!(ledger.block_count(), 1);
    }

    #[test]
    fn invalid_pooled_transaction_aborts_mining() {
        let a = wallet(1);
        let ledger = ledger_for(&a);
        ledger.mine_block().unwrap().saved.unwrap();
        let _ = ledger
            .add_transaction(a.identity(), "bob", &a.sign("bob", 2), 2)
            .unwrap();
        ledger
            .state
            .write()
            .pending
            .push(Transaction::transfer(a.identity(), "eve", a.sign("eve", 1), 3));
        let before = ledger.snapshot();

        assert_eq!(
            ledger.mine_block().unwrap_err(),
            MineError::InvalidPooledTransaction { position: 1 }
        );
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn proof_of_work_finds_smallest_valid_proof() {
        let a = wallet(1);
        let ledger = ledger_for(&a);
        let proof = ledger.proof_of_work().unwrap();
        let last_hash = hash_block(&ledger.last_block());
        assert!(pow::valid_proof(&[], &last_hash, proof, POW_TARGET_DIFFICULTY));
        assert!((0..proof).all(|p| !pow::valid_proof(&[], &last_hash, p, POW_TARGET_DIFFICULTY)));

        let block = ledger.mine_block().unwrap().into_inner();
        assert_eq!(block.proof, proof);
    }

    #[test]
    fn parallel_mining_produces_the_same_proof() {
        let a = wallet(1);
        let config = LedgerConfig {
            parallel_mining: true,
            ..LedgerConfig::default().with_hosting_identity(a.identity())
        };
        let parallel = Ledger::new(config, Arc::new(MemoryStore::default()));
        let sequential = ledger_for(&a);
        assert_eq!(
            parallel.proof_of_work().unwrap(),
            sequential.proof_of_work().unwrap()
        );
        let _ = parallel.mine_block().unwrap();
        assert!(parallel.verify());
    }

    #[test]
    fn cancelled_mine_leaves_state_untouched() {
        let a = wallet(1);
        // Unreachable target: the search only ends by cancellation.
        let config = LedgerConfig::default()
            .with_hosting_identity(a.identity())
            .with_difficulty(256);
        let ledger = Ledger::new(config, Arc::new(MemoryStore::default()));
        let before = ledger.snapshot();

        let result = thread::scope(|s| {
            let handle = s.spawn(|| ledger.mine_block());
            while !handle.is_finished() {
                ledger.cancel_mining();
                thread::sleep(Duration::from_millis(5));
            }
            handle.join().unwrap()
        });
        assert_eq!(result.unwrap_err(), MineError::Cancelled);
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn cancel_reaches_a_mine_queued_behind_the_writer() {
        let a = wallet(1);
        let config = LedgerConfig::default()
            .with_hosting_identity(a.identity())
            .with_difficulty(256);
        let (store, entered, release) = GatedStore::new();
        let ledger = Ledger::new(config, Arc::new(store));

        thread::scope(|s| {
            let saver = s.spawn(|| ledger.save());
            entered.recv().unwrap();
            let miner = s.spawn(|| ledger.mine_block());
            while ledger.searches.flags.lock().is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
            ledger.cancel_mining();
            release.send(()).unwrap();

            saver.join().unwrap().unwrap();
            assert_eq!(miner.join().unwrap().unwrap_err(), MineError::Cancelled);
        });
        assert_eq!(ledger.block_count(), 1);
    }

    #[test]
    fn cancel_does_not_outlive_its_search() {
        let a = wallet(1);
        let ledger = ledger_for(&a);
        ledger.cancel_mining();
        let _ = ledger.proof_of_work().unwrap();
        ledger.mine_block().unwrap().saved.unwrap();
        assert_eq!(ledger.block_count(), 2);
        assert!(ledger.searches.flags.lock().is_empty());
    }

    #[test]
    fn save_cannot_overwrite_a_newer_commit() {
        let a = wallet(1);
        let config = LedgerConfig::default().with_hosting_identity(a.identity());
        let (store, entered, release) = GatedStore::new();
        let store = Arc::new(store);
        let ledger = Ledger::new(config, store.clone());

        thread::scope(|s| {
            let saver = s.spawn(|| ledger.save());
            entered.recv().unwrap();
            let miner = s.spawn(|| ledger.mine_block().map(|mined| mined.is_saved()));
            thread::sleep(Duration::from_millis(50));
            release.send(()).unwrap();

            saver.join().unwrap().unwrap();
            assert!(miner.join().unwrap().unwrap());
        });

        let persisted = store.inner.saved().unwrap();
        assert_eq!(persisted.chain.len(), 2);
        assert_eq!(persisted.chain, ledger.chain());
    }

    #[test]
    fn readers_never_see_a_torn_commit() {
        let a = wallet(1);
        let b = wallet(2);
        let ledger = ledger_for(&a);
        thread::scope(|s| {
            s.spawn(|| {
                for round in 0..5u64 {
                    if round > 0 {
                        let sig = a.sign(b.identity(), round);
                        ledger
                            .add_transaction(a.identity(), b.identity(), &sig, round)
                            .unwrap()
                            .saved
                            .unwrap();
                    }
                    ledger.mine_block().unwrap().saved.unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..500 {
                    let snapshot = ledger.snapshot();
                    // A committed transfer never lingers in the pool.
                    for tx in &snapshot.pending {
                        assert!(snapshot
                            .chain
                            .iter()
                            .all(|block| !block.transactions.contains(tx)));
                    }

                    let minted = 10 * (snapshot.chain.len() as i128 - 1);
                    let in_flight: Balance = snapshot
                        .pending
                        .iter()
                        .map(|tx| Balance::from(tx.amount()))
                        .sum();
                    let state = LedgerState {
                        chain: snapshot.chain,
                        pending: snapshot.pending,
                    };
                    let (held_a, held_b) = (state.balance(a.identity()), state.balance(b.identity()));
                    assert!(held_a >= 0);
                    assert_eq!(held_a + held_b + in_flight, minted);
                }
            });
        });
        assert_eq!(ledger.get_balance(a.identity()), 40);
        assert_eq!(ledger.get_balance(b.identity()), 10);
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn save_failure_is_reported_but_not_rolled_back() {
        let a = wallet(1);
        let config = LedgerConfig::default().with_hosting_identity(a.identity());
        let ledger = Ledger::new(config, Arc::new(FailingStore));

        let mined = ledger.mine_block().unwrap();
        assert!(!mined.is_saved());
        assert_eq!(ledger.block_count(), 2);

        let admitted = ledger
            .add_transaction(a.identity(), "bob", &a.sign("bob", 1), 1)
            .unwrap();
        assert!(matches!(admitted.saved, Err(SaveError(StorageError::Backend(_)))));
        assert_eq!(ledger.pending_transactions().len(), 1);
        assert!(ledger.save().is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let a = wallet(1);
        let b = wallet(2);
        let store = Arc::new(MemoryStore::default());
        let config = LedgerConfig::default().with_hosting_identity(a.identity());

        let original = Ledger::new(config.clone(), store.clone());
        original.mine_block().unwrap().saved.unwrap();
        original
            .add_transaction(a.identity(), b.identity(), &a.sign(b.identity(), 4), 4)
            .unwrap()
            .saved
            .unwrap();
        original.mine_block().unwrap().saved.unwrap();
        original
            .add_transaction(a.identity(), b.identity(), &a.sign(b.identity(), 2), 2)
            .unwrap()
            .saved
            .unwrap();

        let restored = Ledger::open(config, store);
        assert_eq!(restored.chain(), original.chain());
        assert_eq!(restored.pending_transactions(), original.pending_transactions());
        assert!(restored.verify());
        for id in [a.identity(), b.identity(), "stranger"] {
            assert_eq!(restored.get_balance(id), original.get_balance(id));
        }
    }

    #[test]
    fn missing_snapshot_keeps_genesis() {
        let ledger = ledger_for(&wallet(1));
        ledger.load().unwrap();
        assert_eq!(ledger.chain(), vec![Block::genesis()]);
    }

    #[test]
    fn tampered_snapshot_is_rejected_whole() {
        let a = wallet(1);
        let source = ledger_for(&a);
        source.mine_block().unwrap().saved.unwrap();
        source.mine_block().unwrap().saved.unwrap();
        let mut snapshot = source.snapshot();
        snapshot.chain[1].transactions[0] = Transaction::reward("mallory", 10);

        let config = LedgerConfig::default().with_hosting_identity(a.identity());
        let target = Ledger::new(config.clone(), Arc::new(MemoryStore::with_snapshot(snapshot)));
        target.mine_block().unwrap().saved.unwrap();
        let before = target.snapshot();
        assert!(matches!(target.load(), Err(LoadError::InvalidChain)));
        assert_eq!(target.snapshot(), before);

        let mut forged_pool = source.snapshot();
        forged_pool.pending.push(Transaction::reward("mallory", 99));
        let target = Ledger::new(config, Arc::new(MemoryStore::with_snapshot(forged_pool)));
        assert!(matches!(
            target.load(),
            Err(LoadError::InvalidPendingTransaction { position: 0 })
        ));
        assert_eq!(target.chain(), vec![Block::genesis()]);
    }

    #[test]
    fn unreadable_store_opens_at_genesis() {
        let ledger = Ledger::open(LedgerConfig::default(), Arc::new(FailingStore));
        assert_eq!(ledger.chain(), vec![Block::genesis()]);
        assert!(matches!(
            ledger.load(),
            Err(LoadError::Storage(StorageError::Backend(_)))
        ));
    }
}
