#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use hashlink_core::{Ledger, LedgerConfig, SnapshotStore, Wallet};
use hashlink_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn create_temp_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(db_path).expect("Failed to open SledStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn miner() -> Wallet {
    Wallet::from_secret_bytes(&[1u8; 32]).expect("valid seed")
}

pub fn payee() -> Wallet {
    Wallet::from_secret_bytes(&[2u8; 32]).expect("valid seed")
}

pub fn config() -> LedgerConfig {
    LedgerConfig::default().with_hosting_identity(miner().identity())
}

/// Two mined blocks, one committed transfer and one still pending.
pub fn populate<S: SnapshotStore + ?Sized>(ledger: &Ledger<S>) {
    let (a, b) = (miner(), payee());
    ledger.mine_block().expect("mine").saved.expect("save");
    ledger
        .add_transaction(a.identity(), b.identity(), &a.sign(b.identity(), 4), 4)
        .expect("admit")
        .saved
        .expect("save");
    ledger.mine_block().expect("mine").saved.expect("save");
    ledger
        .add_transaction(a.identity(), b.identity(), &a.sign(b.identity(), 3), 3)
        .expect("admit")
        .saved
        .expect("save");
}

pub fn open_ledger<S: SnapshotStore>(store: S) -> Ledger<S> {
    Ledger::open(config(), Arc::new(store))
}
