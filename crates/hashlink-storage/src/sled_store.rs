use hashlink_core::{Block, Snapshot, SnapshotStore, StorageError, Transaction};
use sled::{Batch, Db, Tree};
use std::path::Path;
use tracing::info;

const TREE_SNAPSHOT: &str = "snapshot";
const KEY_CHAIN: &[u8] = b"chain";
const KEY_PENDING: &[u8] = b"pending";

/// Snapshot kept in sled: chain and pool as two bincode values written in one batch.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    snapshot: Tree,
}

fn backend(err: sled::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn malformed(what: &str, err: bincode::Error) -> StorageError {
    StorageError::Malformed(format!("{what}: {err}"))
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(backend)?;
        let snapshot = db.open_tree(TREE_SNAPSHOT).map_err(backend)?;
        info!("sled store opened");
        Ok(Self { db, snapshot })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(backend)?;
        Ok(())
    }

    /// Removes any stored snapshot.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.snapshot.clear().map_err(backend)?;
        self.flush()
    }
}

impl SnapshotStore for SledStore {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        let chain = self.snapshot.get(KEY_CHAIN).map_err(backend)?;
        let pending = self.snapshot.get(KEY_PENDING).map_err(backend)?;
        match (chain, pending) {
            (None, None) => Ok(None),
            (Some(chain), Some(pending)) => {
                let chain: Vec<Block> =
                    bincode::deserialize(&chain).map_err(|e| malformed("chain", e))?;
                let pending: Vec<Transaction> =
                    bincode::deserialize(&pending).map_err(|e| malformed("pending", e))?;
                Ok(Some(Snapshot { chain, pending }))
            }
            _ => Err(StorageError::Malformed(
                "snapshot is missing one of its records".into(),
            )),
        }
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let chain = bincode::serialize(&snapshot.chain).map_err(|e| malformed("chain", e))?;
        let pending =
            bincode::serialize(&snapshot.pending).map_err(|e| malformed("pending", e))?;

        let mut batch = Batch::default();
        batch.insert(KEY_CHAIN, chain);
        batch.insert(KEY_PENDING, pending);
        self.snapshot.apply_batch(batch).map_err(backend)?;
        self.flush()
    }
}
