use crate::{Block, Transaction};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Everything the ledger persists: the chain and the pending pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub chain: Vec<Block>,
    pub pending: Vec<Transaction>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl Snapshot {
    /// Two newline-separated JSON records: the chain, then the pending pool.
    pub fn to_records(&self) -> Result<String, StorageError> {
        let chain = serde_json::to_string(&self.chain)
            .map_err(|e| StorageError::Malformed(e.to_string()))?;
        let pending = serde_json::to_string(&self.pending)
            .map_err(|e| StorageError::Malformed(e.to_string()))?;
        Ok(format!("{chain}\n{pending}"))
    }

    /// Parses both records or nothing; a missing or unreadable record fails the whole snapshot.
    pub fn from_records(text: &str) -> Result<Self, StorageError> {
        let mut lines = text.lines();
        let (Some(chain), Some(pending)) = (lines.next(), lines.next()) else {
            return Err(StorageError::Malformed(
                "expected a chain record and a pending record".into(),
            ));
        };
        if lines.any(|extra| !extra.trim().is_empty()) {
            return Err(StorageError::Malformed("unexpected trailing records".into()));
        }
        let chain: Vec<Block> = serde_json::from_str(chain)
            .map_err(|e| StorageError::Malformed(format!("chain record: {e}")))?;
        let pending: Vec<Transaction> = serde_json::from_str(pending)
            .map_err(|e| StorageError::Malformed(format!("pending record: {e}")))?;
        Ok(Self { chain, pending })
    }
}

/// Durable home of a ledger snapshot. `Ok(None)` means nothing has been saved yet.
pub trait SnapshotStore: Send + Sync {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError>;
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Arc<S> {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        (**self).load_snapshot()
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        (**self).save_snapshot(snapshot)
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        (**self).load_snapshot()
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        (**self).save_snapshot(snapshot)
    }
}

/// Keeps the last saved snapshot in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn saved(&self) -> Option<Snapshot> {
        self.snapshot.lock().clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.snapshot.lock().clone())
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }
}
