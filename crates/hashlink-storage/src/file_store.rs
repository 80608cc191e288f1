use hashlink_core::{Snapshot, SnapshotStore, StorageError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Snapshot kept in a single text file: the chain record, a newline, the pending record.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl SnapshotStore for FileStore {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot file yet");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot = Snapshot::from_records(&text)?;
        debug!(path = %self.path.display(), blocks = snapshot.chain.len(), "read snapshot file");
        Ok(Some(snapshot))
    }

    /// Writes to a uniquely named sibling file and renames it over the old snapshot,
    /// so neither a crash nor a concurrent writer leaves a half-written snapshot.
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let dir = self.dir();
        fs::create_dir_all(dir)?;
        let records = snapshot.to_records()?;

        let mut staging = NamedTempFile::new_in(dir)?;
        staging.as_file_mut().write_all(records.as_bytes())?;
        staging.as_file().sync_all()?;
        staging.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = %self.path.display(), blocks = snapshot.chain.len(), "wrote snapshot file");
        Ok(())
    }
}
