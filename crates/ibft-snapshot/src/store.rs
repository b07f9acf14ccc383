//! Checkpoint persistence
//!
//! One record per checkpoint, keyed by block hash.

use crate::error::Result;
use crate::snapshot::Snapshot;
use ibft_core::Hash;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage for checkpoint snapshots
pub trait SnapshotStore: Send + Sync {
    fn load(&self, hash: &Hash) -> Result<Option<Snapshot>>;

    fn store(&self, snapshot: &Snapshot) -> Result<()>;

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.load(hash)?.is_some())
    }
}

/// Checkpoints kept in memory
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, hash: &Hash) -> Result<Option<Snapshot>> {
        self.snapshots
            .read()
            .get(hash)
            .map(|bytes| Snapshot::from_bytes(bytes))
            .transpose()
    }

    fn store(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = snapshot.to_bytes()?;
        self.snapshots.write().insert(snapshot.hash, bytes);
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.snapshots.read().contains_key(hash))
    }
}

/// Checkpoints stored as one file each under a directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open (and create) the checkpoint directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, hash: &Hash) -> PathBuf {
        self.dir.join(format!("{}.snap", hash.to_hex()))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, hash: &Hash) -> Result<Option<Snapshot>> {
        let path = self.path_for(hash);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(Snapshot::from_bytes(&bytes)?))
    }

    fn store(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(&snapshot.hash);
        let temp_path = path.with_extension("tmp");

        std::fs::write(&temp_path, snapshot.to_bytes()?)?;
        std::fs::rename(&temp_path, &path)?;

        debug!(number = snapshot.number, hash = %snapshot.hash, "Stored snapshot checkpoint");
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.path_for(hash).exists())
    }
}
