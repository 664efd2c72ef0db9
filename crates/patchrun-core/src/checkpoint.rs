//! Checkpoint persistence.
//!
//! A checkpoint is the last version successfully applied to a subject. It is
//! the only durable state of the runner and the sole source of truth for
//! which steps have already been applied.

use crate::error::CheckpointError;
use crate::version::ZERO_VERSION;
use parking_lot::RwLock;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::HashMap;

/// Prefix of the preference key a subject's checkpoint is stored under.
pub const CHECKPOINT_KEY_PREFIX: &str = "patchrun_plugin.";

/// Storage key for a subject's checkpoint.
pub fn checkpoint_key(subject: &str) -> String {
    format!("{CHECKPOINT_KEY_PREFIX}{subject}")
}

/// A recorded checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last successfully applied version.
    pub version: String,
    /// Version recorded before this one, if any.
    pub previous: Option<String>,
    /// When the checkpoint was written (microseconds since epoch).
    pub updated_at: u64,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time.
    pub fn new(version: impl Into<String>, previous: Option<String>) -> Self {
        Self {
            version: version.into(),
            previous,
            updated_at: current_timestamp(),
        }
    }

    /// Serialize the checkpoint to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    /// Deserialize a checkpoint from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        // Stored values carry no alignment guarantee.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| CheckpointError::Deserialization(e.to_string()))
    }
}

/// Keyed read/write of the last applied version per subject.
///
/// Implementations are provided by the host. A write that returns `Ok` must
/// be durable; the runner treats an `Err` from [`CheckpointStore::set`] as
/// fatal for the current run.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for `subject`, if one was ever written.
    fn get(&self, subject: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Record `version` as the last applied version of `subject`.
    fn set(&self, subject: &str, version: &str) -> Result<Checkpoint, CheckpointError>;

    /// Forget the checkpoint for `subject`.
    fn clear(&self, subject: &str) -> Result<(), CheckpointError>;

    /// The recorded version, or [`ZERO_VERSION`] when none was recorded.
    fn current_version(&self, subject: &str) -> Result<String, CheckpointError> {
        Ok(self
            .get(subject)?
            .map(|checkpoint| checkpoint.version)
            .unwrap_or_else(|| ZERO_VERSION.to_string()))
    }
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with `subject` already at `version`.
    pub fn with_version(subject: &str, version: &str) -> Self {
        let store = Self::new();
        store
            .checkpoints
            .write()
            .insert(checkpoint_key(subject), Checkpoint::new(version, None));
        store
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, subject: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().get(&checkpoint_key(subject)).cloned())
    }

    fn set(&self, subject: &str, version: &str) -> Result<Checkpoint, CheckpointError> {
        let mut checkpoints = self.checkpoints.write();
        let key = checkpoint_key(subject);
        let previous = checkpoints.get(&key).map(|c| c.version.clone());
        let checkpoint = Checkpoint::new(version, previous);
        checkpoints.insert(key, checkpoint.clone());
        Ok(checkpoint)
    }

    fn clear(&self, subject: &str) -> Result<(), CheckpointError> {
        self.checkpoints.write().remove(&checkpoint_key(subject));
        Ok(())
    }
}

/// Checkpoint store backed by a sled tree.
pub struct SledCheckpointStore {
    tree: sled::Tree,
}

impl SledCheckpointStore {
    /// Tree name used by [`SledCheckpointStore::open`].
    pub const TREE_NAME: &'static str = "patchrun:checkpoint";

    /// Open or create the checkpoint tree in `db`.
    pub fn open(db: &sled::Db) -> Result<Self, CheckpointError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// Use an already opened tree.
    pub fn from_tree(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// List all recorded `(subject, checkpoint)` pairs.
    pub fn list(&self) -> Result<Vec<(String, Checkpoint)>, CheckpointError> {
        let mut checkpoints = Vec::new();
        for result in self.tree.scan_prefix(CHECKPOINT_KEY_PREFIX) {
            let (key, value) = result?;
            let key = String::from_utf8_lossy(&key);
            let subject = key.trim_start_matches(CHECKPOINT_KEY_PREFIX).to_string();
            checkpoints.push((subject, Checkpoint::from_bytes(&value)?));
        }
        Ok(checkpoints)
    }
}

impl CheckpointStore for SledCheckpointStore {
    fn get(&self, subject: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.tree.get(checkpoint_key(subject))? {
            Some(bytes) => Ok(Some(Checkpoint::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, subject: &str, version: &str) -> Result<Checkpoint, CheckpointError> {
        let previous = self.get(subject)?.map(|c| c.version);
        let checkpoint = Checkpoint::new(version, previous);
        self.tree
            .insert(checkpoint_key(subject), checkpoint.to_bytes()?)?;
        self.tree.flush()?;
        Ok(checkpoint)
    }

    fn clear(&self, subject: &str) -> Result<(), CheckpointError> {
        self.tree.remove(checkpoint_key(subject))?;
        self.tree.flush()?;
        Ok(())
    }
}

fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_defaults_to_zero() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("abc_plugin").unwrap().is_none());
        assert_eq!(store.current_version("abc_plugin").unwrap(), ZERO_VERSION);
    }

    #[test]
    fn test_memory_store_set_tracks_previous() {
        let store = MemoryCheckpointStore::new();

        let first = store.set("abc_plugin", "1.0").unwrap();
        assert_eq!(first.previous, None);

        let second = store.set("abc_plugin", "1.5").unwrap();
        assert_eq!(second.previous.as_deref(), Some("1.0"));
        assert_eq!(store.current_version("abc_plugin").unwrap(), "1.5");

        // Subjects are independent.
        assert_eq!(store.current_version("other").unwrap(), ZERO_VERSION);

        store.clear("abc_plugin").unwrap();
        assert_eq!(store.current_version("abc_plugin").unwrap(), ZERO_VERSION);
    }

    #[test]
    fn test_checkpoint_serialization() {
        let checkpoint = Checkpoint::new("1.2.3", Some("1.2".to_string()));
        let bytes = checkpoint.to_bytes().unwrap();
        let restored = Checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(restored, checkpoint);
    }

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(checkpoint_key("abc_plugin"), "patchrun_plugin.abc_plugin");
    }

    #[test]
    fn test_sled_store_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let db = sled::open(temp_dir.path()).unwrap();
            let store = SledCheckpointStore::open(&db).unwrap();
            assert_eq!(store.current_version("abc_plugin").unwrap(), ZERO_VERSION);
            store.set("abc_plugin", "1.0").unwrap();
            store.set("abc_plugin", "2.0").unwrap();
        }

        let db = sled::open(temp_dir.path()).unwrap();
        let store = SledCheckpointStore::open(&db).unwrap();
        let checkpoint = store.get("abc_plugin").unwrap().unwrap();
        assert_eq!(checkpoint.version, "2.0");
        assert_eq!(checkpoint.previous.as_deref(), Some("1.0"));

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "abc_plugin");

        store.clear("abc_plugin").unwrap();
        assert!(store.get("abc_plugin").unwrap().is_none());
    }
}
