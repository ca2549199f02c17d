//! Durable key-value store and the typed job view on top of it.
//!
//! The whole store is one small JSON document. `FileKvStore` keeps it in
//! memory and rewrites it atomically (tmp + rename) on every change.

use crate::error::{ReposterError, Result};
use crate::guard::GuardFlag;
use crate::job::{JobRecord, SCHEMA_VERSION};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key of the single active job record.
pub const JOB_KEY: &str = "repost_job";

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Store `value` only when `key` is absent. Returns whether it was stored.
    fn set_if_absent(&self, key: &str, value: Value) -> Result<bool>;
}

/// In-process store.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: Value) -> Result<bool> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }
}

/// JSON file backed store.
pub struct FileKvStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl FileKvStore {
    /// Open (or create) the store at `path`. An unreadable document is moved
    /// aside to `<path>.bak` and the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, Value>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    let backup = path.with_extension("json.bak");
                    tracing::warn!(
                        "Job store {:?} is unreadable ({}), moving it to {:?}",
                        path,
                        e,
                        backup
                    );
                    std::fs::rename(&path, &backup)?;
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!("Opened job store {:?} ({} keys)", path, entries.len());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: Value) -> Result<bool> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        self.persist(&entries)?;
        Ok(true)
    }
}

/// Typed access to the job record and its guard flags.
#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KvStore>,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn load(&self) -> Result<Option<JobRecord>> {
        let Some(value) = self.kv.get(JOB_KEY)? else {
            return Ok(None);
        };
        let version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if version != SCHEMA_VERSION as u64 {
            return Err(ReposterError::Store(format!(
                "job record has schema version {}, expected {}",
                version, SCHEMA_VERSION
            )));
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    pub fn save(&self, record: &JobRecord) -> Result<()> {
        self.kv.set(JOB_KEY, serde_json::to_value(record)?)
    }

    pub fn delete(&self) -> Result<()> {
        self.kv.remove(JOB_KEY)
    }

    pub fn flag(&self, flag: GuardFlag) -> Result<bool> {
        Ok(self.kv.get(flag.key())?.is_some())
    }

    /// Set `flag` if it is not set yet. Returns whether this call set it.
    pub fn claim_flag(&self, flag: GuardFlag) -> Result<bool> {
        self.kv
            .set_if_absent(flag.key(), Value::from(crate::job::now_ms()))
    }

    pub fn clear_flag(&self, flag: GuardFlag) -> Result<()> {
        self.kv.remove(flag.key())
    }

    pub fn clear_flags(&self) -> Result<()> {
        for flag in GuardFlag::ALL {
            self.kv.remove(flag.key())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, PageId};

    #[test]
    fn test_memory_set_if_absent() {
        let kv = MemoryKvStore::new();
        assert!(kv.set_if_absent("a", Value::from(1)).unwrap());
        assert!(!kv.set_if_absent("a", Value::from(2)).unwrap());
        assert_eq!(kv.get("a").unwrap(), Some(Value::from(1)));
        kv.remove("a").unwrap();
        assert_eq!(kv.get("a").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_store.json");

        let store = JobStore::new(Arc::new(FileKvStore::open(&path).unwrap()));
        let mut record = JobRecord::new("https://example/listing/1", PageId::new("tab"));
        record.status = JobStatus::PendingDelete;
        store.save(&record).unwrap();
        assert!(store.claim_flag(GuardFlag::DeleteClick).unwrap());

        let reopened = JobStore::new(Arc::new(FileKvStore::open(&path).unwrap()));
        assert_eq!(reopened.load().unwrap(), Some(record));
        assert!(reopened.flag(GuardFlag::DeleteClick).unwrap());
        assert!(!reopened.claim_flag(GuardFlag::DeleteClick).unwrap());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_moves_corrupt_document_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let kv = FileKvStore::open(&path).unwrap();
        assert_eq!(kv.get(JOB_KEY).unwrap(), None);
        assert!(path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_schema_version_mismatch() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(
            JOB_KEY,
            serde_json::json!({"schema_version": 99, "status": "SCRAPING"}),
        )
        .unwrap();
        let store = JobStore::new(kv);
        assert!(matches!(store.load(), Err(ReposterError::Store(_))));
    }

    #[test]
    fn test_clear_flags() {
        let store = JobStore::in_memory();
        for flag in GuardFlag::ALL {
            assert!(store.claim_flag(flag).unwrap());
        }
        store.clear_flags().unwrap();
        for flag in GuardFlag::ALL {
            assert!(!store.flag(flag).unwrap());
        }
    }
}
