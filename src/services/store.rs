use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::models::diagnosis::{Diagnosis, DiagnosisRecord, FeedbackState};

/// Durable, file-backed collection of diagnosis records.
///
/// The whole collection is rewritten on every mutation. Record volume is
/// capped and mutation frequency is low, so a crash between read and
/// rewrite losing the latest mutation is an accepted degradation;
/// feedback is advisory, not transactional.
pub struct RecordStore {
    path: PathBuf,
    cap: usize,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    records: Vec<DiagnosisRecord>,
    last_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RecordStore {
    /// Load the collection from `path`, or start empty if the file does
    /// not exist. A corrupt file is logged and replaced on the next
    /// mutation rather than aborting startup.
    pub fn open(path: impl Into<PathBuf>, cap: usize) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let records: Vec<DiagnosisRecord> = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "record file corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let last_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Ok(Self {
            path,
            cap,
            inner: Mutex::new(StoreInner { records, last_id }),
        })
    }

    /// Create a pending record for a completed diagnosis, evicting the
    /// oldest records beyond the capacity limit. Returns the new record.
    pub fn create(
        &self,
        image_path: impl Into<String>,
        diagnosis: Diagnosis,
    ) -> Result<DiagnosisRecord, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");

        // Unique and monotonically increasing even when two jobs finish
        // within the same millisecond.
        let id = Utc::now().timestamp_millis().max(inner.last_id + 1);
        inner.last_id = id;

        let record = DiagnosisRecord {
            id,
            image_path: image_path.into(),
            diagnosis,
            feedback: FeedbackState::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };

        inner.records.push(record.clone());
        let excess = inner.records.len().saturating_sub(self.cap);
        if excess > 0 {
            // Eviction is silent; image blobs of evicted records are an
            // external housekeeping concern.
            inner.records.drain(..excess);
        }

        Self::persist(&self.path, &inner.records)?;
        Ok(record)
    }

    pub fn get(&self, id: i64) -> Option<DiagnosisRecord> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.records.iter().find(|r| r.id == id).cloned()
    }

    /// Apply a mutation to the record with `id` and rewrite the file.
    /// Returns `None` (and writes nothing) when the id is unknown.
    pub fn update<T>(
        &self,
        id: i64,
        f: impl FnOnce(&mut DiagnosisRecord) -> T,
    ) -> Result<Option<T>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let Some(record) = inner.records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        let out = f(record);
        Self::persist(&self.path, &inner.records)?;
        Ok(Some(out))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(path: &Path, records: &[DiagnosisRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::diagnosis::Severity;
    use tempfile::TempDir;

    fn diagnosis(name: &str) -> Diagnosis {
        Diagnosis {
            bee_detected: true,
            condition_name: name.into(),
            severity: Severity::Moderate,
            description: "test".into(),
            recommended_treatment: vec!["treat".into()],
            preventative_measures: vec!["prevent".into()],
        }
    }

    fn open_store(dir: &TempDir, cap: usize) -> RecordStore {
        RecordStore::open(dir.path().join("records.json"), cap).unwrap()
    }

    #[test]
    fn create_then_get_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 10);

        let record = store.create("img/1.jpg", diagnosis("Varroa")).unwrap();
        let fetched = store.get(record.id).unwrap();

        assert_eq!(fetched.diagnosis.condition_name, "Varroa");
        assert_eq!(fetched.feedback, FeedbackState::Pending);
        assert!(fetched.resolved_at.is_none());
    }

    #[test]
    fn ids_are_unique_and_monotonic_within_one_tick() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 200);

        let mut last = 0;
        for i in 0..50 {
            let record = store.create("p", diagnosis(&format!("c{i}"))).unwrap();
            assert!(record.id > last, "id {} not above {}", record.id, last);
            last = record.id;
        }
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100);

        let mut ids = Vec::new();
        for i in 0..101 {
            ids.push(store.create("p", diagnosis(&format!("c{i}"))).unwrap().id);
        }

        assert_eq!(store.len(), 100);
        assert!(store.get(ids[0]).is_none(), "lowest id must be evicted");
        for id in &ids[1..] {
            assert!(store.get(*id).is_some());
        }
    }

    #[test]
    fn update_unknown_id_is_not_found_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 10);
        store.create("p", diagnosis("c")).unwrap();

        let before = fs::read(dir.path().join("records.json")).unwrap();
        let out = store.update(999, |r| r.feedback = FeedbackState::Confirmed).unwrap();
        let after = fs::read(dir.path().join("records.json")).unwrap();

        assert!(out.is_none());
        assert_eq!(before, after);
    }

    #[test]
    fn collection_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_store(&dir, 10);
            store.create("img/7.jpg", diagnosis("AFB")).unwrap().id
        };

        let reopened = open_store(&dir, 10);
        let record = reopened.get(id).unwrap();
        assert_eq!(record.image_path, "img/7.jpg");

        // New ids keep climbing past what was on disk.
        let next = reopened.create("p", diagnosis("next")).unwrap();
        assert!(next.id > id);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(&path, b"not json {").unwrap();

        let store = RecordStore::open(&path, 10).unwrap();
        assert!(store.is_empty());
    }
}
