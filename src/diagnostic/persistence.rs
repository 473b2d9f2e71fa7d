//! Cross-session mastery storage.
//!
//! The engine only touches a store before the fold (load) and after a
//! successful fold (save); a failed or aborted diagnosis never writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;

use super::estimator::SkillState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MasteryStore: Send + Sync {
    /// `None` means the pair was never saved; the prior is used instead.
    async fn load(&self, student_id: &str, skill_id: &str)
        -> Result<Option<SkillState>, StoreError>;

    async fn save(
        &self,
        student_id: &str,
        skill_id: &str,
        state: &SkillState,
    ) -> Result<(), StoreError>;

    /// Persists every state of one finished diagnosis. The engine calls this
    /// once, outside the diagnosis deadline, and treats it as all-or-nothing;
    /// stores that can write a batch atomically should override the default
    /// per-skill loop.
    async fn save_all(
        &self,
        student_id: &str,
        states: &[(String, SkillState)],
    ) -> Result<(), StoreError> {
        for (skill_id, state) in states {
            self.save(student_id, skill_id, state).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMasteryStore {
    states: RwLock<HashMap<(String, String), SkillState>>,
}

impl InMemoryMasteryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, student_id: &str, skill_id: &str) -> Option<SkillState> {
        self.states
            .read()
            .get(&(student_id.to_string(), skill_id.to_string()))
            .cloned()
    }

    pub fn insert(&self, student_id: &str, skill_id: &str, state: SkillState) {
        self.states
            .write()
            .insert((student_id.to_string(), skill_id.to_string()), state);
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

#[async_trait]
impl MasteryStore for InMemoryMasteryStore {
    async fn load(
        &self,
        student_id: &str,
        skill_id: &str,
    ) -> Result<Option<SkillState>, StoreError> {
        Ok(self.get(student_id, skill_id))
    }

    async fn save(
        &self,
        student_id: &str,
        skill_id: &str,
        state: &SkillState,
    ) -> Result<(), StoreError> {
        self.insert(student_id, skill_id, state.clone());
        Ok(())
    }

    async fn save_all(
        &self,
        student_id: &str,
        states: &[(String, SkillState)],
    ) -> Result<(), StoreError> {
        let mut guard = self.states.write();
        for (skill_id, state) in states {
            guard.insert((student_id.to_string(), skill_id.clone()), state.clone());
        }
        Ok(())
    }
}

type StudentStates = HashMap<String, HashMap<String, SkillState>>;

/// Single JSON document keyed by student then skill. Loaded lazily on first
/// access and rewritten whole (write to a sibling file, then rename) on save.
#[derive(Debug)]
pub struct JsonFileMasteryStore {
    path: PathBuf,
    cache: Mutex<Option<StudentStates>>,
}

impl JsonFileMasteryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<StudentStates, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_document(&self, states: &StudentStates) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(states)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MasteryStore for JsonFileMasteryStore {
    async fn load(
        &self,
        student_id: &str,
        skill_id: &str,
    ) -> Result<Option<SkillState>, StoreError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_document().await?);
        }
        Ok(cache
            .as_ref()
            .and_then(|states| states.get(student_id))
            .and_then(|skills| skills.get(skill_id))
            .cloned())
    }

    async fn save(
        &self,
        student_id: &str,
        skill_id: &str,
        state: &SkillState,
    ) -> Result<(), StoreError> {
        self.save_all(student_id, &[(skill_id.to_string(), state.clone())])
            .await
    }

    async fn save_all(
        &self,
        student_id: &str,
        states: &[(String, SkillState)],
    ) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_document().await?);
        }
        let mut document = cache.as_ref().cloned().unwrap_or_default();
        let skills = document.entry(student_id.to_string()).or_default();
        for (skill_id, state) in states {
            skills.insert(skill_id.clone(), state.clone());
        }
        // The cache only advances once the file is on disk; the lock is held
        // across the write so concurrent saves never interleave.
        self.write_document(&document).await?;
        *cache = Some(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(p: f64) -> SkillState {
        SkillState {
            mastery_probability: p,
            observation_count: 2.0,
            last_updated: None,
        }
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryMasteryStore::new();
        assert!(store.load("s1", "algebra").await.unwrap().is_none());

        store.save("s1", "algebra", &state(0.6)).await.unwrap();
        assert_eq!(store.load("s1", "algebra").await.unwrap(), Some(state(0.6)));
        assert!(store.load("s2", "algebra").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn json_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mastery.json");

        let store = JsonFileMasteryStore::new(&path);
        assert!(store.load("s1", "algebra").await.unwrap().is_none());
        store
            .save_all(
                "s1",
                &[
                    ("algebra".to_string(), state(0.7)),
                    ("geometry".to_string(), state(0.2)),
                ],
            )
            .await
            .unwrap();

        let reopened = JsonFileMasteryStore::new(&path);
        assert_eq!(
            reopened.load("s1", "geometry").await.unwrap(),
            Some(state(0.2))
        );
        assert!(!dir.path().join("mastery.json.tmp").exists());
    }

    #[tokio::test]
    async fn in_memory_save_all_writes_every_skill() {
        let store = InMemoryMasteryStore::new();
        store
            .save_all(
                "s1",
                &[
                    ("algebra".to_string(), state(0.6)),
                    ("geometry".to_string(), state(0.3)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("s1", "geometry"), Some(state(0.3)));
    }

    #[tokio::test]
    async fn json_file_failed_write_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("mastery.json");

        let store = JsonFileMasteryStore::new(&path);
        let err = store.save("s1", "algebra", &state(0.9)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.load("s1", "algebra").await.unwrap().is_none());

        std::fs::create_dir(dir.path().join("missing")).unwrap();
        store.save("s1", "algebra", &state(0.4)).await.unwrap();
        assert_eq!(store.load("s1", "algebra").await.unwrap(), Some(state(0.4)));
    }

    #[tokio::test]
    async fn json_file_reports_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mastery.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = JsonFileMasteryStore::new(&path);
        let err = store.load("s1", "algebra").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
