//! Local file backend - state in a JSON file with atomic writes
//!
//! The whole document is rewritten on every commit: serialize, write to a
//! temporary file next to the target, then rename over it. The rename is
//! atomic on the filesystems we care about, so a reader never observes a
//! torn entry. An in-process mutex serializes commits from concurrent
//! engine workers; a `.lock` file guards against other processes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use vela_core::state::{StateEntry, StateError, StateResult, StateStore};

use crate::document::StateDocument;
use crate::lock::LockInfo;

#[derive(Debug)]
pub struct LocalStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    document: Mutex<StateDocument>,
}

impl LocalStore {
    pub const DEFAULT_STATE_FILE: &'static str = "vela.state.json";

    /// Open (or initialize) the state file at `path` for `environment`.
    ///
    /// Refuses to operate on a file that belongs to a different
    /// environment, so two manifests cannot corrupt each other's state.
    pub fn open(path: impl Into<PathBuf>, environment: &str) -> StateResult<Self> {
        let state_path = path.into();
        let document = match Self::read_document(&state_path)? {
            Some(doc) => {
                if doc.environment != environment {
                    return Err(StateError::Invalid(format!(
                        "state file {} belongs to environment {:?}, not {:?}",
                        state_path.display(),
                        doc.environment,
                        environment
                    )));
                }
                doc
            }
            None => StateDocument::new(environment),
        };

        let lock_path = state_path.with_extension("lock");
        Ok(Self {
            state_path,
            lock_path,
            document: Mutex::new(document),
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn read_document(path: &Path) -> StateResult<Option<StateDocument>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StateError::Io(format!("failed to read {}: {e}", path.display())))?;
        let document = serde_json::from_str(&content)
            .map_err(|e| StateError::Invalid(format!("failed to parse {}: {e}", path.display())))?;
        Ok(Some(document))
    }

    /// Write-to-temp then rename, so a crash mid-write leaves the previous
    /// document intact.
    fn persist(&self, document: &StateDocument) -> StateResult<()> {
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        let tmp_path = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| StateError::Io(format!("failed to write {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &self.state_path).map_err(|e| {
            StateError::Io(format!(
                "failed to replace {}: {e}",
                self.state_path.display()
            ))
        })?;
        Ok(())
    }

    /// Acquire the advisory lock for `operation`, taking over expired locks.
    pub fn acquire_lock(&self, operation: &str) -> StateResult<LockInfo> {
        if self.lock_path.exists() {
            let content = std::fs::read_to_string(&self.lock_path)
                .map_err(|e| StateError::Io(format!("failed to read lock file: {e}")))?;
            if let Ok(existing) = serde_json::from_str::<LockInfo>(&content) {
                if !existing.is_expired() {
                    return Err(StateError::Locked {
                        who: existing.who,
                        operation: existing.operation,
                    });
                }
                log::warn!("taking over expired lock held by {}", existing.who);
            }
        }

        let lock = LockInfo::new(operation);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        std::fs::write(&self.lock_path, content)
            .map_err(|e| StateError::Io(format!("failed to write lock file: {e}")))?;
        Ok(lock)
    }

    /// Release a lock previously acquired by this process.
    pub fn release_lock(&self, lock: &LockInfo) -> StateResult<()> {
        if !self.lock_path.exists() {
            return Err(StateError::LockNotFound(lock.id.clone()));
        }
        let content = std::fs::read_to_string(&self.lock_path)
            .map_err(|e| StateError::Io(format!("failed to read lock file: {e}")))?;
        let existing: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::Invalid(format!("corrupt lock file: {e}")))?;
        if existing.id != lock.id {
            return Err(StateError::Locked {
                who: existing.who,
                operation: existing.operation,
            });
        }
        std::fs::remove_file(&self.lock_path)
            .map_err(|e| StateError::Io(format!("failed to remove lock file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStore {
    async fn get(&self, logical_name: &str) -> StateResult<Option<StateEntry>> {
        Ok(self.document.lock().await.get(logical_name).cloned())
    }

    async fn put(&self, entry: StateEntry) -> StateResult<()> {
        let mut document = self.document.lock().await;
        document.upsert(entry);
        self.persist(&document)
    }

    async fn remove(&self, logical_name: &str) -> StateResult<Option<StateEntry>> {
        let mut document = self.document.lock().await;
        let removed = document.remove(logical_name);
        if removed.is_some() {
            self.persist(&document)?;
        }
        Ok(removed)
    }

    async fn all(&self) -> StateResult<Vec<StateEntry>> {
        Ok(self.document.lock().await.entries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vela_core::descriptor::ResourceKind;
    use vela_core::state::ResourceStatus;

    fn entry(name: &str) -> StateEntry {
        StateEntry {
            logical_name: name.to_string(),
            kind: ResourceKind::Subnet,
            physical_id: Some(format!("subnet-{name}")),
            config_hash: "hash".to_string(),
            status: ResourceStatus::Created,
        }
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vela.state.json");

        let store = LocalStore::open(&path, "lab").unwrap();
        store.put(entry("a")).await.unwrap();
        store.put(entry("b")).await.unwrap();
        drop(store);

        let store = LocalStore::open(&path, "lab").unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(entry("a")));
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejects_foreign_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vela.state.json");

        let store = LocalStore::open(&path, "lab").unwrap();
        store.put(entry("a")).await.unwrap();
        drop(store);

        let err = LocalStore::open(&path, "production").unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
    }

    #[tokio::test]
    async fn serial_advances_across_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vela.state.json");

        let store = LocalStore::open(&path, "lab").unwrap();
        store.put(entry("a")).await.unwrap();
        store.put(entry("b")).await.unwrap();
        store.remove("a").await.unwrap();
        drop(store);

        let doc = LocalStore::read_document(&path).unwrap().unwrap();
        assert_eq!(doc.serial, 3);
        assert_eq!(doc.entries.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_commits_do_not_tear_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vela.state.json");
        let store = Arc::new(LocalStore::open(&path, "lab").unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store.put(entry(&format!("subnet-{i}"))).await.unwrap();
            });
        }
        while tasks.join_next().await.is_some() {}

        let doc = LocalStore::read_document(&path).unwrap().unwrap();
        assert_eq!(doc.entries.len(), 16);
        assert_eq!(doc.serial, 16);
    }

    #[tokio::test]
    async fn lock_conflict_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vela.state.json");
        let store = LocalStore::open(&path, "lab").unwrap();

        let lock = store.acquire_lock("apply").unwrap();
        let err = store.acquire_lock("destroy").unwrap_err();
        assert!(matches!(err, StateError::Locked { .. }));

        store.release_lock(&lock).unwrap();
        let lock = store.acquire_lock("destroy").unwrap();
        store.release_lock(&lock).unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vela.state.json");
        let store = LocalStore::open(&path, "lab").unwrap();

        let stale = LockInfo::with_timeout("apply", -1);
        std::fs::write(
            path.with_extension("lock"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = store.acquire_lock("apply").unwrap();
        assert_ne!(lock.id, stale.id);
    }
}
