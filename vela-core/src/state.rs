//! State store - durable mapping from logical name to physical identifier
//!
//! One entry per logical name per environment. The apply engine commits an
//! entry only after the corresponding provider call has returned, never
//! speculatively, and decides create/skip/update by comparing the stored
//! config digest against the descriptor's current one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{ResourceDescriptor, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Identifier recorded, readiness not yet confirmed.
    Pending,
    Created,
    Failed,
    Deleted,
}

/// Last known state of one managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub logical_name: String,
    pub kind: ResourceKind,
    /// Provider-assigned identifier. Absent when the create call failed
    /// before the provider returned one; present on a provisioning timeout
    /// so a retry reconciles instead of duplicating.
    pub physical_id: Option<String>,
    /// Digest of the last applied configuration, used for drift detection.
    pub config_hash: String,
    pub status: ResourceStatus,
}

impl StateEntry {
    /// Entry for a freshly issued create: identifier committed, readiness
    /// still outstanding.
    pub fn pending(descriptor: &ResourceDescriptor, physical_id: impl Into<String>) -> Self {
        Self {
            logical_name: descriptor.logical_name.clone(),
            kind: descriptor.kind,
            physical_id: Some(physical_id.into()),
            config_hash: descriptor.config_hash(),
            status: ResourceStatus::Pending,
        }
    }

    /// Entry for a create that failed before an identifier was returned.
    pub fn failed(descriptor: &ResourceDescriptor) -> Self {
        Self {
            logical_name: descriptor.logical_name.clone(),
            kind: descriptor.kind,
            physical_id: None,
            config_hash: descriptor.config_hash(),
            status: ResourceStatus::Failed,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(String),

    #[error("state serialization error: {0}")]
    Serialization(String),

    #[error("state is locked by {who} (operation: {operation})")]
    Locked { who: String, operation: String },

    #[error("lock not found: {0}")]
    LockNotFound(String),

    #[error("invalid state document: {0}")]
    Invalid(String),
}

pub type StateResult<T> = Result<T, StateError>;

/// Durable mapping from logical resource name to provider identifier and
/// last-applied configuration digest.
///
/// `put` must be atomic per entry: a crashed or concurrent write may lose
/// an update but must never expose a torn or partially-updated entry.
/// Reads may happen concurrently with writes from other workers.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, logical_name: &str) -> StateResult<Option<StateEntry>>;

    async fn put(&self, entry: StateEntry) -> StateResult<()>;

    async fn remove(&self, logical_name: &str) -> StateResult<Option<StateEntry>>;

    async fn all(&self) -> StateResult<Vec<StateEntry>>;
}

/// In-memory store for tests, dry runs, and ephemeral environments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StateEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StateResult<std::sync::MutexGuard<'_, HashMap<String, StateEntry>>> {
        self.entries
            .lock()
            .map_err(|_| StateError::Io("state mutex poisoned".to_string()))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, logical_name: &str) -> StateResult<Option<StateEntry>> {
        Ok(self.lock()?.get(logical_name).cloned())
    }

    async fn put(&self, entry: StateEntry) -> StateResult<()> {
        self.lock()?.insert(entry.logical_name.clone(), entry);
        Ok(())
    }

    async fn remove(&self, logical_name: &str) -> StateResult<Option<StateEntry>> {
        Ok(self.lock()?.remove(logical_name))
    }

    async fn all(&self) -> StateResult<Vec<StateEntry>> {
        let mut entries: Vec<StateEntry> = self.lock()?.values().cloned().collect();
        entries.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        Ok(entries)
    }
}
