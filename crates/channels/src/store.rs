//! JSON file-backed relay state with atomic writes.
//!
//! One document holds the delivery record, the thread bindings and the
//! discovered subscriptions. Every mutation rewrites the file while the
//! store lock is held, so concurrent writers never interleave.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tokio::{fs, sync::Mutex},
    tracing::{debug, warn},
};

use crate::{destination::ThreadId, error::StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Delivery record: source timestamp key → destination message id.
    pub messages: BTreeMap<String, i64>,
    /// Thread bindings: community name → thread id.
    pub topics: BTreeMap<String, ThreadId>,
    /// Subscriptions: community name → channels.
    pub communities: BTreeMap<String, PersistedCommunity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedCommunity {
    pub id: Option<String>,
    pub channels: Vec<PersistedChannel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChannel {
    pub id: String,
    pub name: String,
}

pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Load the state file at `path`, starting empty if it does not exist.
    ///
    /// A corrupt file falls back to the `.bak` copy left by the previous write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match read_state(&path).await {
            Ok(state) => state.unwrap_or_default(),
            Err(err @ StoreError::Corrupt { .. }) => {
                let bak = backup_path(&path);
                warn!(path = %path.display(), error = %err, "state file unreadable, trying backup");
                match read_state(&bak).await? {
                    Some(state) => state,
                    None => return Err(err),
                }
            },
            Err(err) => return Err(err),
        };

        debug!(
            path = %path.display(),
            messages = state.messages.len(),
            topics = state.topics.len(),
            communities = state.communities.len(),
            "state loaded"
        );
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// A store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(PersistedState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    /// Apply `mutate` and rewrite the file.
    ///
    /// The in-memory change is kept even when the write fails.
    pub async fn update<R>(
        &self,
        mutate: impl FnOnce(&mut PersistedState) -> R,
    ) -> Result<R, StoreError> {
        let mut state = self.state.lock().await;
        let out = mutate(&mut state);
        if let Some(path) = &self.path {
            atomic_write(path, &state).await?;
        }
        Ok(out)
    }

    /// Whether a message with this timestamp key has been delivered.
    pub async fn was_delivered(&self, key: &str) -> bool {
        self.state.lock().await.messages.contains_key(key)
    }
}

async fn read_state(path: &Path) -> Result<Option<PersistedState>, StoreError> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn backup_path(path: &Path) -> PathBuf {
    path.with_extension("json.bak")
}

/// Write to a temp file, keep the previous file as `.bak`, rename over target.
async fn atomic_write(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await.map_err(io_err)?;

    if fs::try_exists(path).await.unwrap_or(false) {
        let _ = fs::rename(path, backup_path(path)).await;
    }

    fs::rename(&tmp, path).await.map_err(io_err)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(tmp.path().join("state.json")).await.unwrap();
        assert_eq!(store.snapshot().await, PersistedState::default());
    }

    #[tokio::test]
    async fn update_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        let store = StateStore::open(&path).await.unwrap();
        store
            .update(|s| {
                s.topics.insert("Acme".into(), ThreadId(42));
                s.messages.insert("2024-01-01T00:00:00+00:00".into(), 7);
            })
            .await
            .unwrap();
        assert!(store.was_delivered("2024-01-01T00:00:00+00:00").await);

        let reopened = StateStore::open(&path).await.unwrap();
        let state = reopened.snapshot().await;
        assert_eq!(state.topics["Acme"], ThreadId(42));
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn second_write_keeps_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let store = StateStore::open(&path).await.unwrap();

        store.update(|s| s.messages.insert("a".into(), 1)).await.unwrap();
        store.update(|s| s.messages.insert("b".into(), 2)).await.unwrap();

        assert!(path.with_extension("json.bak").exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        std::fs::write(
            path.with_extension("json.bak"),
            r#"{"topics": {"Acme": 5}}"#,
        )
        .unwrap();

        let store = StateStore::open(&path).await.unwrap();
        assert_eq!(store.snapshot().await.topics["Acme"], ThreadId(5));
    }

    #[tokio::test]
    async fn corrupt_file_without_backup_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = StateStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn legacy_document_without_communities_parses() {
        let state: PersistedState =
            serde_json::from_str(r#"{"messages": {"t": 1}, "topics": {"Monad": 12}}"#).unwrap();
        assert_eq!(state.topics["Monad"], ThreadId(12));
        assert!(state.communities.is_empty());
    }

    #[tokio::test]
    async fn in_memory_store_has_no_path() {
        let store = StateStore::in_memory();
        store.update(|s| s.messages.insert("k".into(), 1)).await.unwrap();
        assert!(store.path().is_none());
        assert!(store.was_delivered("k").await);
    }
}
