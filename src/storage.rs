//! # Storage Module
//!
//! Dialogue storage backends. Every backend is erased to
//! `ErasedStorage<FormState>` so the dispatcher does not care which one
//! is configured.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use teloxide::dispatching::dialogue::serializer::Json;
use teloxide::dispatching::dialogue::{
    ErasedStorage, InMemStorage, PostgresStorage, RedisStorage, Storage,
};
use teloxide::types::ChatId;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::StorageType;
use crate::dialogue::FormState;

const POSTGRES_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned from [`Storage::remove_dialogue`] for an unknown chat
    #[error("row not found")]
    DialogueNotFound,
}

/// All dialogues in one JSON file keyed by chat id.
///
/// Each update rewrites the whole file through a temporary file in the same
/// directory, so a crash never leaves a half-written state file behind.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all<D: DeserializeOwned>(&self) -> Result<HashMap<i64, D>, FileStorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all<D: Serialize>(
        &self,
        states: &HashMap<i64, D>,
    ) -> Result<(), FileStorageError> {
        let bytes = serde_json::to_vec_pretty(states)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| FileStorageError::Io(std::io::Error::other(e)))?
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), FileStorageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl<D> Storage<D> for FileStorage
where
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Error = FileStorageError;

    fn remove_dialogue(
        self: Arc<Self>,
        chat_id: ChatId,
    ) -> BoxFuture<'static, Result<(), Self::Error>>
    where
        D: Send + 'static,
    {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut states: HashMap<i64, D> = self.read_all().await?;
            if states.remove(&chat_id.0).is_none() {
                return Err(FileStorageError::DialogueNotFound);
            }
            self.write_all(&states).await
        })
    }

    fn update_dialogue(
        self: Arc<Self>,
        chat_id: ChatId,
        dialogue: D,
    ) -> BoxFuture<'static, Result<(), Self::Error>>
    where
        D: Send + 'static,
    {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut states: HashMap<i64, D> = self.read_all().await?;
            states.insert(chat_id.0, dialogue);
            self.write_all(&states).await
        })
    }

    fn get_dialogue(
        self: Arc<Self>,
        chat_id: ChatId,
    ) -> BoxFuture<'static, Result<Option<D>, Self::Error>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut states: HashMap<i64, D> = self.read_all().await?;
            Ok(states.remove(&chat_id.0))
        })
    }
}

/// Open the configured dialogue storage
pub async fn open_storage(storage: &StorageType) -> Result<Arc<ErasedStorage<FormState>>> {
    let erased: Arc<ErasedStorage<FormState>> = match storage {
        StorageType::Memory => {
            info!(storage = "memory", "Dialogue storage opened");
            InMemStorage::<FormState>::new().erase()
        }
        StorageType::Json { path } => {
            info!(storage = "json", path = %path, "Dialogue storage opened");
            Storage::<FormState>::erase(FileStorage::open(path))
        }
        StorageType::Postgres { url } => {
            debug!("Connecting to postgres dialogue storage");
            let storage = PostgresStorage::open(url, POSTGRES_MAX_CONNECTIONS, Json)
                .await
                .context("Failed to open postgres dialogue storage")?;
            info!(storage = "postgres", "Dialogue storage opened");
            storage.erase()
        }
        StorageType::Redis { url } => {
            debug!("Connecting to redis dialogue storage");
            let storage = RedisStorage::open(url.as_str(), Json)
                .await
                .context("Failed to open redis dialogue storage")?;
            info!(storage = "redis", "Dialogue storage opened");
            storage.erase()
        }
    };
    Ok(erased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::{FormData, FormStep};

    #[tokio::test]
    async fn missing_file_means_no_dialogues() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("states.json"));
        let state: Option<FormState> = storage.get_dialogue(ChatId(1)).await.unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn remove_unknown_dialogue_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("states.json"));
        let result = Storage::<FormState>::remove_dialogue(storage, ChatId(1)).await;
        assert!(matches!(result, Err(FileStorageError::DialogueNotFound)));
    }

    #[tokio::test]
    async fn file_is_keyed_by_chat_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states.json");
        let storage = FileStorage::open(&path);
        let state = FormState::at(
            FormStep::Weight,
            FormData {
                height: Some(175),
                ..Default::default()
            },
        );
        Arc::clone(&storage).update_dialogue(ChatId(-100), state).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["-100"]["step"], "Weight");
        assert_eq!(raw["-100"]["data"]["height"], 175);
    }
}
