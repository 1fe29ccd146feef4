//! Where the client keeps its token pair between requests.

use crate::token::TokenPair;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
};
use thiserror::Error;

/// The single key the pair is stored under.
pub const TOKEN_KEY: &str = "authToken";

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached yet (for example before the host is ready).
    #[error("token storage is not available")]
    Unavailable,
    #[error("token storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn load(&self) -> Result<Option<TokenPair>, StorageError>;

    async fn store(&self, pair: &TokenPair) -> Result<(), StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;
}

/// In-process storage that can be toggled unavailable.
#[derive(Debug)]
pub struct MemoryTokenStorage {
    slot: Mutex<Option<TokenPair>>,
    available: AtomicBool,
}

impl Default for MemoryTokenStorage {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that reports [`StorageError::Unavailable`] until enabled.
    #[must_use]
    pub fn unavailable() -> Self {
        let storage = Self::default();
        storage.set_available(false);
        storage
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self) -> Result<Option<TokenPair>, StorageError> {
        self.check()?;
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn store(&self, pair: &TokenPair) -> Result<(), StorageError> {
        self.check()?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.check()?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredTokens {
    #[serde(rename = "authToken")]
    auth_token: TokenPair,
}

/// JSON file holding `{"authToken": {"accessToken": .., "refreshToken": ..}}`.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn backend(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self) -> Result<Option<TokenPair>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(backend(err)),
        };
        let stored: StoredTokens = serde_json::from_slice(&bytes).map_err(backend)?;
        Ok(Some(stored.auth_token))
    }

    async fn store(&self, pair: &TokenPair) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(backend)?;
            }
        }
        let json = serde_json::to_vec_pretty(&StoredTokens {
            auth_token: pair.clone(),
        })
        .map_err(backend)?;
        // atomic replace
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(backend)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(backend)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(backend(err)),
        }
    }
}
