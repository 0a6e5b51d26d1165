//! Persisted session artifacts.
//!
//! Each adapter owns one [`SessionStore`] at a fixed path: credential
//! backends persist a session blob, OAuth backends a token record. Writes
//! go to a temp file in the same directory followed by a rename, so a
//! crash mid-write never leaves a torn artifact, and all access runs
//! under a per-store async lock so a refresh-in-progress cannot race a
//! concurrent read of the same file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors from session-artifact persistence.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Filesystem read/write/rename failed.
    #[error("session store I/O error at '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be serialized.
    #[error("failed to encode session artifact: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Atomic JSON artifact storage for one adapter.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl SessionStore {
    /// Create a store at `path`. Nothing is touched until the first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the artifact, if one exists.
    ///
    /// A missing file is `Ok(None)`. An unparsable file is also treated
    /// as absent (logged at warn): a corrupt blob must trigger a fresh
    /// login, not wedge the adapter.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, SessionStoreError> {
        let _guard = self.lock.lock().await;

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionStoreError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "session artifact unreadable, treating as absent"
                );
                Ok(None)
            }
        }
    }

    /// Persist the artifact atomically (write temp, then rename).
    pub async fn save<T: Serialize>(&self, artifact: &T) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SessionStoreError::Io {
                        path: parent.display().to_string(),
                        source,
                    })?;
            }
        }

        let bytes = serde_json::to_vec_pretty(artifact)?;
        let tmp_path = self.path.with_extension("tmp");

        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| SessionStoreError::Io {
                path: tmp_path.display().to_string(),
                source,
            })?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| SessionStoreError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// Remove the persisted artifact, if any.
    pub async fn clear(&self) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionStoreError::Io {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }
}
