//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`MemoryStore`] - In-memory implementation for tests and development
//! - [`FileStore`] - JSON file implementation that survives process restarts
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend from [`StoreConfig`]
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `{namespace}/{credential}`, e.g.
//! `tokenrelay/access_token` or `tokenrelay/flag/biometrics`.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokenrelay_core::store::{MemoryStore, Secret, SecretStore};
//!
//! let store = MemoryStore::new();
//!
//! store.set("tokenrelay/access_token", &Secret::new("A1")).await?;
//!
//! let retrieved = store.get("tokenrelay/access_token").await?;
//! assert_eq!(retrieved.unwrap().expose(), "A1");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{StoreBackend, StoreConfig};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// No usable location for a file-backed store.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// Abstraction over secret storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`FileStore`] - JSON file on disk
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value. A `get` issued after this returns
    /// must observe the new value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Create a secret store for the configured backend.
///
/// # Backend Selection Logic
///
/// - [`StoreBackend::Memory`]: always a [`MemoryStore`]
/// - [`StoreBackend::File`]: a [`FileStore`] at the configured path, or at
///   the platform data directory when no path is given
/// - [`StoreBackend::Keyring`]: a [`KeyringStore`] if the platform keyring
///   passes a write/read check, otherwise the [`FileStore`] the file
///   backend would use. [`MemoryStore`] is the last resort.
pub fn create_store(config: &StoreConfig) -> Result<Box<dyn SecretStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Ok(Box::new(MemoryStore::new()))
        }
        StoreBackend::File => Ok(Box::new(open_file_store(config)?)),
        StoreBackend::Keyring => Ok(keyring_or_fallback(config)),
    }
}

fn open_file_store(config: &StoreConfig) -> Result<FileStore, StoreError> {
    let path = match &config.path {
        Some(path) => path.clone(),
        None => FileStore::default_path()?,
    };
    tracing::info!("Using file credential storage at {}", path.display());
    FileStore::open(path)
}

#[cfg(feature = "keyring-store")]
fn keyring_or_fallback(config: &StoreConfig) -> Box<dyn SecretStore> {
    match KeyringStore::try_new(&config.namespace) {
        Ok(store) => {
            tracing::info!("Using OS keyring for credential storage");
            Box::new(store)
        }
        Err(e) => {
            tracing::warn!("Keyring unavailable ({}), falling back to file storage", e);
            fallback_store(config)
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn keyring_or_fallback(config: &StoreConfig) -> Box<dyn SecretStore> {
    tracing::warn!(
        "Keyring storage requested but keyring-store feature not enabled. \
         Falling back to file storage."
    );
    fallback_store(config)
}

fn fallback_store(config: &StoreConfig) -> Box<dyn SecretStore> {
    match open_file_store(config) {
        Ok(store) => Box::new(store),
        Err(e) => {
            tracing::warn!(
                "File storage unavailable ({}), using memory store. \
                 Credentials will not persist across restarts.",
                e
            );
            Box::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use crate::model::CredentialKind;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_into_inner() {
        let secret = Secret::new("A1");
        assert_eq!(secret.into_inner(), "A1");
    }

    #[tokio::test]
    async fn test_create_store_memory() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };
        let store = create_store(&config).unwrap();

        store.set("test-key", &Secret::new("test")).await.unwrap();
        let retrieved = store.get("test-key").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "test");
    }

    #[tokio::test]
    async fn test_create_store_file_at_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::File,
            path: Some(dir.path().join("credentials.json")),
            ..StoreConfig::default()
        };
        let store = create_store(&config).unwrap();

        store.set("test-key", &Secret::new("test")).await.unwrap();
        assert!(dir.path().join("credentials.json").exists());
    }

    #[tokio::test]
    async fn test_default_backend_keeps_credentials() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            path: Some(dir.path().join("credentials.json")),
            ..StoreConfig::default()
        };
        assert_eq!(config.backend, StoreBackend::File);

        let credentials = CredentialStore::new(create_store(&config).unwrap(), "tokenrelay");
        credentials
            .set(CredentialKind::Access, &Secret::new("A1"))
            .await
            .unwrap();
        assert_eq!(
            credentials.get(CredentialKind::Access).await.unwrap().expose(),
            "A1"
        );
    }

    #[tokio::test]
    async fn test_keyring_backend_keeps_credentials() {
        // Either a working keyring or the file fallback; both must read
        // back what was written.
        let dir = tempfile::TempDir::new().unwrap();
        let namespace = format!("tokenrelay-test-{}", uuid::Uuid::new_v4());
        let config = StoreConfig {
            backend: StoreBackend::Keyring,
            namespace: namespace.clone(),
            path: Some(dir.path().join("credentials.json")),
        };

        let credentials = CredentialStore::new(create_store(&config).unwrap(), namespace);
        credentials
            .set(CredentialKind::Access, &Secret::new("A1"))
            .await
            .unwrap();
        let value = credentials.get(CredentialKind::Access).await;
        credentials.clear().await.unwrap();

        assert_eq!(value.unwrap().expose(), "A1");
    }
}
