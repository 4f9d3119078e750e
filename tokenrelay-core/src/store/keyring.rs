//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

const CHECK_KEY: &str = "__tokenrelay_check__";
const CHECK_VALUE: &str = "ok";

/// OS keyring-backed secret store.
///
/// This store uses the platform's native keyring service:
/// - macOS / iOS: Keychain
/// - Linux: kernel keyutils
/// - Windows: Credential Manager
///
/// Each key becomes one keyring entry whose service is the store's
/// service name and whose user is the key.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Writes, reads back and deletes a check entry. Returns
    /// [`StoreError::KeyringUnavailable`] unless the value comes back intact,
    /// so a keyring that silently drops writes is never used.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let unavailable = |message: String| StoreError::KeyringUnavailable { message };

        let check = Entry::new(service_name, CHECK_KEY)
            .map_err(|e| unavailable(format!("cannot open entry: {}", e)))?;
        check
            .set_password(CHECK_VALUE)
            .map_err(|e| unavailable(format!("write failed: {}", e)))?;
        let read_back = check.get_password();
        if let Err(e) = check.delete_credential() {
            tracing::debug!(error = %e, "Failed to remove keyring check entry");
        }

        match read_back {
            Ok(value) if value == CHECK_VALUE => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Ok(_) => Err(unavailable("read back a different value".to_string())),
            Err(e) => Err(unavailable(format!("written value not readable: {}", e))),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::BackendError {
                message: format!("ambiguous keyring entry for key: {}", key),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}
