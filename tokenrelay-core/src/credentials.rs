//! Durable storage for the session credentials.
//!
//! [`CredentialStore`] sits between the request pipeline and a
//! [`SecretStore`] backend. It owns exactly two credentials (access and
//! refresh) plus small boolean preference flags that callers may use
//! freely; the pipeline never reads the flags.
//!
//! Reads never fail: a backend error is logged and reported as absent.
//! Writes report their error so the caller can pick a policy, but are
//! logged here either way.
//!
//! Single-key reads and writes take a shared gate; `set_pair` and `clear`
//! take it exclusively, so no reader ever sees half of a pair written or
//! one credential cleared while the other is still present.

use tokio::sync::RwLock;

use crate::model::{CredentialKind, Session, TokenPair};
use crate::store::{Secret, SecretStore, StoreError};

pub struct CredentialStore {
    backend: Box<dyn SecretStore>,
    namespace: String,
    gate: RwLock<()>,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn SecretStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            gate: RwLock::new(()),
        }
    }

    fn key(&self, kind: CredentialKind) -> String {
        format!("{}/{}", self.namespace, kind.as_str())
    }

    fn flag_key(&self, name: &str) -> String {
        format!("{}/flag/{}", self.namespace, name)
    }

    /// Current value of `kind`, or `None` when absent or unreadable.
    pub async fn get(&self, kind: CredentialKind) -> Option<Secret> {
        let _shared = self.gate.read().await;
        self.read(kind).await
    }

    async fn read(&self, kind: CredentialKind) -> Option<Secret> {
        match self.backend.get(&self.key(kind)).await {
            Ok(value) => value.filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Credential read failed, treating as absent");
                None
            }
        }
    }

    /// Overwrite `kind`.
    pub async fn set(&self, kind: CredentialKind, value: &Secret) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        self.write(kind, value).await
    }

    async fn write(&self, kind: CredentialKind, value: &Secret) -> Result<(), StoreError> {
        self.backend
            .set(&self.key(kind), value)
            .await
            .inspect_err(|e| {
                tracing::error!(kind = %kind, error = %e, "Failed to persist credential");
            })
    }

    /// Store the access token and, if present, the rotated refresh token.
    ///
    /// A missing refresh token leaves the stored one untouched.
    pub async fn set_pair(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        self.write(CredentialKind::Access, &pair.access_token).await?;
        if let Some(refresh) = &pair.refresh_token {
            self.write(CredentialKind::Refresh, refresh).await?;
        }
        Ok(())
    }

    /// Remove both credentials. Flags are kept.
    ///
    /// Both deletes are attempted even if the first fails; the first error
    /// is returned.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let mut first_error = None;

        for kind in CredentialKind::ALL {
            if let Err(e) = self.backend.delete(&self.key(kind)).await {
                tracing::error!(kind = %kind, error = %e, "Failed to clear credential");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        tracing::debug!("Cleared stored credentials");
        first_error.map_or(Ok(()), Err)
    }

    /// Both credentials, read together.
    pub async fn session(&self) -> Session {
        let _shared = self.gate.read().await;
        Session {
            access_token: self.read(CredentialKind::Access).await,
            refresh_token: self.read(CredentialKind::Refresh).await,
        }
    }

    /// Read a preference flag. Absent or unreadable flags are `false`.
    pub async fn flag(&self, name: &str) -> bool {
        match self.backend.get(&self.flag_key(name)).await {
            Ok(Some(value)) => value.expose() == "true",
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(flag = name, error = %e, "Flag read failed, treating as unset");
                false
            }
        }
    }

    pub async fn set_flag(&self, name: &str, enabled: bool) -> Result<(), StoreError> {
        let value = Secret::new(if enabled { "true" } else { "false" });
        self.backend
            .set(&self.flag_key(name), &value)
            .await
            .inspect_err(|e| tracing::error!(flag = name, error = %e, "Failed to persist flag"))
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
