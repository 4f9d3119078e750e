//! Domain model types.
//!
//! - [`CredentialKind`] - Which of the two session credentials a value is
//! - [`TokenPair`] - Credentials extracted from a login/refresh response
//! - [`Session`] - Snapshot of the stored credentials
//! - [`SessionStatus`] - Session state broadcast to the surrounding app

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::store::Secret;

/// Kind of credential held by the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Short-lived bearer token attached to API calls.
    Access,

    /// Longer-lived token used only to mint a new access token.
    Refresh,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::Access, CredentialKind::Refresh];

    /// Storage key suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access_token",
            Self::Refresh => "refresh_token",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access token plus, optionally, a rotated refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Extract tokens from a JSON response body.
    ///
    /// Looks for `accessToken` / `refreshToken` (or their snake_case forms)
    /// at the top level, then inside a `data` envelope. Returns `None` when
    /// no non-empty access token is present.
    pub fn from_json(body: &Value) -> Option<Self> {
        Self::from_object(body).or_else(|| body.get("data").and_then(Self::from_object))
    }

    fn from_object(value: &Value) -> Option<Self> {
        let access = string_field(value, &["accessToken", "access_token"])?;
        let refresh = string_field(value, &["refreshToken", "refresh_token"]);

        Some(Self {
            access_token: Secret::new(access),
            refresh_token: refresh.map(Secret::new),
        })
    }
}

fn string_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| value.get(*name).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// The stored access/refresh pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<Secret>,
    pub refresh_token: Option<Secret>,
}

impl Session {
    /// A session is live while it holds an access credential.
    pub fn is_live(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether an expired access credential could still be renewed.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Session state as observed by the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing has been read from the store yet.
    #[default]
    Unknown,

    /// Credentials are stored and usable.
    Active,

    /// The caller logged out, or no credentials were found at startup.
    SignedOut,

    /// Refresh failed; the app must force re-authentication.
    Terminated,
}
