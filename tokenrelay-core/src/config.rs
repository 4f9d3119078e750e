//! Client configuration.
//!
//! Everything the pipeline treats as external policy lives here: the API
//! origin, the request timeout, which status code means "credential
//! rejected", endpoint paths and the storage backend.
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file (or no file at all) yields a usable [`ClientConfig`].
//!
//! ```toml
//! base_url = "https://api.example.com/v1"
//! timeout_secs = 15
//! persistence = "strict"
//!
//! [endpoints]
//! refresh = "/auth/refresh"
//!
//! [store]
//! backend = "file"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const CONFIG_FILE: &str = "config.toml";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`ClientConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// `base_url` is not an absolute http(s) URL.
    #[error("invalid base_url {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// `auth_failure_status` is not a valid HTTP status code.
    #[error("invalid auth_failure_status {0}")]
    InvalidStatus(u16),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// What to do when a credential write fails after a successful login or
/// refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Log the failure and carry on with the in-memory session.
    #[default]
    BestEffort,

    /// Fail the login or refresh with [`ApiError::Storage`](crate::ApiError::Storage).
    Strict,
}

/// Storage backend for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    /// Platform keyring; falls back to the file backend when the keyring
    /// cannot keep a value.
    Keyring,
}

/// Credential storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Prefix for every storage key, and the keyring service name.
    pub namespace: String,

    /// File location for [`StoreBackend::File`].
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            namespace: "tokenrelay".to_string(),
            path: None,
        }
    }
}

/// Paths of the session endpoints, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub login: String,
    pub register: String,
    pub verify_otp: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            register: "/auth/register".to_string(),
            verify_otp: "/auth/verify-otp".to_string(),
            refresh: "/auth/refresh-token".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin (optionally with a path prefix) every request path is joined to.
    pub base_url: String,

    /// Per-call timeout. A timeout is a network failure, never an auth failure.
    pub timeout_secs: u64,

    /// Status code meaning the access credential was rejected.
    pub auth_failure_status: u16,

    pub persistence: PersistencePolicy,

    pub endpoints: EndpointConfig,

    pub store: StoreConfig,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            auth_failure_status: 401,
            persistence: PersistencePolicy::default(),
            endpoints: EndpointConfig::default(),
            store: StoreConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_persistence(mut self, persistence: PersistencePolicy) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse and check `base_url`.
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            message: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                message: format!("unsupported scheme {}", other),
            }),
        }
    }

    /// `auth_failure_status` as a [`reqwest::StatusCode`].
    pub fn auth_failure_status(&self) -> Result<reqwest::StatusCode, ConfigError> {
        reqwest::StatusCode::from_u16(self.auth_failure_status)
            .map_err(|_| ConfigError::InvalidStatus(self.auth_failure_status))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load from the platform config directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&default_config_path())
    }
}

/// Platform location of `config.toml`.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("com", "raibid-labs", "tokenrelay")
        .map(|d| d.config_dir().join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from("tokenrelay.toml"))
}
