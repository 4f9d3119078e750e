//! # TokenRelay Core
//!
//! Session credentials and authenticated HTTP calls for an API-backed
//! client application.
//!
//! This crate provides:
//! - A credential store for the access/refresh token pair, over pluggable
//!   secret storage backends (memory, JSON file, OS keyring)
//! - An authenticated request pipeline that attaches the access token,
//!   detects its rejection, renews it through a single shared refresh call
//!   and replays the rejected request exactly once
//! - Session lifecycle calls: login, registration, OTP verification, logout
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tokenrelay_core::{AuthClient, ClientConfig};
//!
//! let client = AuthClient::from_config(ClientConfig::load()?)?;
//! client.restore().await;
//!
//! match client.get("/wallet/balance").await {
//!     Ok(response) => println!("{}", response.text()),
//!     Err(e) if e.is_session_terminated() => println!("please log in again"),
//!     Err(e) => println!("request failed: {e}"),
//! }
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod model;
pub mod refresh;
pub mod request;
pub mod store;

// Re-export commonly used types at crate root
pub use client::AuthClient;

pub use config::{
    ClientConfig,
    ConfigError,
    EndpointConfig,
    PersistencePolicy,
    StoreBackend,
    StoreConfig,
};

pub use credentials::CredentialStore;

pub use error::{ApiError, TokenRelayError};

pub use model::{CredentialKind, Session, SessionStatus, TokenPair};

pub use refresh::RefreshFailure;

pub use request::{ApiRequest, ApiResponse, PendingRequest};

pub use store::{FileStore, MemoryStore, Secret, SecretStore, StoreError, create_store};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use reqwest::{Method, StatusCode};
