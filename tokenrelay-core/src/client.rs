//! Authenticated request pipeline.
//!
//! [`AuthClient`] wraps every outbound call:
//!
//! 1. waits for a refresh that is already in flight, then attaches the
//!    stored access credential as a bearer token (or none if absent);
//! 2. sends the call;
//! 3. on the configured auth-failure status, parks the request as a
//!    [`PendingRequest`], joins or starts the single shared refresh and
//!    replays the request exactly once with the renewed credential;
//! 4. surfaces network and server errors untouched, and a failed refresh
//!    as [`ApiError::SessionTerminated`] after clearing both credentials.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use serde_json::json;
//! use tokenrelay_core::{AuthClient, ClientConfig, MemoryStore};
//!
//! let client = AuthClient::new(
//!     ClientConfig::new("https://api.example.com"),
//!     Box::new(MemoryStore::new()),
//! )?;
//!
//! client.login(json!({ "email": "a@example.com", "password": "hunter2" })).await?;
//! let balance = client.get("/wallet/balance").await?;
//! println!("{}", balance.text());
//! # Ok(())
//! # }
//! ```

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{ClientConfig, ConfigError, PersistencePolicy};
use crate::credentials::CredentialStore;
use crate::error::{ApiError, TokenRelayError};
use crate::model::{CredentialKind, Session, SessionStatus, TokenPair};
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome, RefreshTicket};
use crate::request::{ApiRequest, ApiResponse, PendingRequest, endpoint_url};
use crate::store::{Secret, SecretStore, create_store};

/// Client for the remote API that owns the session credentials.
///
/// Cheap to clone; clones share the connection pool, the credential store
/// and the refresh coordination.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    auth_failure_status: StatusCode,
    config: ClientConfig,
    credentials: Arc<CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl AuthClient {
    /// Create a client over an explicit storage backend.
    pub fn new(config: ClientConfig, store: Box<dyn SecretStore>) -> Result<Self, ConfigError> {
        let base_url = config.parsed_base_url()?;
        let auth_failure_status = config.auth_failure_status()?;
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        let credentials = CredentialStore::new(store, config.store.namespace.clone());
        let (status, _) = watch::channel(SessionStatus::Unknown);

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                auth_failure_status,
                config,
                credentials: Arc::new(credentials),
                refresh: Arc::new(RefreshCoordinator::new()),
                status: Arc::new(status),
            }),
        })
    }

    /// Create a client whose storage backend is chosen by `config.store`.
    pub fn from_config(config: ClientConfig) -> Result<Self, TokenRelayError> {
        let store = create_store(&config.store)?;
        Ok(Self::new(config, store)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Watch session state changes (e.g. to route to the login screen on
    /// [`SessionStatus::Terminated`]).
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Number of refresh calls issued by this client.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh.started()
    }

    /// Read stored credentials at startup and publish the session state.
    pub async fn restore(&self) -> Session {
        let session = self.inner.credentials.session().await;
        let status = if session.is_live() {
            SessionStatus::Active
        } else {
            SessionStatus::SignedOut
        };
        debug!(?status, "Restored session from store");
        self.inner.status.send_replace(status);
        session
    }

    /// Send `request` with the session credential, renewing it once if the
    /// server rejects it.
    pub async fn perform(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "api_request",
            %id,
            method = %request.method,
            path = %request.path
        );
        self.perform_once(id, request).instrument(span).await
    }

    async fn perform_once(&self, id: Uuid, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let (generation, token) = self.attach().await?;
        let response = self.send(&request, token.as_ref()).await?;

        if response.status != self.inner.auth_failure_status {
            return response.error_for_status();
        }

        debug!(generation, "Access credential rejected");
        let pending = PendingRequest::new(id, generation, request);
        let fresh = self.renew(pending.generation).await?;

        debug!("Replaying request with renewed credential");
        let retry = pending.into_retry();
        self.send(&retry, Some(&fresh)).await?.error_for_status()
    }

    /// Send and decode a JSON response body.
    pub async fn perform_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.perform(request).await?.json()
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.perform(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.perform(ApiRequest::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.perform(ApiRequest::put(path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.perform(ApiRequest::patch(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.perform(ApiRequest::delete(path)).await
    }

    pub async fn login(&self, credentials: Value) -> Result<ApiResponse, ApiError> {
        let path = self.inner.config.endpoints.login.clone();
        self.authenticate(&path, credentials).await
    }

    pub async fn register(&self, details: Value) -> Result<ApiResponse, ApiError> {
        let path = self.inner.config.endpoints.register.clone();
        self.authenticate(&path, details).await
    }

    pub async fn verify_otp(&self, code: Value) -> Result<ApiResponse, ApiError> {
        let path = self.inner.config.endpoints.verify_otp.clone();
        self.authenticate(&path, code).await
    }

    /// Post to a session endpoint without a credential and install any
    /// tokens in the response before returning it.
    ///
    /// A rejected status here is an ordinary [`ApiError::Server`]; it never
    /// triggers a refresh.
    async fn authenticate(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        let request = ApiRequest::post(path).json(body);
        let response = self.send(&request, None).await?.error_for_status()?;

        match response.json_value().ok().as_ref().and_then(TokenPair::from_json) {
            Some(pair) => self.establish_session(&pair).await?,
            None => debug!(path, "Session endpoint returned no tokens"),
        }

        Ok(response)
    }

    /// Install a new session. The tokens are persisted before this returns.
    ///
    /// A refresh still running for the previous session is discarded.
    pub async fn establish_session(&self, pair: &TokenPair) -> Result<(), ApiError> {
        let _transition = self.inner.refresh.transition().await;

        if let Err(e) = self.inner.credentials.set_pair(pair).await {
            match self.inner.config.persistence {
                PersistencePolicy::Strict => {
                    if let Err(clear_err) = self.inner.credentials.clear().await {
                        warn!(error = %clear_err, "Failed to clear partially written session");
                    }
                    self.inner.refresh.rotate();
                    self.inner.status.send_replace(SessionStatus::SignedOut);
                    return Err(ApiError::Storage(e));
                }
                PersistencePolicy::BestEffort => {
                    warn!(error = %e, "Session credentials not persisted; a restart will sign out");
                }
            }
        }

        let generation = self.inner.refresh.rotate();
        self.inner.status.send_replace(SessionStatus::Active);
        info!(generation, "Session established");
        Ok(())
    }

    /// Renew the access credential now. Joins a refresh already in flight.
    pub async fn refresh_now(&self) -> Result<(), ApiError> {
        let seen = self.inner.refresh.generation();
        self.renew(seen).await.map(|_| ())
    }

    /// End the session. Local credentials are cleared whatever happens to
    /// the remote call; its error, if any, is returned afterwards.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let token = self.inner.credentials.get(CredentialKind::Access).await;
        let request = ApiRequest::post(self.inner.config.endpoints.logout.clone());
        let remote = match self.send(&request, token.as_ref()).await {
            Ok(response) => response.error_for_status().map(|_| ()),
            Err(e) => Err(e),
        };

        {
            let _transition = self.inner.refresh.transition().await;
            if let Err(e) = self.inner.credentials.clear().await {
                warn!(error = %e, "Failed to clear credentials on logout");
            }
            self.inner.refresh.rotate();
            self.inner.status.send_replace(SessionStatus::SignedOut);
        }

        match &remote {
            Ok(()) => info!("Logged out"),
            Err(e) => warn!(error = %e, "Remote logout failed; local session cleared"),
        }
        remote
    }

    /// Wait out any running refresh, then read the credential to attach.
    async fn attach(&self) -> Result<(u64, Option<Secret>), ApiError> {
        if let Some(running) = self.inner.refresh.in_flight() {
            debug!("Refresh in flight, waiting before attaching credential");
            running.await?;
        }

        let generation = self.inner.refresh.generation();
        let token = self.inner.credentials.get(CredentialKind::Access).await;
        Ok((generation, token))
    }

    /// New access credential for a request rejected under `seen_generation`.
    async fn renew(&self, seen_generation: u64) -> Result<Secret, ApiError> {
        let refresher = Refresher::new(&self.inner)?;
        let ticket = self
            .inner
            .refresh
            .join_or_start(seen_generation, move |generation| refresher.run(generation));

        match ticket {
            RefreshTicket::Wait(refresh) => Ok(refresh.await?),
            RefreshTicket::Rotated => {
                debug!("Credential already rotated, reusing current token");
                self.inner
                    .credentials
                    .get(CredentialKind::Access)
                    .await
                    .ok_or(ApiError::SessionTerminated {
                        reason: RefreshFailure::SignedOut,
                    })
            }
        }
    }

    async fn send(&self, request: &ApiRequest, token: Option<&Secret>) -> Result<ApiResponse, ApiError> {
        let url = endpoint_url(&self.inner.base_url, &request.path)?;

        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(timeout = e.is_timeout(), error = %e, "Request failed without a response");
            ApiError::Network(e)
        })?;
        ApiResponse::read(response).await
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Everything the refresh call needs, detached from the client so the
/// shared future does not keep the client alive.
struct Refresher {
    http: reqwest::Client,
    url: Url,
    persistence: PersistencePolicy,
    credentials: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl Refresher {
    fn new(inner: &ClientInner) -> Result<Self, ApiError> {
        Ok(Self {
            http: inner.http.clone(),
            url: endpoint_url(&inner.base_url, &inner.config.endpoints.refresh)?,
            persistence: inner.config.persistence,
            credentials: Arc::clone(&inner.credentials),
            coordinator: Arc::clone(&inner.refresh),
            status: Arc::clone(&inner.status),
        })
    }

    /// Exchange the refresh token, then settle the outcome against the
    /// session it was started for.
    async fn run(self, generation: u64) -> RefreshOutcome {
        let exchanged = self.exchange().await;
        let _transition = self.coordinator.transition().await;

        if self.coordinator.generation() != generation {
            // Logged out or logged in again while the call was running.
            debug!(generation, "Session changed during refresh, discarding outcome");
            return self
                .credentials
                .get(CredentialKind::Access)
                .await
                .ok_or(RefreshFailure::SignedOut);
        }

        let outcome = match exchanged {
            Ok(pair) => self.persist(pair).await,
            Err(failure) => Err(failure),
        };

        match &outcome {
            Ok(_) => {
                let generation = self.coordinator.rotate();
                info!(generation, "Access credential refreshed");
                self.status.send_replace(SessionStatus::Active);
            }
            Err(failure) => {
                warn!(%failure, "Refresh failed, terminating session");
                if let Err(e) = self.credentials.clear().await {
                    warn!(error = %e, "Failed to clear credentials after refresh failure");
                }
                self.status.send_replace(SessionStatus::Terminated);
            }
        }

        outcome
    }

    async fn exchange(&self) -> Result<TokenPair, RefreshFailure> {
        let refresh_token = self
            .credentials
            .get(CredentialKind::Refresh)
            .await
            .ok_or(RefreshFailure::MissingRefreshToken)?;

        let response = self
            .http
            .post(self.url.clone())
            .json(&json!({ "refreshToken": refresh_token.expose() }))
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshFailure::Rejected {
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| RefreshFailure::MalformedResponse)?;
        TokenPair::from_json(&body).ok_or(RefreshFailure::MalformedResponse)
    }

    async fn persist(&self, pair: TokenPair) -> RefreshOutcome {
        if let Err(e) = self.credentials.set_pair(&pair).await {
            match self.persistence {
                PersistencePolicy::Strict => {
                    return Err(RefreshFailure::Persist {
                        message: e.to_string(),
                    });
                }
                PersistencePolicy::BestEffort => {
                    warn!(error = %e, "Refreshed credentials not persisted");
                }
            }
        }

        Ok(pair.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn client(base_url: &str) -> AuthClient {
        AuthClient::new(ClientConfig::new(base_url), Box::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let result = AuthClient::new(ClientConfig::new("wallet"), Box::new(MemoryStore::new()));
        assert!(matches!(result, Err(ConfigError::InvalidBaseUrl { .. })));
    }

    #[tokio::test]
    async fn test_restore_reports_signed_out_when_empty() {
        let client = client("http://127.0.0.1:9");
        assert_eq!(client.status(), SessionStatus::Unknown);

        let session = client.restore().await;
        assert!(!session.is_live());
        assert_eq!(client.status(), SessionStatus::SignedOut);
    }

    #[tokio::test]
    async fn test_establish_session_persists_and_publishes() {
        let client = client("http://127.0.0.1:9");
        let mut status = client.subscribe();

        client
            .establish_session(&TokenPair::new("A1").with_refresh_token("R1"))
            .await
            .unwrap();

        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), SessionStatus::Active);
        let session = client.restore().await;
        assert_eq!(session.access_token.unwrap().expose(), "A1");
        assert_eq!(session.refresh_token.unwrap().expose(), "R1");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_terminates_locally() {
        // Port 9 is never contacted: the refresh fails before any I/O.
        let client = client("http://127.0.0.1:9");
        client.establish_session(&TokenPair::new("A1")).await.unwrap();

        let err = client.refresh_now().await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::SessionTerminated {
                reason: RefreshFailure::MissingRefreshToken
            }
        ));
        assert!(client.credentials().get(CredentialKind::Access).await.is_none());
        assert_eq!(client.status(), SessionStatus::Terminated);
        assert_eq!(client.refresh_count(), 1);
    }
}
