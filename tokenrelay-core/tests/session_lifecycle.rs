//! Login, logout and restart behaviour of the session.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokenrelay_core::{
    ApiError, AuthClient, ClientConfig, CredentialKind, FileStore, MemoryStore, PersistencePolicy,
    RefreshFailure, Secret, SecretStore, SessionStatus, StoreError, TokenPair,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

fn memory_client(base_url: &str) -> AuthClient {
    AuthClient::new(ClientConfig::new(base_url), Box::new(MemoryStore::new())).unwrap()
}

async fn mount_login(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

fn login_body() -> serde_json::Value {
    json!({ "email": "ada@example.com", "password": "pw" })
}

/// Backend whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl SecretStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: "disk full".to_string(),
            });
        }
        self.inner.set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_login_persists_tokens_before_returning() {
    let server = MockServer::start().await;
    mount_login(
        &server,
        json!({ "data": { "accessToken": "A1", "refreshToken": "R1", "user": { "id": 7 } } }),
    )
    .await;

    let client = memory_client(&server.uri());
    let response = client.login(login_body()).await.unwrap();

    assert_eq!(response.json_value().unwrap()["data"]["user"]["id"], 7);
    let session = client.credentials().session().await;
    assert_eq!(session.access_token.unwrap().expose(), "A1");
    assert_eq!(session.refresh_token.unwrap().expose(), "R1");
    assert_eq!(client.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_rejected_login_is_plain_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = memory_client(&server.uri());
    let err = client.login(login_body()).await.unwrap_err();

    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
    assert!(!err.is_session_terminated());
    assert!(!client.credentials().session().await.is_live());
    assert_eq!(client.refresh_count(), 0);
}

#[tokio::test]
async fn test_register_then_verify_otp() {
    let server = MockServer::start().await;

    // Registration only triggers an OTP; no tokens yet.
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "message": "otp sent" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/verify-otp"))
        .and(body_json(json!({ "email": "ada@example.com", "otp": "123456" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "A1", "refresh_token": "R1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = memory_client(&server.uri());

    client
        .register(json!({ "email": "ada@example.com", "password": "pw" }))
        .await
        .unwrap();
    assert!(!client.credentials().session().await.is_live());

    client
        .verify_otp(json!({ "email": "ada@example.com", "otp": "123456" }))
        .await
        .unwrap();
    let session = client.credentials().session().await;
    assert!(session.is_live());
    assert!(session.can_refresh());
}

#[tokio::test]
async fn test_logout_clears_credentials_and_keeps_flags() {
    let server = MockServer::start().await;
    mount_login(&server, json!({ "accessToken": "A1", "refreshToken": "R1" })).await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = memory_client(&server.uri());
    client.login(login_body()).await.unwrap();
    client.credentials().set_flag("biometrics", true).await.unwrap();

    client.logout().await.unwrap();

    assert!(client.credentials().get(CredentialKind::Access).await.is_none());
    assert!(client.credentials().get(CredentialKind::Refresh).await.is_none());
    assert!(client.credentials().flag("biometrics").await);
    assert_eq!(client.status(), SessionStatus::SignedOut);
}

#[tokio::test]
async fn test_logout_offline_still_clears() {
    // Reserve a port and release it so nothing is listening there.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let client = memory_client(&format!("http://127.0.0.1:{port}"));
    client
        .establish_session(&TokenPair::new("A1").with_refresh_token("R1"))
        .await
        .unwrap();

    let err = client.logout().await.unwrap_err();

    assert!(matches!(err, ApiError::Network(_)));
    assert!(!client.credentials().session().await.is_live());
    assert_eq!(client.status(), SessionStatus::SignedOut);
}

#[tokio::test]
async fn test_rejected_logout_does_not_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = memory_client(&server.uri());
    client
        .establish_session(&TokenPair::new("A1").with_refresh_token("R1"))
        .await
        .unwrap();

    assert!(client.logout().await.is_err());
    assert!(client.credentials().get(CredentialKind::Access).await.is_none());
}

#[tokio::test]
async fn test_file_backed_session_survives_restart() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let store_path = temp_dir.path().join("credentials.json");

    mount_login(&server, json!({ "accessToken": "A1", "refreshToken": "R1" })).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    {
        let store = FileStore::open(&store_path).unwrap();
        let client = AuthClient::new(ClientConfig::new(server.uri()), Box::new(store)).unwrap();
        client.login(login_body()).await.unwrap();
    }

    // A new process: same file, fresh client.
    let store = FileStore::open(&store_path).unwrap();
    let client = AuthClient::new(ClientConfig::new(server.uri()), Box::new(store)).unwrap();
    let session = client.restore().await;

    assert!(session.is_live());
    assert_eq!(client.status(), SessionStatus::Active);
    client.get("/profile").await.unwrap();
}

#[tokio::test]
async fn test_strict_persistence_fails_login() {
    let server = MockServer::start().await;
    mount_login(&server, json!({ "accessToken": "A1", "refreshToken": "R1" })).await;

    let store = FlakyStore::default();
    store.fail_writes.store(true, Ordering::SeqCst);

    let config = ClientConfig::new(server.uri()).with_persistence(PersistencePolicy::Strict);
    let client = AuthClient::new(config, Box::new(store)).unwrap();
    let err = client.login(login_body()).await.unwrap_err();

    assert!(matches!(err, ApiError::Storage(_)));
    assert!(!client.credentials().session().await.is_live());
    assert_eq!(client.status(), SessionStatus::SignedOut);
}

#[tokio::test]
async fn test_best_effort_persistence_keeps_login() {
    let server = MockServer::start().await;
    mount_login(&server, json!({ "accessToken": "A1", "refreshToken": "R1" })).await;

    let store = FlakyStore::default();
    store.fail_writes.store(true, Ordering::SeqCst);

    let client = AuthClient::new(ClientConfig::new(server.uri()), Box::new(store)).unwrap();
    client.login(login_body()).await.unwrap();

    // The login call succeeds; nothing reached the backend.
    assert_eq!(client.status(), SessionStatus::Active);
    assert!(client.credentials().get(CredentialKind::Access).await.is_none());
}

#[tokio::test]
async fn test_strict_persistence_failure_during_refresh_terminates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wallet"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "A2" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = FlakyStore::default();
    let fail_writes = Arc::clone(&store.fail_writes);
    let config = ClientConfig::new(server.uri()).with_persistence(PersistencePolicy::Strict);
    let client = AuthClient::new(config, Box::new(store)).unwrap();
    client
        .establish_session(&TokenPair::new("A1").with_refresh_token("R1"))
        .await
        .unwrap();

    fail_writes.store(true, Ordering::SeqCst);
    let err = client.get("/wallet").await.unwrap_err();

    assert!(err.is_session_terminated());
    assert!(!client.credentials().session().await.is_live());
    assert_eq!(client.status(), SessionStatus::Terminated);
}

#[tokio::test]
async fn test_logout_during_refresh_stays_logged_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": "A2", "refreshToken": "R2" }))
                .set_delay(Duration::from_millis(400)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = memory_client(&server.uri());
    client
        .establish_session(&TokenPair::new("A1").with_refresh_token("R1"))
        .await
        .unwrap();

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.get("/wallet").await }
    });

    // The request has been rejected and the refresh is still running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.logout().await.unwrap();

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ApiError::SessionTerminated {
            reason: RefreshFailure::SignedOut
        }
    ));

    let session = client.credentials().session().await;
    assert!(session.access_token.is_none());
    assert!(session.refresh_token.is_none());
    assert_eq!(client.status(), SessionStatus::SignedOut);
}

#[tokio::test]
async fn test_failed_refresh_keeps_newer_login() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", "Bearer A3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(400)))
        .expect(1)
        .mount(&server)
        .await;
    mount_login(&server, json!({ "accessToken": "A3", "refreshToken": "R3" })).await;

    let client = memory_client(&server.uri());
    client
        .establish_session(&TokenPair::new("A1").with_refresh_token("R1"))
        .await
        .unwrap();

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.get("/wallet").await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.login(login_body()).await.unwrap();

    // The stale refresh fails, but the request replays with the new login.
    request.await.unwrap().unwrap();

    let session = client.credentials().session().await;
    assert_eq!(session.access_token.unwrap().expose(), "A3");
    assert_eq!(session.refresh_token.unwrap().expose(), "R3");
    assert_eq!(client.status(), SessionStatus::Active);
}
