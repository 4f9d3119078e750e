//! Request and response values passed through the pipeline.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::ApiError;

/// Description of one logical HTTP call.
///
/// Kept as plain data so the pipeline can replay it after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header. The authorization header is owned by the pipeline and
    /// is replaced on every attempt.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ApiError::Network)?;
        Ok(Self { status, headers, body })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::InvalidResponse {
            message: format!("failed to parse body: {}", e),
        })
    }

    /// Body as a JSON value; an empty body is `null`.
    pub fn json_value(&self) -> Result<Value, ApiError> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        self.json()
    }

    /// Turn a failure status into [`ApiError::Server`].
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.text()))
        }
    }
}

/// A request whose credential was rejected, parked until the refresh it
/// waits on resolves.
///
/// Consumed by [`PendingRequest::into_retry`], so it is replayed at most once.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: Uuid,

    /// Session generation of the credential the request was sent with.
    pub generation: u64,

    request: ApiRequest,
}

impl PendingRequest {
    pub fn new(id: Uuid, generation: u64, request: ApiRequest) -> Self {
        Self { id, generation, request }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn into_retry(self) -> ApiRequest {
        self.request
    }
}

/// Join `path` onto `base`, keeping any path prefix of `base`.
///
/// `https://api.example.com/v1` + `/wallet` → `https://api.example.com/v1/wallet`.
/// Query strings in `path` are preserved.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> Result<Url, ApiError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ApiError::InvalidRequest {
        message: format!("invalid path {:?}: {}", path, e),
    })
}
