//! Authenticated request/response client.
//!
//! Every call goes through [`ApiClient::send`], which attaches the caller
//! scope and credential headers and handles a 401 by renewing the credential
//! and resubmitting the request once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::auth::credential::Credential;
use crate::auth::renewal::{preventive_renew, CredentialProvider, RenewalError};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Header carrying the caller-scope identifier on every request.
pub const CLIENT_ID_HEADER: &str = "X-User-Id";

/// Endpoints that must never trigger a renewal, even when they answer 401.
pub const RENEWAL_EXEMPT_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/register",
    "/auth/refresh",
    "/auth/logout",
    "/auth/logout-all",
];

/// One logical outgoing request.
///
/// The retry marker travels with the request so a resubmitted request that
/// fails again is never renewed and resubmitted a second time.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    authorization: Option<String>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authorization: None,
            retried: false,
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

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(ApiError::Encode)?);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets an explicit `Authorization` value; the stored credential is then
    /// not attached.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Marks the request as already resubmitted after a renewal.
    pub fn with_retry_marker(mut self) -> Self {
        self.retried = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// True for the auth endpoints whose 401s are passed through untouched.
    pub fn is_renewal_exempt(&self) -> bool {
        is_renewal_exempt(&self.path)
    }
}

/// Successful (2xx) response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|err| ApiError::Parse(err.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("unauthorized: {body}")]
    Unauthorized { body: String },

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("credential renewal failed: {0}")]
    RenewalFailed(#[source] RenewalError),

    #[error("failed to encode request body: {0}")]
    Encode(serde_json::Error),

    #[error("failed to parse response: {0}")]
    Parse(String),

    /// 2xx response whose envelope reported `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::RenewalFailed(_) | Self::Encode(_) | Self::Parse(_) | Self::Rejected(_) => None,
        }
    }
}

/// Request/response client with reactive renewal.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    client_id: String,
    request_timeout: Duration,
    provider: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        request_timeout: Duration,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            client_id: client_id.into(),
            request_timeout,
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<dyn CredentialProvider> {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request, renewing the credential and resubmitting once on 401.
    ///
    /// Exempt endpoints and already-resubmitted requests get their 401
    /// returned as [`ApiError::Unauthorized`]. When the renewal is refused
    /// the original 401 is returned; when the renewal call itself fails the
    /// result is [`ApiError::RenewalFailed`].
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let first = self.dispatch(&request).await;
        let original = match first {
            Err(err) if err.is_unauthorized() => err,
            other => return other,
        };

        if request.is_renewal_exempt() || request.is_retried() {
            debug!(
                event = "unauthorized_passthrough",
                path = %request.path,
                exempt = request.is_renewal_exempt(),
                retried = request.is_retried()
            );
            return Err(original);
        }

        match self.provider.refresh().await {
            Ok(Some(credential)) => {
                debug!(event = "request_resubmitted", path = %request.path);
                request.retried = true;
                request.authorization = Some(credential.bearer());
                self.dispatch(&request).await
            }
            Ok(None) => Err(original),
            Err(err) => Err(ApiError::RenewalFailed(err)),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).with_json(body)?)
            .await?
            .json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).with_json(body)?)
            .await?
            .json()
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::delete(path)).await?.json()
    }

    /// Credential for a long-lived connection, renewed first when it expires
    /// within `threshold`. Never fails; falls back to the current credential.
    pub async fn fresh_credential(&self, threshold: Duration) -> Option<Credential> {
        preventive_renew(self.provider.as_ref(), threshold).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.endpoint(&request.path))
            .timeout(self.request_timeout)
            .header(CLIENT_ID_HEADER, &self.client_id);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        let authorization = request
            .authorization
            .clone()
            .or_else(|| self.provider.current().map(|credential| credential.bearer()));
        if let Some(authorization) = authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }

        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ApiError::Transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized {
                body: summarize_error_body(&body),
            });
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(ApiResponse { status, body })
    }
}

/// True when `path` (query string ignored) is one of the exempt auth
/// endpoints.
pub fn is_renewal_exempt(path: &str) -> bool {
    let path = path.split(|c| c == '?' || c == '#').next().unwrap_or(path);
    let path = path.trim_end_matches('/');
    RENEWAL_EXEMPT_PATHS.iter().any(|exempt| path == *exempt)
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{is_renewal_exempt, summarize_error_body, ApiError, ApiRequest};

    #[test]
    fn auth_endpoints_are_exempt() {
        for path in [
            "/auth/login",
            "/auth/register",
            "/auth/refresh",
            "/auth/logout",
            "/auth/logout-all",
            "/auth/refresh?source=cookie",
            "/auth/login/",
        ] {
            assert!(is_renewal_exempt(path), "{path} should be exempt");
        }
    }

    #[test]
    fn other_endpoints_are_not_exempt() {
        for path in ["/auth/me", "/generate", "/history", "/auth/refresh-status"] {
            assert!(!is_renewal_exempt(path), "{path} should not be exempt");
        }
    }

    #[test]
    fn retry_marker_is_sticky() {
        let request = ApiRequest::get("/history");
        assert!(!request.is_retried());
        assert!(request.with_retry_marker().is_retried());
    }

    #[test]
    fn error_body_prefers_error_field() {
        assert_eq!(
            summarize_error_body(r#"{"success":false,"error":"task not found"}"#),
            "task not found"
        );
        let long = "x".repeat(500);
        assert_eq!(summarize_error_body(&long).len(), 220);
    }

    #[test]
    fn unauthorized_reports_status() {
        let error = ApiError::Unauthorized {
            body: "expired".to_string(),
        };
        assert!(error.is_unauthorized());
        assert_eq!(error.status(), Some(StatusCode::UNAUTHORIZED));
    }
}
