//! Login, registration and logout.
//!
//! These are the only writers of the credential store besides the renewal
//! coordinator. All of them hit renewal-exempt endpoints.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::client::{ApiClient, ApiError, ApiRequest};
use crate::auth::credential::Credential;
use crate::auth::store::CredentialStore;

#[derive(Clone, Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password: String,
}

/// Established session returned by login or registration.
#[derive(Clone, Debug)]
pub struct AuthSession {
    pub credential: Credential,
    /// User profile as sent by the server.
    pub user: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct AuthApi {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
}

impl AuthApi {
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>) -> Self {
        Self { api, store }
    }

    /// Logs in and stores the access credential. The refresh credential is
    /// kept by the HTTP client's cookie jar.
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthSession, ApiError> {
        let response = self
            .api
            .send(ApiRequest::post("/auth/login").with_json(request)?)
            .await?;
        let session = self.accept_session(response.json()?)?;
        info!(event = "logged_in");
        Ok(session)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthSession, ApiError> {
        let response = self
            .api
            .send(ApiRequest::post("/auth/register").with_json(request)?)
            .await?;
        let session = self.accept_session(response.json()?)?;
        info!(event = "registered");
        Ok(session)
    }

    /// Revokes the current refresh credential server-side and clears the
    /// local credential. The local credential is cleared even when the call
    /// fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.end_session("/auth/logout").await
    }

    /// Revokes every refresh credential of the user.
    pub async fn logout_all(&self) -> Result<(), ApiError> {
        self.end_session("/auth/logout-all").await
    }

    /// Current user profile, through the renewing request path.
    pub async fn me(&self) -> Result<Value, ApiError> {
        self.api.get_json("/auth/me").await
    }

    async fn end_session(&self, path: &str) -> Result<(), ApiError> {
        let result = self.api.send(ApiRequest::post(path)).await;
        self.store.clear();
        debug!(event = "logged_out", path, ok = result.is_ok());
        result.map(|_| ())
    }

    fn accept_session(&self, envelope: AuthEnvelope) -> Result<AuthSession, ApiError> {
        let token = envelope
            .access_token
            .filter(|token| envelope.success && !token.trim().is_empty())
            .ok_or_else(|| {
                ApiError::Rejected(
                    envelope
                        .error
                        .unwrap_or_else(|| "response carried no access token".to_string()),
                )
            })?;

        let credential = Credential::new(token);
        self.store.set(Some(credential.clone()));
        Ok(AuthSession {
            credential,
            user: envelope.user,
        })
    }
}
