//! Single-flight credential renewal.
//!
//! `RenewalCoordinator` owns the only path to `POST /auth/refresh`. Callers
//! that ask for a renewal while one is already in flight await the same
//! shared outcome instead of issuing their own call, so a server that
//! rotates refresh material per call never sees competing renewals.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::client::CLIENT_ID_HEADER;
use crate::auth::credential::{unix_now, Credential};
use crate::auth::store::CredentialStore;
use crate::retry::with_timeout;

/// Path of the renewal endpoint, relative to the API root.
pub const RENEW_PATH: &str = "/auth/refresh";

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// `Ok(Some)` carries a fresh credential, `Ok(None)` means the server
/// refused to renew (the store has been cleared).
pub type RenewalOutcome = Result<Option<Credential>, RenewalError>;

/// Transport-level renewal failure. The store is left untouched.
///
/// Cloneable because every caller joined on one renewal receives a copy.
#[derive(Clone, Debug, Error)]
pub enum RenewalError {
    #[error("renewal request failed: {0}")]
    Transport(Arc<reqwest::Error>),

    #[error("renewal http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse renewal response: {0}")]
    Parse(String),

    #[error("renewal timed out after {0:?}")]
    Timeout(Duration),

    #[error("renewal task aborted: {0}")]
    Aborted(String),
}

/// Networking-facing view of credentials.
///
/// API and stream clients only need to read the current credential, ask for
/// a renewal, and drop the credential; this trait is all they get.
pub trait CredentialProvider: Send + Sync {
    fn current(&self) -> Option<Credential>;

    fn refresh(&self) -> BoxFuture<'_, RenewalOutcome>;

    fn clear(&self);
}

type PendingRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

/// Process-wide renewal coordinator. Build one per application and share it.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<RenewalInner>,
}

struct RenewalInner {
    http: Client,
    endpoint: String,
    client_id: String,
    timeout: Option<Duration>,
    store: Arc<dyn CredentialStore>,
    pending: Mutex<Option<PendingRenewal>>,
}

impl RenewalCoordinator {
    pub fn new(
        http: Client,
        base_url: &str,
        client_id: impl Into<String>,
        timeout: Option<Duration>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RenewalInner {
                http,
                endpoint: format!("{base_url}{RENEW_PATH}"),
                client_id: client_id.into(),
                timeout,
                store,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// True while a renewal call is in flight.
    pub fn is_renewing(&self) -> bool {
        self.inner
            .pending
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Renews the credential, joining an in-flight renewal when there is one.
    ///
    /// The network call runs on its own task so it settles even if every
    /// caller stops waiting. The slot is emptied before the outcome reaches
    /// any caller, so the next `renew` after settlement starts a fresh call.
    pub async fn renew(&self) -> RenewalOutcome {
        let pending = {
            let mut slot = match self.inner.pending.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            match slot.as_ref() {
                Some(pending) => {
                    debug!(event = "renewal_joined");
                    pending.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let outcome = inner.perform_renewal().await;
                        inner.clear_pending();
                        outcome
                    });
                    let pending = async move {
                        task.await
                            .unwrap_or_else(|err| Err(RenewalError::Aborted(err.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }
}

impl RenewalInner {
    fn clear_pending(&self) {
        match self.pending.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    async fn perform_renewal(&self) -> RenewalOutcome {
        debug!(event = "renewal_started");

        let outcome = match self.timeout {
            Some(timeout) => with_timeout(timeout, self.send_renewal())
                .await
                .unwrap_or(Err(RenewalError::Timeout(timeout))),
            None => self.send_renewal().await,
        };

        match &outcome {
            Ok(Some(credential)) => {
                self.store.set(Some(credential.clone()));
                debug!(
                    event = "renewal_succeeded",
                    expires_in_secs = credential
                        .expires_at()
                        .map(|exp| exp.saturating_sub(unix_now()))
                );
            }
            Ok(None) => {
                self.store.clear();
                warn!(event = "renewal_rejected");
            }
            Err(err) => {
                warn!(event = "renewal_failed", error = %err);
            }
        }

        outcome
    }

    async fn send_renewal(&self) -> RenewalOutcome {
        let response = self
            .http
            .post(&self.endpoint)
            .header(CLIENT_ID_HEADER, &self.client_id)
            .send()
            .await
            .map_err(|err| RenewalError::Transport(Arc::new(err)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| RenewalError::Transport(Arc::new(err)))?;

        parse_renewal_response(status, &body)
    }
}

impl CredentialProvider for RenewalCoordinator {
    fn current(&self) -> Option<Credential> {
        self.inner.store.get()
    }

    fn refresh(&self) -> BoxFuture<'_, RenewalOutcome> {
        self.renew().boxed()
    }

    fn clear(&self) {
        self.inner.store.clear();
    }
}

#[derive(Debug, Deserialize)]
struct RenewalResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_renewal_response(status: StatusCode, body: &str) -> RenewalOutcome {
    if status.is_server_error() {
        return Err(RenewalError::HttpStatus {
            status,
            body: body.chars().take(ERROR_BODY_SNIPPET_LEN).collect(),
        });
    }

    match serde_json::from_str::<RenewalResponse>(body) {
        Ok(parsed) => {
            let token = parsed
                .access_token
                .filter(|token| parsed.success && !token.trim().is_empty());
            if token.is_none() {
                debug!(
                    event = "renewal_response_without_credential",
                    status = status.as_u16(),
                    error = parsed.error.as_deref().unwrap_or("")
                );
            }
            Ok(token.map(Credential::new))
        }
        Err(_) if status.is_client_error() => Ok(None),
        Err(err) if status.is_success() => Err(RenewalError::Parse(err.to_string())),
        Err(_) => Err(RenewalError::HttpStatus {
            status,
            body: body.chars().take(ERROR_BODY_SNIPPET_LEN).collect(),
        }),
    }
}

/// Returns the credential to use for a long-lived connection, renewing it
/// first when it is close to expiry.
///
/// Best effort: if renewal fails, the current credential (possibly stale)
/// is returned. Without any current credential nothing is renewed and the
/// caller proceeds anonymously.
pub async fn preventive_renew(
    provider: &dyn CredentialProvider,
    threshold: Duration,
) -> Option<Credential> {
    let current = provider.current()?;
    if !current.expires_within(threshold, unix_now()) {
        return Some(current);
    }

    debug!(
        event = "preventive_renewal",
        threshold_secs = threshold.as_secs(),
        has_expiry = current.expires_at().is_some()
    );
    match provider.refresh().await {
        Ok(Some(fresh)) => Some(fresh),
        Ok(None) => {
            debug!(event = "preventive_renewal_rejected");
            Some(current)
        }
        Err(err) => {
            debug!(event = "preventive_renewal_failed", error = %err);
            Some(current)
        }
    }
}
