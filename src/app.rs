//! Application-level wiring.
//!
//! [`StudioClient`] builds one HTTP client (with the cookie jar holding the
//! refresh credential) and one [`RenewalCoordinator`], and hands both to
//! every consumer. Build it once per application and clone it freely.

use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;

use crate::api::auth::AuthApi;
use crate::api::client::ApiClient;
use crate::api::tasks::TasksApi;
use crate::auth::renewal::{CredentialProvider, RenewalCoordinator};
use crate::auth::store::CredentialStore;
use crate::config::{normalize_base_url, ClientOptions};
use crate::stream::client::{PushStreamTransport, SseTransport};
use crate::stream::session::{StreamClient, StreamError};

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("client id must not be empty")]
    MissingClientId,

    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Clone)]
pub struct StudioClient {
    options: ClientOptions,
    renewal: RenewalCoordinator,
    api: ApiClient,
    auth: AuthApi,
    tasks: TasksApi,
    streams: StreamClient,
}

impl StudioClient {
    pub fn new(
        options: ClientOptions,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ClientBuildError> {
        let mut options = options;
        options.base_url = normalize_base_url(&options.base_url);
        if options.client_id.trim().is_empty() {
            return Err(ClientBuildError::MissingClientId);
        }

        let http = Client::builder()
            .no_proxy()
            .cookie_store(true)
            .connect_timeout(options.connect_timeout)
            .build()?;

        let renewal = RenewalCoordinator::new(
            http.clone(),
            &options.base_url,
            options.client_id.clone(),
            options.renewal_timeout,
            Arc::clone(&store),
        );
        let provider: Arc<dyn CredentialProvider> = Arc::new(renewal.clone());

        let api = ApiClient::new(
            http.clone(),
            options.base_url.clone(),
            options.client_id.clone(),
            options.request_timeout,
            Arc::clone(&provider),
        );
        let auth = AuthApi::new(api.clone(), store);
        let tasks = TasksApi::new(api.clone());

        let transport: Arc<dyn PushStreamTransport> = Arc::new(
            SseTransport::new(http, options.client_id.clone())
                .with_backoff(options.stream.transport_backoff.clone())
                .with_max_transient_reconnects(options.stream.max_transient_reconnects),
        );
        let streams = StreamClient::new(
            options.base_url.clone(),
            options.client_id.clone(),
            transport,
            provider,
        )
        .with_options(options.stream.clone());
        streams.subscription_url("task", None)?;

        Ok(Self {
            options,
            renewal,
            api,
            auth,
            tasks,
            streams,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Generic authenticated requests.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn auth(&self) -> &AuthApi {
        &self.auth
    }

    pub fn tasks(&self) -> &TasksApi {
        &self.tasks
    }

    /// Task event sessions.
    pub fn streams(&self) -> &StreamClient {
        &self.streams
    }

    pub fn renewal(&self) -> &RenewalCoordinator {
        &self.renewal
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        self.renewal.store()
    }
}
