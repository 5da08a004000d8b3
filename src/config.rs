//! Client configuration.
//!
//! `ClientDefaults` holds the tuning constants; `ClientOptions` and
//! `StreamOptions` carry them into the clients and can be adjusted with the
//! `with_*` builders.

use std::time::Duration;

use crate::retry::{BackoffPolicy, ReconnectPolicy};

/// Default API base URL used when no override is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const RENEWAL_TIMEOUT: Duration = Duration::from_secs(10);
    pub const RENEW_THRESHOLD: Duration = Duration::from_secs(300);
    pub const STREAM_ATTEMPT_BUDGET: u32 = 3;
    pub const STREAM_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
    pub const TRANSPORT_MAX_RECONNECTS: usize = 5;
    pub const TRANSPORT_BACKOFF: Duration = Duration::from_millis(500);
    pub const TRANSPORT_MAX_BACKOFF: Duration = Duration::from_secs(5);
    pub const TRANSPORT_JITTER: Duration = Duration::from_millis(100);
}

/// Options shared by every client built from one [`crate::app::StudioClient`].
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// API root, e.g. `https://studio.example.com/api`. No trailing slash.
    pub base_url: String,
    /// Caller-scope identifier sent as `X-User-Id` on every request and as
    /// `user_id` on stream subscriptions.
    pub client_id: String,
    pub connect_timeout: Duration,
    /// Per-attempt timeout for request/response calls. Streams are exempt.
    pub request_timeout: Duration,
    /// Upper bound for a single renewal round trip. `None` leaves it to
    /// transport defaults.
    pub renewal_timeout: Option<Duration>,
    pub stream: StreamOptions,
}

impl ClientOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Sets the API root. Trailing whitespace and slashes are dropped.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(&base_url.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_renewal_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.renewal_timeout = timeout;
        self
    }

    pub fn with_stream_options(mut self, stream: StreamOptions) -> Self {
        self.stream = stream;
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: String::new(),
            connect_timeout: ClientDefaults::CONNECT_TIMEOUT,
            request_timeout: ClientDefaults::REQUEST_TIMEOUT,
            renewal_timeout: Some(ClientDefaults::RENEWAL_TIMEOUT),
            stream: StreamOptions::default(),
        }
    }
}

/// Tuning for streaming sessions and the SSE transport under them.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Session-level reconnect budget and delay.
    pub reconnect: ReconnectPolicy,
    /// Preventive renewal kicks in when the credential expires within this
    /// window.
    pub renew_threshold: Duration,
    /// Backoff for the transport's own reconnects after network blips.
    pub transport_backoff: BackoffPolicy,
    /// Consecutive transient drops the transport absorbs before it reports a
    /// terminal close.
    pub max_transient_reconnects: usize,
}

impl StreamOptions {
    pub fn with_attempt_budget(mut self, budget: u32) -> Self {
        self.reconnect.budget = budget;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect.delay = delay;
        self
    }

    pub fn with_renew_threshold(mut self, threshold: Duration) -> Self {
        self.renew_threshold = threshold;
        self
    }

    pub fn with_transport_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.transport_backoff = backoff;
        self
    }

    pub fn with_max_transient_reconnects(mut self, max: usize) -> Self {
        self.max_transient_reconnects = max;
        self
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            renew_threshold: ClientDefaults::RENEW_THRESHOLD,
            transport_backoff: BackoffPolicy::default(),
            max_transient_reconnects: ClientDefaults::TRANSPORT_MAX_RECONNECTS,
        }
    }
}

pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ClientDefaults, ClientOptions, StreamOptions, DEFAULT_BASE_URL};

    #[test]
    fn defaults_match_documented_values() {
        let options = ClientOptions::default();
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.stream.reconnect.budget, 3);
        assert_eq!(options.stream.reconnect.delay, Duration::from_millis(1000));
        assert_eq!(options.stream.renew_threshold, Duration::from_secs(300));
        assert_eq!(options.renewal_timeout, Some(ClientDefaults::RENEWAL_TIMEOUT));
    }

    #[test]
    fn base_url_override_is_normalized() {
        let options = ClientOptions::new("user-1").with_base_url("https://studio.example/api/  \n");
        assert_eq!(options.base_url, "https://studio.example/api");
        assert_eq!(options.client_id, "user-1");
    }

    #[test]
    fn stream_builders_adjust_policy() {
        let stream = StreamOptions::default()
            .with_attempt_budget(5)
            .with_reconnect_delay(Duration::from_millis(10));
        assert_eq!(stream.reconnect.budget, 5);
        assert_eq!(stream.reconnect.delay, Duration::from_millis(10));
    }
}
