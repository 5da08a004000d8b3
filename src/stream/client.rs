//! Push-stream transport.
//!
//! A transport turns a subscription address into a stream of
//! [`TransportSignal`]s. It retries network blips on its own and reports
//! them as `Reconnecting`; `Closed` means it has given up for good.
//! Dropping the returned stream tears the connection down.

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::client::CLIENT_ID_HEADER;
use crate::config::ClientDefaults;
use crate::retry::BackoffPolicy;
use crate::stream::sse::{SseDecoder, SseEvent};

const EVENT_STREAM_MIME: &str = "text/event-stream";
const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Observable transport signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSignal {
    /// Connection established and the server accepted the subscription.
    Open,
    Event(SseEvent),
    /// Connection dropped; the transport is reconnecting by itself.
    Reconnecting,
    /// The transport will not retry. Always the last signal.
    Closed,
}

/// Capability to open a push-stream subscription.
pub trait PushStreamTransport: Send + Sync {
    fn open(&self, url: Url) -> BoxStream<'static, TransportSignal>;
}

/// `text/event-stream` transport over a streaming HTTP body.
///
/// Mirrors browser `EventSource` semantics: an error status or a wrong
/// content type is terminal, anything else that ends the body is retried.
#[derive(Clone)]
pub struct SseTransport {
    http: Client,
    client_id: String,
    backoff: BackoffPolicy,
    max_transient_reconnects: usize,
}

impl SseTransport {
    pub fn new(http: Client, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            backoff: BackoffPolicy::default(),
            max_transient_reconnects: ClientDefaults::TRANSPORT_MAX_RECONNECTS,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consecutive drops without any event before the transport gives up.
    pub fn with_max_transient_reconnects(mut self, max: usize) -> Self {
        self.max_transient_reconnects = max;
        self
    }
}

impl PushStreamTransport for SseTransport {
    fn open(&self, url: Url) -> BoxStream<'static, TransportSignal> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(event = "sse_transport_dropped");
                }
                _ = sse_connection_worker(&transport, url, &tx) => {}
            }
        });

        stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }
}

enum StreamOutcome {
    /// The server refused the subscription.
    Rejected(String),
    /// The connection went away; `received` tells whether it carried events.
    Dropped { received: bool },
}

async fn sse_connection_worker(
    transport: &SseTransport,
    url: Url,
    tx: &mpsc::UnboundedSender<TransportSignal>,
) {
    let mut decoder = SseDecoder::new();
    let mut drops = 0usize;

    loop {
        match run_event_stream(transport, &url, &mut decoder, tx).await {
            StreamOutcome::Rejected(reason) => {
                debug!(event = "sse_rejected", reason = %reason);
                break;
            }
            StreamOutcome::Dropped { received } => {
                if received {
                    drops = 0;
                }
                drops += 1;
                if drops > transport.max_transient_reconnects {
                    debug!(event = "sse_reconnects_exhausted", drops);
                    break;
                }

                let delay = decoder
                    .retry()
                    .unwrap_or_else(|| transport.backoff.delay_for_attempt(drops));
                debug!(
                    event = "sse_reconnecting",
                    drops,
                    delay_ms = delay.as_millis() as u64
                );
                if tx.send(TransportSignal::Reconnecting).is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
                decoder.reset_connection();
            }
        }
    }

    let _ = tx.send(TransportSignal::Closed);
}

async fn run_event_stream(
    transport: &SseTransport,
    url: &Url,
    decoder: &mut SseDecoder,
    tx: &mpsc::UnboundedSender<TransportSignal>,
) -> StreamOutcome {
    let mut request = transport
        .http
        .get(url.clone())
        .header(ACCEPT, EVENT_STREAM_MIME)
        .header(CACHE_CONTROL, "no-cache")
        .header(CLIENT_ID_HEADER, &transport.client_id);
    if let Some(last_event_id) = decoder.last_event_id() {
        request = request.header(LAST_EVENT_ID_HEADER, last_event_id);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(event = "sse_connect_failed", error = %err);
            return StreamOutcome::Dropped { received: false };
        }
    };

    let status = response.status();
    if !status.is_success() {
        return StreamOutcome::Rejected(format!("http status {status}"));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !is_event_stream(content_type) {
        return StreamOutcome::Rejected(format!("unexpected content type {content_type:?}"));
    }

    if tx.send(TransportSignal::Open).is_err() {
        return StreamOutcome::Dropped { received: false };
    }

    let mut received = false;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.feed(&bytes) {
                    received = true;
                    if tx.send(TransportSignal::Event(event)).is_err() {
                        return StreamOutcome::Dropped { received };
                    }
                }
            }
            Err(err) => {
                debug!(event = "sse_body_failed", error = %err);
                return StreamOutcome::Dropped { received };
            }
        }
    }

    StreamOutcome::Dropped { received }
}

fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM_MIME))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::is_event_stream;

    #[test]
    fn event_stream_content_type_ignores_parameters() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("text/event-stream; charset=utf-8"));
        assert!(is_event_stream("Text/Event-Stream"));
    }

    #[test]
    fn other_content_types_are_rejected() {
        assert!(!is_event_stream("application/json"));
        assert!(!is_event_stream("text/html; charset=utf-8"));
        assert!(!is_event_stream(""));
    }
}
