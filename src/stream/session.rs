//! Task event sessions with renew-and-reconnect.
//!
//! A [`StreamSession`] follows one generation task. Its worker opens the
//! transport with a freshly checked credential, forwards payload events, and
//! when the stream closes before delivering anything, renews the credential
//! and reconnects up to the attempt budget. Callers read [`SessionEvent`]s
//! from the session; the channel ends when the session terminates.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Url;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::auth::credential::Credential;
use crate::auth::renewal::{preventive_renew, CredentialProvider};
use crate::config::StreamOptions;
use crate::stream::classify::{classify, CloseSignal, FailureClass};
use crate::stream::client::{PushStreamTransport, TransportSignal};
use crate::stream::proto::{FinishEvent, PageEvent, ServerEvent};

const STREAM_PATH: [&str; 2] = ["generate", "stream"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Init,
    Connecting,
    Open,
    Reconnecting,
    ClosedGraceful,
    ClosedFailed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ClosedGraceful | Self::ClosedFailed | Self::Cancelled
        )
    }
}

/// Event delivered to the session owner.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Transport ready, or first payload event on this connection.
    Open,
    Progress(PageEvent),
    Complete(PageEvent),
    /// A page failed server-side. The session keeps running.
    PageError(PageEvent),
    /// Task finished; the session closes gracefully after this.
    Finish(FinishEvent),
    /// Credential renewed, reconnect scheduled.
    Reconnecting { attempt: u32, budget: u32 },
    /// Terminal failure, delivered at most once.
    Failed(StreamFailure),
}

impl From<ServerEvent> for SessionEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Progress(page) => Self::Progress(page),
            ServerEvent::Complete(page) => Self::Complete(page),
            ServerEvent::Error(page) => Self::PageError(page),
            ServerEvent::Finish(finish) => Self::Finish(finish),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureReason {
    /// Every reconnect in the budget was used.
    AttemptsExhausted,
    /// The credential could not be renewed before reconnecting.
    RenewalFailed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamFailure {
    /// Reconnects made before giving up.
    pub attempts: u32,
    pub reason: FailureReason,
    /// Human-readable diagnostic naming the plausible causes.
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Opens task event sessions.
#[derive(Clone)]
pub struct StreamClient {
    base_url: String,
    client_id: String,
    transport: Arc<dyn PushStreamTransport>,
    provider: Arc<dyn CredentialProvider>,
    options: StreamOptions,
}

impl StreamClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        transport: Arc<dyn PushStreamTransport>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            transport,
            provider,
            options: StreamOptions::default(),
        }
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Subscription address for `task_id`, embedding `credential` when given.
    pub fn subscription_url(
        &self,
        task_id: &str,
        credential: Option<&Credential>,
    ) -> Result<Url, StreamError> {
        let base = parse_base_url(&self.base_url)?;
        Ok(build_subscription_url(
            &base,
            task_id,
            &self.client_id,
            credential,
        ))
    }

    /// Starts following `task_id`.
    ///
    /// Returns immediately; the first connection, including any preventive
    /// renewal, happens on the session worker.
    pub fn connect(&self, task_id: impl Into<String>) -> Result<StreamSession, StreamError> {
        let task_id = task_id.into();
        let base = parse_base_url(&self.base_url)?;

        let shared = Arc::new(SessionShared::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = SessionWorker {
            task_id: task_id.clone(),
            base,
            client_id: self.client_id.clone(),
            transport: Arc::clone(&self.transport),
            provider: Arc::clone(&self.provider),
            options: self.options.clone(),
            shared: Arc::clone(&shared),
            events: events_tx,
        };

        tokio::spawn(async move {
            worker.run().await;
        });

        Ok(StreamSession {
            task_id,
            shared,
            events: events_rx,
        })
    }
}

/// A running task event session. Dropping it cancels the session.
#[derive(Debug)]
pub struct StreamSession {
    task_id: String,
    shared: Arc<SessionShared>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl StreamSession {
    /// Receives the next session event. `None` once the session is over.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Stops the session. No reconnect is started after this returns.
    pub fn cancel(&self) {
        self.shared.cancel(&self.task_id);
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Reconnects made so far.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn has_received_payload(&self) -> bool {
        self.shared.has_payload.load(Ordering::SeqCst)
    }

    /// Cloneable control handle that outlives borrows of the session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            task_id: self.task_id.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shared.cancel(&self.task_id);
    }
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    task_id: String,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.shared.cancel(&self.task_id);
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct SessionShared {
    closed: AtomicBool,
    has_payload: AtomicBool,
    attempts: AtomicU32,
    state: Mutex<SessionState>,
    cancel: Notify,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            has_payload: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            state: Mutex::new(SessionState::Init),
            cancel: Notify::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Moves to `next` unless the session already reached a terminal state.
    fn transition(&self, next: SessionState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.is_terminal() {
            *state = next;
        }
    }

    fn cancel(&self, task_id: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transition(SessionState::Cancelled);
        self.cancel.notify_one();
        debug!(event = "stream_cancel_requested", task_id);
    }
}

enum ConnectionEnd {
    Cancelled,
    Graceful,
    Failed,
}

struct SessionWorker {
    task_id: String,
    base: Url,
    client_id: String,
    transport: Arc<dyn PushStreamTransport>,
    provider: Arc<dyn CredentialProvider>,
    options: StreamOptions,
    shared: Arc<SessionShared>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionWorker {
    async fn run(self) {
        if self.shared.is_closed() {
            return;
        }
        let mut credential =
            preventive_renew(self.provider.as_ref(), self.options.renew_threshold).await;

        loop {
            if self.shared.is_closed() {
                debug!(event = "stream_stopped_on_cancel", task_id = %self.task_id);
                return;
            }

            self.shared.transition(SessionState::Connecting);
            let url = build_subscription_url(
                &self.base,
                &self.task_id,
                &self.client_id,
                credential.as_ref(),
            );
            debug!(
                event = "stream_connecting",
                task_id = %self.task_id,
                attempts = self.shared.attempts.load(Ordering::SeqCst),
                authenticated = credential.is_some()
            );

            match self.drive(self.transport.open(url)).await {
                ConnectionEnd::Cancelled => return,
                ConnectionEnd::Graceful => {
                    self.shared.transition(SessionState::ClosedGraceful);
                    info!(
                        event = "stream_closed_graceful",
                        task_id = %self.task_id,
                        attempts = self.shared.attempts.load(Ordering::SeqCst)
                    );
                    return;
                }
                ConnectionEnd::Failed => {}
            }

            if self.shared.is_closed() {
                debug!(event = "stream_stopped_on_cancel", task_id = %self.task_id);
                return;
            }
            let attempts = self.shared.attempts.load(Ordering::SeqCst);
            if !self.options.reconnect.allows(attempts) {
                self.fail(FailureReason::AttemptsExhausted, attempts);
                return;
            }

            self.shared.transition(SessionState::Reconnecting);
            let renewed = self.provider.refresh().await;
            if self.shared.is_closed() {
                debug!(event = "stream_stopped_on_cancel", task_id = %self.task_id);
                return;
            }
            match renewed {
                Ok(Some(fresh)) => credential = Some(fresh),
                Ok(None) => {
                    self.fail(FailureReason::RenewalFailed, attempts);
                    return;
                }
                Err(err) => {
                    warn!(event = "stream_renewal_failed", task_id = %self.task_id, error = %err);
                    self.fail(FailureReason::RenewalFailed, attempts);
                    return;
                }
            }

            let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let budget = self.options.reconnect.budget;
            let delay = self.options.reconnect.delay;
            debug!(
                event = "stream_reconnect_scheduled",
                task_id = %self.task_id,
                attempt,
                budget,
                delay_ms = delay.as_millis() as u64
            );
            let _ = self
                .events
                .send(SessionEvent::Reconnecting { attempt, budget });

            tokio::select! {
                _ = self.shared.cancel.notified() => {
                    debug!(event = "stream_reconnect_cancelled", task_id = %self.task_id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pumps one transport until it ends. The transport is dropped on return.
    async fn drive(&self, mut transport: BoxStream<'static, TransportSignal>) -> ConnectionEnd {
        let mut opened = false;

        loop {
            let signal = tokio::select! {
                _ = self.shared.cancel.notified() => return ConnectionEnd::Cancelled,
                signal = transport.next() => signal,
            };
            if self.shared.is_closed() {
                return ConnectionEnd::Cancelled;
            }

            match signal {
                Some(TransportSignal::Open) => self.mark_open(&mut opened),
                Some(TransportSignal::Event(raw)) => match ServerEvent::from_sse(&raw) {
                    Ok(Some(event)) => {
                        self.mark_open(&mut opened);
                        self.shared.has_payload.store(true, Ordering::SeqCst);
                        let finished = event.is_finish();
                        let _ = self.events.send(SessionEvent::from(event));
                        if finished {
                            return ConnectionEnd::Graceful;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(
                            event = "stream_payload_malformed",
                            task_id = %self.task_id,
                            name = %raw.event,
                            error = %err
                        );
                    }
                },
                Some(TransportSignal::Reconnecting) => {
                    let class = classify(
                        CloseSignal::Reconnecting,
                        self.shared.has_payload.load(Ordering::SeqCst),
                    );
                    debug!(event = "stream_transport_reconnecting", task_id = %self.task_id, class = ?class);
                }
                Some(TransportSignal::Closed) | None => {
                    let class = classify(
                        CloseSignal::Terminal,
                        self.shared.has_payload.load(Ordering::SeqCst),
                    );
                    debug!(event = "stream_transport_closed", task_id = %self.task_id, class = ?class);
                    return match class {
                        FailureClass::GracefulCompletion => ConnectionEnd::Graceful,
                        FailureClass::AuthOrResourceFailure | FailureClass::TransientIgnored => {
                            ConnectionEnd::Failed
                        }
                    };
                }
            }
        }
    }

    fn mark_open(&self, opened: &mut bool) {
        if *opened {
            return;
        }
        *opened = true;
        self.shared.transition(SessionState::Open);
        let _ = self.events.send(SessionEvent::Open);
    }

    /// Closes the session as failed unless a cancel already closed it.
    fn fail(&self, reason: FailureReason, attempts: u32) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!(event = "stream_stopped_on_cancel", task_id = %self.task_id);
            return;
        }
        self.shared.transition(SessionState::ClosedFailed);
        let message = failure_message(&self.task_id, reason, attempts);
        info!(
            event = "stream_closed_failed",
            task_id = %self.task_id,
            attempts,
            reason = ?reason
        );
        let _ = self.events.send(SessionEvent::Failed(StreamFailure {
            attempts,
            reason,
            message,
        }));
    }
}

fn failure_message(task_id: &str, reason: FailureReason, attempts: u32) -> String {
    let lead = match reason {
        FailureReason::AttemptsExhausted => format!(
            "event stream for task {task_id} closed without delivering any event after {attempts} reconnect attempt(s)"
        ),
        FailureReason::RenewalFailed => format!(
            "event stream for task {task_id} closed without delivering any event and the credential could not be renewed (after {attempts} reconnect attempt(s))"
        ),
    };
    format!(
        "{lead}; possible causes: expired credential, missing or expired task, unstable network"
    )
}

fn parse_base_url(base_url: &str) -> Result<Url, StreamError> {
    let invalid = |reason: String| StreamError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason,
    };
    let url = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("url cannot carry a path".to_string()));
    }
    Ok(url)
}

fn build_subscription_url(
    base: &Url,
    task_id: &str,
    client_id: &str,
    credential: Option<&Credential>,
) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(STREAM_PATH).push(task_id);
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("user_id", client_id);
        if let Some(credential) = credential {
            query.append_pair("access_token", credential.expose());
        }
    }
    url
}
