//! Task event streams.
//!
//! - `sse`: `text/event-stream` framing.
//! - `client`: transport capability and the SSE transport.
//! - `proto`: payload events pushed for generation tasks.
//! - `classify`: close-signal classification.
//! - `session`: session state machine with renew-and-reconnect.

/// Close-signal classification.
pub mod classify;
/// Push-stream transport capability and SSE implementation.
pub mod client;
/// Task event payloads.
pub mod proto;
/// Session worker, events, and cancellation handles.
pub mod session;
/// Server-sent events decoder.
pub mod sse;

pub use client::{PushStreamTransport, SseTransport, TransportSignal};
pub use proto::{FinishEvent, PageEvent, PageStatus, ServerEvent};
pub use session::{
    FailureReason, SessionEvent, SessionHandle, SessionState, StreamClient, StreamError,
    StreamFailure, StreamSession,
};
