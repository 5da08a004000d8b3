//! Async Rust client for the studio generation API.
//!
//! The crate is organized by transport surface:
//! - `api`: request/response calls with one-shot renewal on 401.
//! - `auth`: credential value, storage, and single-flight renewal.
//! - `stream`: task event sessions over server-sent events.
//! - `app`: wiring of one renewal coordinator into every consumer.
//! - `config` / `retry`: options, defaults, backoff, and timeouts.

/// Request/response API client and endpoint groups.
pub mod api;
/// Application facade.
pub mod app;
/// Credentials, storage, and renewal.
pub mod auth;
/// Client options and defaults.
pub mod config;
/// Backoff, reconnect budget, and timeout helpers.
pub mod retry;
/// Task event streams.
pub mod stream;

pub use app::{ClientBuildError, StudioClient};
pub use config::{ClientOptions, StreamOptions};
