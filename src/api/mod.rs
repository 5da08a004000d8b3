//! Request/response API surface.
//!
//! - `client`: authenticated transport with one-shot renewal on 401.
//! - `auth`: login, registration and logout.
//! - `tasks`: outline and image generation task endpoints.

/// Authentication endpoints.
pub mod auth;
/// Renewing request client.
pub mod client;
/// Generation task endpoints.
pub mod tasks;

pub use auth::{AuthApi, AuthSession, LoginRequest, RegisterRequest};
pub use client::{ApiClient, ApiError, ApiRequest, ApiResponse};
pub use tasks::{RetryBatch, RetrySummary, TaskAccepted, TasksApi};
