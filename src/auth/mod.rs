//! Credentials: the value, where it is kept, and how it is renewed.
//!
//! - `credential`: bearer token with a client-decoded expiry.
//! - `store`: synchronous storage, in memory or on disk.
//! - `renewal`: single-flight renewal and the provider interface consumed by
//!   the networking layer.

/// Access credential type.
pub mod credential;
/// Single-flight renewal coordinator.
pub mod renewal;
/// Credential storage backends.
pub mod store;

pub use credential::Credential;
pub use renewal::{
    preventive_renew, CredentialProvider, RenewalCoordinator, RenewalError, RenewalOutcome,
};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};
