//! Short-lived bearer credential with a client-decoded expiry.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Opaque access credential.
///
/// The expiry is read from the token's `exp` claim without verifying the
/// signature. Tokens that are not JWT-shaped, or that carry no numeric
/// `exp`, have no usable expiry.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Option<u64>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token);
        Self {
            token: SecretString::new(token),
            expires_at,
        }
    }

    /// Raw bearer string. Keep it out of logs.
    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }

    /// `Authorization` header value for this credential.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.expose())
    }

    /// Expiry as unix seconds, if the token carries one.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// True when the credential expires at or before `now + threshold`, or
    /// when no expiry can be read from it.
    pub fn expires_within(&self, threshold: Duration, now: u64) -> bool {
        match self.expires_at {
            Some(exp) => exp <= now.saturating_add(threshold.as_secs()),
            None => true,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Deserialize)]
struct ExpiryClaim {
    #[serde(default)]
    exp: Option<serde_json::Number>,
}

fn decode_expiry(token: &str) -> Option<u64> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let raw = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&raw).ok()?;
    let exp = claim.exp?;

    exp.as_u64()
        .or_else(|| exp.as_f64().filter(|value| *value >= 0.0).map(|value| value as u64))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    use super::Credential;

    /// Builds an unsigned JWT-shaped token with the given payload.
    pub(crate) fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    pub(crate) fn token_expiring_at(exp: u64) -> String {
        token_with_payload(&format!(r#"{{"sub":"1","type":"access","exp":{exp}}}"#))
    }

    #[test]
    fn reads_exp_claim() {
        let credential = Credential::new(token_expiring_at(1_700_000_900));
        assert_eq!(credential.expires_at(), Some(1_700_000_900));
    }

    #[test]
    fn padded_payload_is_accepted() {
        let token = token_expiring_at(42);
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1].push_str("==");
        let credential = Credential::new(parts.join("."));
        assert_eq!(credential.expires_at(), Some(42));
    }

    #[test]
    fn malformed_token_has_no_expiry() {
        assert_eq!(Credential::new("not-a-jwt").expires_at(), None);
        assert_eq!(Credential::new("a.%%%.c").expires_at(), None);
        assert_eq!(
            Credential::new(token_with_payload(r#"{"sub":"1"}"#)).expires_at(),
            None
        );
        assert_eq!(
            Credential::new(token_with_payload(r#"{"exp":"soon"}"#)).expires_at(),
            None
        );
    }

    #[test]
    fn threshold_comparison() {
        let now = 1_000_000;
        let threshold = Duration::from_secs(300);

        let soon = Credential::new(token_expiring_at(now + 120));
        assert!(soon.expires_within(threshold, now));

        let later = Credential::new(token_expiring_at(now + 600));
        assert!(!later.expires_within(threshold, now));

        let opaque = Credential::new("opaque");
        assert!(opaque.expires_within(threshold, now));
    }

    #[test]
    fn debug_output_redacts_token() {
        let credential = Credential::new("super-secret");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn bearer_header_value() {
        assert_eq!(Credential::new("abc").bearer(), "Bearer abc");
    }
}
