use std::fmt;

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

fn redact(token: &str) -> String {
    // first 6 chars are enough to correlate log lines
    let head: String = token.chars().take(6).collect();
    format!("{}…({} chars)", head, token.chars().count())
}

/// Short-lived token minted by the identity provider. Consumed once by the
/// backend exchange or a sensitive call; never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityProof(String);

impl IdentityProof {
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Expiry from the `exp` claim when the proof is a JWT. No signature check.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let payload = self.0.split('.').nth(1)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let exp = claims.get("exp")?.as_i64()?;
        Utc.timestamp_opt(exp, 0).single()
    }

    pub fn redacted(&self) -> String { redact(&self.0) }
}

impl fmt::Debug for IdentityProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityProof({})", self.redacted())
    }
}

/// Backend-issued bearer credential. Its presence in the store is the single
/// signal for "logged in".
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn bearer(&self) -> String { format!("Bearer {}", self.0) }

    pub fn redacted(&self) -> String { redact(&self.0) }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential({})", self.redacted())
    }
}
