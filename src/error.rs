//! Session error model and classification helpers.
//! Provider and backend failures are classified into these kinds at the
//! `SessionManager` boundary; callers decide how to present them.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionError {
    /// The identity provider refused the request (bad credentials, duplicate account, weak password).
    #[error("{code}: {message}")]
    ProviderRejected { code: String, message: String },
    /// The interactive federated flow was dismissed by the user.
    #[error("cancelled: sign-in was cancelled")]
    Cancelled,
    /// Proof-to-credential exchange failed; nothing was persisted.
    #[error("exchange_failed: {message}")]
    ExchangeFailed { status: Option<u16>, message: String },
    #[error("reauth_not_available: password change is not available for this sign-in method")]
    ReauthNotAvailable,
    #[error("not_signed_in: no user is currently signed in")]
    NotSignedIn,
    /// Fetching the resolved identity failed while the credential was believed valid.
    #[error("resolution_failed: {message}")]
    ResolutionFailed { message: String },
    /// A later user intent (logout, another login) won; the result was discarded.
    #[error("superseded: a newer session operation replaced this one")]
    Superseded,
    #[error("password_change_failed: {message}")]
    PasswordChangeFailed { status: Option<u16>, message: String },
    #[error("invalid_input: {0}")]
    InvalidInput(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl SessionError {
    pub fn code_str(&self) -> &str {
        match self {
            SessionError::ProviderRejected { code, .. } => code.as_str(),
            SessionError::Cancelled => "cancelled",
            SessionError::ExchangeFailed { .. } => "exchange_failed",
            SessionError::ReauthNotAvailable => "reauth_not_available",
            SessionError::NotSignedIn => "not_signed_in",
            SessionError::ResolutionFailed { .. } => "resolution_failed",
            SessionError::Superseded => "superseded",
            SessionError::PasswordChangeFailed { .. } => "password_change_failed",
            SessionError::InvalidInput(_) => "invalid_input",
            SessionError::Storage(_) => "storage",
        }
    }

    pub fn message(&self) -> String {
        match self {
            SessionError::ProviderRejected { message, .. }
            | SessionError::ExchangeFailed { message, .. }
            | SessionError::ResolutionFailed { message }
            | SessionError::PasswordChangeFailed { message, .. } => message.clone(),
            SessionError::InvalidInput(m) | SessionError::Storage(m) => m.clone(),
            SessionError::Cancelled => "Sign-in was cancelled".into(),
            SessionError::ReauthNotAvailable => "Password change is not available for federated sign-in accounts".into(),
            SessionError::NotSignedIn => "No user is currently signed in".into(),
            SessionError::Superseded => "A newer session operation replaced this one".into(),
        }
    }

    /// False for outcomes the UI should swallow quietly (a dismissed popup, a stale call).
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SessionError::Cancelled | SessionError::Superseded)
    }

    /// Transport-level failures that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::ResolutionFailed { .. } => true,
            SessionError::ExchangeFailed { status, .. } => status.is_none(),
            _ => false,
        }
    }

    pub fn provider<S: Into<String>>(code: S, msg: S) -> Self {
        SessionError::ProviderRejected { code: code.into(), message: msg.into() }
    }
    pub fn exchange<S: Into<String>>(status: Option<u16>, msg: S) -> Self {
        SessionError::ExchangeFailed { status, message: msg.into() }
    }
    pub fn resolution<S: Into<String>>(msg: S) -> Self {
        SessionError::ResolutionFailed { message: msg.into() }
    }
    pub fn storage<S: Into<String>>(msg: S) -> Self { SessionError::Storage(msg.into()) }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
