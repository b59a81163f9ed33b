//! Backend seam: exchanges identity proofs for session credentials and
//! resolves the application identity behind a credential.

use std::fmt;

use async_trait::async_trait;

use super::principal::ResolvedIdentity;
use super::proof::{IdentityProof, SessionCredential};

/// Result of a successful proof exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub credential: SessionCredential,
    pub identity: ResolvedIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// 401/403: the backend refused the credential or proof.
    Rejected { status: u16, message: String },
    /// Any other non-success status.
    Status { status: u16, message: String },
    /// Connection refused, DNS, timeout.
    Unreachable(String),
    /// Success status but the body did not decode.
    Malformed(String),
}

impl BackendError {
    pub fn is_rejection(&self) -> bool { matches!(self, BackendError::Rejected { .. }) }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Rejected { status, .. } | BackendError::Status { status, .. } => Some(*status),
            BackendError::Unreachable(_) | BackendError::Malformed(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BackendError::Rejected { message, .. } | BackendError::Status { message, .. } => message,
            BackendError::Unreachable(m) | BackendError::Malformed(m) => m,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 401 || status == 403 {
            BackendError::Rejected { status, message }
        } else {
            BackendError::Status { status, message }
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(s) => write!(f, "HTTP {}: {}", s, self.message()),
            None => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for BackendError {}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// `POST /auth/<provider>` with the proof.
    async fn exchange(&self, proof: &IdentityProof) -> BackendResult<Exchange>;

    /// `GET /auth/me`.
    async fn fetch_identity(&self, credential: &SessionCredential) -> BackendResult<ResolvedIdentity>;

    /// `POST /auth/refresh`: reissues the credential wholesale.
    async fn reissue(&self, credential: &SessionCredential) -> BackendResult<SessionCredential>;

    /// `PUT /auth/change-password`, backed by a freshly minted proof.
    async fn change_password(
        &self,
        credential: &SessionCredential,
        fresh_proof: &IdentityProof,
        new_password: &str,
    ) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_rejections() {
        assert!(BackendError::from_status(401, "Token expired.").is_rejection());
        assert!(BackendError::from_status(403, "Registration is currently disabled").is_rejection());
        assert!(!BackendError::from_status(500, "oops").is_rejection());
        assert_eq!(BackendError::from_status(404, "User not found").status(), Some(404));
        assert_eq!(BackendError::Unreachable("refused".into()).status(), None);
    }
}
