//! Identity-provider seam. The provider authenticates end users and mints
//! short-lived identity proofs; it never decides whether the app is logged in.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::proof::IdentityProof;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider_id", rename_all = "snake_case")]
pub enum SignInMethod {
    Password,
    Federated(String),
}

impl SignInMethod {
    /// Map a provider id such as `password` or `google.com`.
    pub fn from_provider_id(id: &str) -> Self {
        if id == "password" { SignInMethod::Password } else { SignInMethod::Federated(id.to_string()) }
    }
}

/// The provider's view of a signed-in user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub sign_in_methods: Vec<SignInMethod>,
    /// Opaque provider handle used to mint fresh proofs (e.g. a refresh token).
    #[serde(default)]
    pub refresh_handle: Option<String>,
}

impl ProviderIdentity {
    pub fn new(uid: impl Into<String>, email: Option<String>, methods: Vec<SignInMethod>) -> Self {
        Self { uid: uid.into(), email, display_name: None, sign_in_methods: methods, refresh_handle: None }
    }

    pub fn has_password_method(&self) -> bool {
        self.sign_in_methods.iter().any(|m| *m == SignInMethod::Password)
    }
}

impl fmt::Debug for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderIdentity")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("sign_in_methods", &self.sign_in_methods)
            .field("refresh_handle", &self.refresh_handle.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorCode {
    EmailExists,
    WeakPassword,
    WrongPassword,
    InvalidCredential,
    InvalidEmail,
    UserNotFound,
    UserDisabled,
    TooManyRequests,
    TokenExpired,
    PopupCancelled,
    Network,
    Other(String),
}

impl ProviderErrorCode {
    /// Map an Identity Toolkit error message (`CODE` or `CODE : detail`).
    pub fn from_wire(raw: &str) -> Self {
        let code = raw.split(':').next().unwrap_or("").trim();
        match code {
            "EMAIL_EXISTS" => ProviderErrorCode::EmailExists,
            "WEAK_PASSWORD" => ProviderErrorCode::WeakPassword,
            "INVALID_PASSWORD" => ProviderErrorCode::WrongPassword,
            "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => ProviderErrorCode::InvalidCredential,
            "INVALID_EMAIL" | "MISSING_EMAIL" => ProviderErrorCode::InvalidEmail,
            "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => ProviderErrorCode::UserNotFound,
            "USER_DISABLED" => ProviderErrorCode::UserDisabled,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => ProviderErrorCode::TooManyRequests,
            "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "INVALID_ID_TOKEN" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
                ProviderErrorCode::TokenExpired
            }
            other => ProviderErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProviderErrorCode::EmailExists => "email_exists",
            ProviderErrorCode::WeakPassword => "weak_password",
            ProviderErrorCode::WrongPassword => "wrong_password",
            ProviderErrorCode::InvalidCredential => "invalid_credential",
            ProviderErrorCode::InvalidEmail => "invalid_email",
            ProviderErrorCode::UserNotFound => "user_not_found",
            ProviderErrorCode::UserDisabled => "user_disabled",
            ProviderErrorCode::TooManyRequests => "too_many_requests",
            ProviderErrorCode::TokenExpired => "token_expired",
            ProviderErrorCode::PopupCancelled => "popup_cancelled",
            ProviderErrorCode::Network => "network",
            ProviderErrorCode::Other(code) => code.as_str(),
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ProviderErrorCode::EmailExists => "This email is already registered",
            ProviderErrorCode::WeakPassword => "Password should be at least 6 characters",
            ProviderErrorCode::WrongPassword | ProviderErrorCode::InvalidCredential => "Invalid email or password",
            ProviderErrorCode::InvalidEmail => "Invalid email address",
            ProviderErrorCode::UserNotFound => "No account found with this email",
            ProviderErrorCode::UserDisabled => "This account has been disabled",
            ProviderErrorCode::TooManyRequests => "Too many attempts. Please try again later",
            ProviderErrorCode::TokenExpired => "Your sign-in has expired. Please sign in again",
            ProviderErrorCode::PopupCancelled => "Sign-in was cancelled",
            ProviderErrorCode::Network => "Network error. Please check your connection",
            ProviderErrorCode::Other(_) => "Authentication failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Error carrying the code's human message.
    pub fn from_code(code: ProviderErrorCode) -> Self {
        let message = code.default_message().to_string();
        Self { code, message }
    }

    pub fn cancelled() -> Self { Self::from_code(ProviderErrorCode::PopupCancelled) }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ProviderResult<ProviderIdentity>;

    async fn sign_up_with_password(&self, email: &str, password: &str) -> ProviderResult<ProviderIdentity>;

    async fn set_display_name(&self, identity: &ProviderIdentity, name: &str) -> ProviderResult<ProviderIdentity>;

    /// Interactive federated flow; fails with `PopupCancelled` when dismissed.
    async fn sign_in_with_federated_popup(&self) -> ProviderResult<ProviderIdentity>;

    /// Best effort. Callers never wait on this for local state.
    async fn sign_out(&self, identity: &ProviderIdentity) -> ProviderResult<()>;

    /// Always requests a new proof from the provider.
    async fn mint_identity_proof(&self, identity: &ProviderIdentity) -> ProviderResult<IdentityProof>;

    async fn reauthenticate_with_password(&self, identity: &ProviderIdentity, password: &str) -> ProviderResult<()>;

    /// Identity change stream. The current value is observed first.
    fn subscribe(&self) -> watch::Receiver<Option<ProviderIdentity>>;
}

/// Credential returned by an external IdP for federated sign-in.
#[derive(Clone)]
pub struct IdpCredential {
    pub provider_id: String,
    pub id_token: String,
}

/// Drives the interactive part of federated sign-in (browser popup, pasted token, ...).
#[async_trait]
pub trait FederatedPrompt: Send + Sync {
    /// `Ok(None)` means the user dismissed the flow.
    async fn obtain_credential(&self) -> ProviderResult<Option<IdpCredential>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_identity_toolkit_codes() {
        assert_eq!(ProviderErrorCode::from_wire("EMAIL_EXISTS"), ProviderErrorCode::EmailExists);
        assert_eq!(
            ProviderErrorCode::from_wire("WEAK_PASSWORD : Password should be at least 6 characters"),
            ProviderErrorCode::WeakPassword
        );
        assert_eq!(ProviderErrorCode::from_wire("INVALID_PASSWORD"), ProviderErrorCode::WrongPassword);
        assert_eq!(ProviderErrorCode::from_wire("INVALID_LOGIN_CREDENTIALS"), ProviderErrorCode::InvalidCredential);
        assert_eq!(ProviderErrorCode::from_wire("EMAIL_NOT_FOUND"), ProviderErrorCode::UserNotFound);
        assert_eq!(ProviderErrorCode::from_wire("SOMETHING_NEW"), ProviderErrorCode::Other("SOMETHING_NEW".into()));
    }

    #[test]
    fn password_method_detection() {
        let fed = ProviderIdentity::new("u1", None, vec![SignInMethod::from_provider_id("google.com")]);
        assert!(!fed.has_password_method());
        let both = ProviderIdentity::new(
            "u2",
            Some("a@b.com".into()),
            vec![SignInMethod::Federated("google.com".into()), SignInMethod::from_provider_id("password")],
        );
        assert!(both.has_password_method());
    }

    #[test]
    fn debug_redacts_refresh_handle() {
        let mut id = ProviderIdentity::new("u1", None, vec![SignInMethod::Password]);
        id.refresh_handle = Some("AMf-secret-refresh".into());
        assert!(!format!("{:?}", id).contains("AMf-secret"));
    }
}
