use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Application-level user record as returned by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub subscription: Option<Subscription>,
    #[serde(default)]
    pub is_institution_user: bool,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_password_provider: bool,
}

impl ResolvedIdentity {
    pub fn plan(&self) -> Option<&str> {
        self.subscription.as_ref().and_then(|s| s.plan.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unknown,
    Loading,
    Authenticated(ResolvedIdentity),
    Unauthenticated,
}

impl SessionState {
    /// `Unknown` and `Loading` both mean "do not redirect yet".
    pub fn is_resolved(&self) -> bool {
        matches!(self, SessionState::Authenticated(_) | SessionState::Unauthenticated)
    }

    pub fn is_authenticated(&self) -> bool { matches!(self, SessionState::Authenticated(_)) }

    pub fn identity(&self) -> Option<&ResolvedIdentity> {
        match self {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Loading => "loading",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }
}
