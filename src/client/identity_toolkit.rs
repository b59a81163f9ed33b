//! Identity-Toolkit style REST identity provider.
//!
//! Password flows go through `accounts:*` endpoints; fresh identity proofs are
//! minted from the secure-token endpoint with the stored refresh token, so a
//! proof is never reused. There is no server-side sign-out: signing out drops
//! the local refresh token and notifies subscribers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::identity::{
    FederatedPrompt, IdentityProof, IdentityProvider, ProviderError, ProviderErrorCode, ProviderIdentity,
    ProviderResult, SignInMethod,
};
use crate::storage::{CredentialStore, PROVIDER_IDENTITY_KEY};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecureTokenResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    #[serde(default)]
    provider_user_info: Vec<ProviderUserInfo>,
    #[serde(default)]
    password_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderUserInfo {
    provider_id: String,
}

/// Map an error body `{"error": {"message": "CODE : detail"}}`.
pub fn provider_error_from_body(status: u16, body: &serde_json::Value) -> ProviderError {
    let raw = body
        .get("error")
        .and_then(|e| e.get("message").and_then(|m| m.as_str()).or_else(|| e.as_str()))
        .unwrap_or("");
    if raw.is_empty() {
        return ProviderError::new(ProviderErrorCode::Other(format!("http_{}", status)), format!("HTTP {}", status));
    }
    let code = ProviderErrorCode::from_wire(raw);
    match &code {
        ProviderErrorCode::Other(_) => ProviderError::new(code, raw.to_string()),
        _ => ProviderError::from_code(code),
    }
}

fn network(e: reqwest::Error) -> ProviderError {
    ProviderError::new(ProviderErrorCode::Network, format!("identity provider unreachable: {}", e))
}

pub struct IdentityToolkitProvider {
    base: String,
    token_url: String,
    api_key: String,
    request_uri: String,
    client: reqwest::Client,
    prompt: Option<Arc<dyn FederatedPrompt>>,
    store: Option<Arc<dyn CredentialStore>>,
    current: watch::Sender<Option<ProviderIdentity>>,
    /// id_token from the last password re-authentication, keyed by uid; spent by the next mint.
    reauth_proof: Mutex<Option<(String, IdentityProof)>>,
}

impl IdentityToolkitProvider {
    pub fn new(base: &str, token_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base).context("invalid identity provider URL")?;
        Url::parse(token_url).context("invalid identity provider token URL")?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let (current, _) = watch::channel(None);
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            token_url: token_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            request_uri: "http://localhost".to_string(),
            client,
            prompt: None,
            store: None,
            current,
            reauth_proof: Mutex::new(None),
        })
    }

    pub fn from_config(cfg: &SessionConfig) -> Result<Self> {
        Self::new(&cfg.idp_url, &cfg.idp_token_url, &cfg.idp_api_key, cfg.http_timeout)
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn FederatedPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Persist the signed-in user in `store` and restore it now, so the
    /// provider still reports it after a restart.
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        match store.get(PROVIDER_IDENTITY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<ProviderIdentity>(&raw) {
                Ok(identity) => {
                    debug!(target: "podium_auth", "restored provider identity uid={}", identity.uid);
                    self.current.send_replace(Some(identity));
                }
                Err(e) => warn!(target: "podium_auth", "ignoring unreadable provider identity: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!(target: "podium_auth", "provider identity store unreadable: {}", e),
        }
        self.store = Some(store);
        self
    }

    pub fn current(&self) -> Option<ProviderIdentity> { self.current.borrow().clone() }

    fn set_current(&self, identity: Option<ProviderIdentity>) {
        if let Some(store) = &self.store {
            let res = match &identity {
                Some(id) => serde_json::to_string(id)
                    .map_err(|e| crate::error::SessionError::storage(e.to_string()))
                    .and_then(|raw| store.put(PROVIDER_IDENTITY_KEY, &raw)),
                None => store.remove(PROVIDER_IDENTITY_KEY),
            };
            if let Err(e) = res {
                warn!(target: "podium_auth", "failed to persist provider identity: {}", e);
            }
        }
        self.current.send_replace(identity);
    }

    async fn post_account(&self, method: &str, body: serde_json::Value) -> ProviderResult<serde_json::Value> {
        let url = format!("{}/accounts:{}?key={}", self.base, method, urlencoding::encode(&self.api_key));
        let resp = self.client.post(url).json(&body).send().await.map_err(network)?;
        let status = resp.status();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            return Err(provider_error_from_body(status.as_u16(), &v));
        }
        Ok(v)
    }

    fn decode<T: for<'de> Deserialize<'de>>(v: serde_json::Value) -> ProviderResult<T> {
        serde_json::from_value(v).map_err(|e| {
            ProviderError::new(ProviderErrorCode::Other("malformed_response".into()), format!("unexpected provider response: {}", e))
        })
    }

    /// Linked sign-in methods for the account behind `id_token`.
    async fn lookup_methods(&self, id_token: &str) -> ProviderResult<Vec<SignInMethod>> {
        let v = self.post_account("lookup", serde_json::json!({ "idToken": id_token })).await?;
        let lookup: LookupResponse = Self::decode(v)?;
        let Some(user) = lookup.users.into_iter().next() else { return Ok(Vec::new()) };
        let mut methods: Vec<SignInMethod> =
            user.provider_user_info.iter().map(|p| SignInMethod::from_provider_id(&p.provider_id)).collect();
        if user.password_hash.is_some() && !methods.contains(&SignInMethod::Password) {
            methods.push(SignInMethod::Password);
        }
        Ok(methods)
    }

    async fn identity_from(&self, acct: AccountResponse, fallback: SignInMethod) -> ProviderIdentity {
        let methods = match acct.id_token.as_deref() {
            Some(tok) => match self.lookup_methods(tok).await {
                Ok(m) if !m.is_empty() => m,
                Ok(_) => vec![fallback],
                Err(e) => {
                    debug!(target: "podium_auth", "lookup failed, assuming {:?}: {}", fallback, e);
                    vec![fallback]
                }
            },
            None => vec![fallback],
        };
        ProviderIdentity {
            uid: acct.local_id,
            email: acct.email,
            display_name: acct.display_name,
            sign_in_methods: methods,
            refresh_handle: acct.refresh_token,
        }
    }

    async fn refresh_id_token(&self, identity: &ProviderIdentity) -> ProviderResult<SecureTokenResponse> {
        let refresh = identity
            .refresh_handle
            .as_deref()
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::TokenExpired))?;
        let url = format!("{}/token?key={}", self.token_url, urlencoding::encode(&self.api_key));
        let resp = self
            .client
            .post(url)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh)])
            .send()
            .await
            .map_err(network)?;
        let status = resp.status();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            return Err(provider_error_from_body(status.as_u16(), &v));
        }
        Self::decode(v)
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkitProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ProviderResult<ProviderIdentity> {
        let v = self
            .post_account(
                "signInWithPassword",
                serde_json::json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        let identity = self.identity_from(Self::decode(v)?, SignInMethod::Password).await;
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up_with_password(&self, email: &str, password: &str) -> ProviderResult<ProviderIdentity> {
        let v = self
            .post_account("signUp", serde_json::json!({ "email": email, "password": password, "returnSecureToken": true }))
            .await?;
        let acct: AccountResponse = Self::decode(v)?;
        let identity = ProviderIdentity {
            uid: acct.local_id,
            email: acct.email,
            display_name: acct.display_name,
            sign_in_methods: vec![SignInMethod::Password],
            refresh_handle: acct.refresh_token,
        };
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn set_display_name(&self, identity: &ProviderIdentity, name: &str) -> ProviderResult<ProviderIdentity> {
        let tokens = self.refresh_id_token(identity).await?;
        let v = self
            .post_account(
                "update",
                serde_json::json!({ "idToken": tokens.id_token, "displayName": name, "returnSecureToken": true }),
            )
            .await?;
        let acct: AccountResponse = Self::decode(v)?;
        let mut updated = identity.clone();
        updated.display_name = acct.display_name.or_else(|| Some(name.to_string()));
        if let Some(r) = acct.refresh_token.or(tokens.refresh_token) {
            updated.refresh_handle = Some(r);
        }
        self.set_current(Some(updated.clone()));
        Ok(updated)
    }

    async fn sign_in_with_federated_popup(&self) -> ProviderResult<ProviderIdentity> {
        let Some(prompt) = &self.prompt else {
            return Err(ProviderError::new(
                ProviderErrorCode::Other("operation_not_allowed".into()),
                "Federated sign-in is not configured",
            ));
        };
        let Some(cred) = prompt.obtain_credential().await? else {
            return Err(ProviderError::cancelled());
        };
        let post_body = format!(
            "id_token={}&providerId={}",
            urlencoding::encode(&cred.id_token),
            urlencoding::encode(&cred.provider_id)
        );
        let v = self
            .post_account(
                "signInWithIdp",
                serde_json::json!({
                    "postBody": post_body,
                    "requestUri": self.request_uri,
                    "returnSecureToken": true,
                    "returnIdpCredential": true,
                }),
            )
            .await?;
        let fallback = SignInMethod::Federated(cred.provider_id.clone());
        let identity = self.identity_from(Self::decode(v)?, fallback).await;
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self, identity: &ProviderIdentity) -> ProviderResult<()> {
        let is_current = self.current.borrow().as_ref().map(|c| c.uid == identity.uid).unwrap_or(false);
        if is_current {
            self.set_current(None);
        }
        Ok(())
    }

    async fn mint_identity_proof(&self, identity: &ProviderIdentity) -> ProviderResult<IdentityProof> {
        let reauthed = self.reauth_proof.lock().take();
        if let Some((uid, proof)) = reauthed {
            if uid == identity.uid {
                return Ok(proof);
            }
        }
        let tokens = self.refresh_id_token(identity).await?;
        Ok(IdentityProof::new(tokens.id_token))
    }

    async fn reauthenticate_with_password(&self, identity: &ProviderIdentity, password: &str) -> ProviderResult<()> {
        let email = identity
            .email
            .as_deref()
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::InvalidCredential))?;
        let v = self
            .post_account(
                "signInWithPassword",
                serde_json::json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        let acct: AccountResponse = Self::decode(v)?;
        if acct.local_id != identity.uid {
            return Err(ProviderError::new(ProviderErrorCode::InvalidCredential, "Credential belongs to a different user"));
        }
        *self.reauth_proof.lock() = acct.id_token.map(|tok| (acct.local_id.clone(), IdentityProof::new(tok)));
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<ProviderIdentity>> { self.current.subscribe() }
}
