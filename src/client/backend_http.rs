use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::config::SessionConfig;
use crate::identity::{
    BackendError, BackendResult, Exchange, IdentityProof, ResolvedIdentity, SessionBackend, SessionCredential,
};

#[derive(Deserialize)]
struct ExchangeBody {
    token: String,
    user: ResolvedIdentity,
}

#[derive(Deserialize)]
struct UserBody {
    user: ResolvedIdentity,
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

/// reqwest client for the backend's `/auth/*` routes.
#[derive(Clone)]
pub struct HttpBackend {
    base: String,
    provider_path: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base: &str, provider_path: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base).context("invalid API base URL")?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            provider_path: provider_path.trim_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(cfg: &SessionConfig) -> Result<Self> {
        Self::new(&cfg.api_url, &cfg.auth_provider_path, cfg.http_timeout)
    }

    pub fn base(&self) -> &str { &self.base }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        let full = format!("{}/{}", self.base, path);
        Url::parse(&full).map_err(|e| BackendError::Malformed(format!("bad endpoint {}: {}", full, e)))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> BackendResult<T> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::error_from(resp).await);
        }
        resp.json::<T>().await.map_err(|e| BackendError::Malformed(format!("unexpected response body: {}", e)))
    }

    /// Build a classified error from a non-success response. The backend puts
    /// the human message under `error` (or `message`).
    async fn error_from(resp: reqwest::Response) -> BackendError {
        let status = resp.status().as_u16();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        let message = v
            .get("error")
            .and_then(|e| e.as_str())
            .or_else(|| v.get("message").and_then(|m| m.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));
        BackendError::from_status(status, message)
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Unreachable(format!("backend unreachable: {}", e))
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn exchange(&self, proof: &IdentityProof) -> BackendResult<Exchange> {
        let url = self.endpoint(&format!("auth/{}", self.provider_path))?;
        debug!(target: "podium_auth", "POST {} proof={}", url, proof.redacted());
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "firebaseToken": proof.as_str() }))
            .send()
            .await
            .map_err(transport)?;
        let body: ExchangeBody = Self::read_json(resp).await?;
        if body.token.is_empty() {
            return Err(BackendError::Malformed("exchange returned an empty token".into()));
        }
        Ok(Exchange { credential: SessionCredential::new(body.token), identity: body.user })
    }

    async fn fetch_identity(&self, credential: &SessionCredential) -> BackendResult<ResolvedIdentity> {
        let url = self.endpoint("auth/me")?;
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(transport)?;
        let body: UserBody = Self::read_json(resp).await?;
        Ok(body.user)
    }

    async fn reissue(&self, credential: &SessionCredential) -> BackendResult<SessionCredential> {
        let url = self.endpoint("auth/refresh")?;
        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(transport)?;
        let body: TokenBody = Self::read_json(resp).await?;
        Ok(SessionCredential::new(body.token))
    }

    async fn change_password(
        &self,
        credential: &SessionCredential,
        fresh_proof: &IdentityProof,
        new_password: &str,
    ) -> BackendResult<()> {
        let url = self.endpoint("auth/change-password")?;
        let resp = self
            .client
            .put(url)
            .header(AUTHORIZATION, credential.bearer())
            .json(&serde_json::json!({ "firebaseToken": fresh_proof.as_str(), "newPassword": new_password }))
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(())
    }
}
