//! Session manager: the single owner of "is there a usable session, and who is it".
//!
//! Two sources update independently: the identity provider (sign-in state,
//! background changes) and the persisted session credential issued by the
//! backend. The credential is authoritative; provider state only triggers an
//! exchange or a resolution fetch.
//!
//! Every explicit intent (login, register, logout, credential rejection) bumps
//! a generation counter. Async work captures the generation when it starts and
//! commits only if it is still current, so the last user intent wins even if a
//! slower call resolves afterwards.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::storage::{CredentialStore, CREDENTIAL_KEY};
use crate::tprintln;

use super::backend::{BackendError, Exchange, SessionBackend};
use super::principal::{ResolvedIdentity, SessionState};
use super::proof::{IdentityProof, SessionCredential};
use super::provider::{IdentityProvider, ProviderError, ProviderErrorCode, ProviderIdentity};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// At bootstrap, exchange a provider identity for a credential when none is persisted.
    pub exchange_on_bootstrap: bool,
    pub password_min_length: usize,
}

impl Default for SessionOptions {
    fn default() -> Self { Self { exchange_on_bootstrap: true, password_min_length: 6 } }
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    credential: Option<SessionCredential>,
    provider_identity: Option<ProviderIdentity>,
    bootstrapped: bool,
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn SessionBackend>,
    store: Arc<dyn CredentialStore>,
    options: SessionOptions,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

fn classify_provider(err: ProviderError) -> SessionError {
    match err.code {
        ProviderErrorCode::PopupCancelled => SessionError::Cancelled,
        code => SessionError::ProviderRejected { code: code.as_str().to_string(), message: err.message },
    }
}

fn classify_exchange(err: BackendError) -> SessionError {
    SessionError::ExchangeFailed { status: err.status(), message: err.message().to_string() }
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::with_options(provider, backend, store, SessionOptions::default())
    }

    pub fn with_options(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn CredentialStore>,
        options: SessionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unknown);
        Self { provider, backend, store, options, inner: Mutex::new(Inner::default()), state_tx }
    }

    // ---- reads -------------------------------------------------------------

    pub fn state(&self) -> SessionState { self.state_tx.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> { self.state_tx.subscribe() }

    pub fn resolved_identity(&self) -> Option<ResolvedIdentity> { self.state_tx.borrow().identity().cloned() }

    /// Credential for the API layer to attach as a bearer.
    pub fn credential(&self) -> Option<SessionCredential> { self.inner.lock().credential.clone() }

    pub fn provider_identity(&self) -> Option<ProviderIdentity> { self.inner.lock().provider_identity.clone() }

    pub fn generation(&self) -> u64 { self.inner.lock().generation }

    pub fn options(&self) -> &SessionOptions { &self.options }

    /// Wait until the first resolution completes (neither Unknown nor Loading).
    pub async fn wait_until_resolved(&self) -> SessionState {
        let mut rx = self.subscribe();
        loop {
            {
                let cur = rx.borrow_and_update();
                if cur.is_resolved() {
                    return cur.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    fn publish(&self, next: SessionState) {
        self.state_tx.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            debug!(target: "podium_auth", "session.state {} -> {}", cur.label(), next.label());
            *cur = next.clone();
            true
        });
    }

    // ---- provider events ---------------------------------------------------

    /// Subscribe to provider identity changes: the first value bootstraps the
    /// session, later values are handled one at a time in arrival order.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.provider.subscribe();
        tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            this.bootstrap(initial).await;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                this.handle_provider_change(next).await;
            }
            debug!(target: "podium_auth", "provider identity stream closed");
        })
    }

    /// Resolve the initial state from the persisted credential. Runs once;
    /// the only path through `Loading`.
    pub async fn bootstrap(&self, provider_identity: Option<ProviderIdentity>) {
        let (gen, credential) = {
            let mut inner = self.inner.lock();
            if inner.bootstrapped {
                return;
            }
            inner.bootstrapped = true;
            if inner.provider_identity.is_none() {
                inner.provider_identity = provider_identity.clone();
            }
            if self.state_tx.borrow().is_resolved() {
                // an explicit login/logout already decided the state
                return;
            }
            let stored = match self.store.get(CREDENTIAL_KEY) {
                Ok(v) => v.map(SessionCredential::new),
                Err(e) => {
                    warn!(target: "podium_auth", "bootstrap: credential store unreadable, treating as logged out: {}", e);
                    None
                }
            };
            inner.credential = stored.clone();
            self.publish(SessionState::Loading);
            (inner.generation, stored)
        };

        match (credential, provider_identity) {
            (Some(cred), _) => match self.backend.fetch_identity(&cred).await {
                Ok(identity) => {
                    if self.commit_identity(gen, &cred, identity) {
                        info!(target: "podium_auth", "bootstrap: session restored");
                    }
                }
                Err(e) => {
                    warn!(target: "podium_auth", "bootstrap: persisted credential unusable ({}), clearing", e);
                    self.clear_if_current(&cred);
                }
            },
            (None, Some(pid)) if self.options.exchange_on_bootstrap => {
                let exchanged = self.exchange_for(&pid).await;
                match exchanged.and_then(|ex| self.commit_session(gen, ex, Some(pid))) {
                    Ok(_) => info!(target: "podium_auth", "bootstrap: provider identity exchanged for a session"),
                    Err(e) => {
                        warn!(target: "podium_auth", "bootstrap: exchange failed: {}", e);
                        self.settle_unauthenticated(gen);
                    }
                }
            }
            (None, _) => self.settle_unauthenticated(gen),
        }
    }

    /// React to a provider-side identity change after bootstrap. Never
    /// exchanges and never lets provider absence override a credential.
    pub async fn handle_provider_change(&self, identity: Option<ProviderIdentity>) {
        let bootstrapped = self.inner.lock().bootstrapped;
        if !bootstrapped {
            self.bootstrap(identity).await;
            return;
        }
        let (gen, credential) = {
            let mut inner = self.inner.lock();
            inner.provider_identity = identity.clone();
            (inner.generation, inner.credential.clone())
        };
        tprintln!("session.provider_change signed_in={} credential={}", identity.is_some(), credential.is_some());
        let (Some(cred), Some(_)) = (credential, identity) else { return };
        match self.backend.fetch_identity(&cred).await {
            Ok(resolved) => {
                self.commit_identity(gen, &cred, resolved);
            }
            Err(e) if e.is_rejection() => {
                warn!(target: "podium_auth", "provider change: backend rejected credential: {}", e);
                self.credential_rejected(&cred);
            }
            Err(e) => warn!(target: "podium_auth", "provider change: identity refresh failed, keeping stale identity: {}", e),
        }
    }

    // ---- explicit operations -----------------------------------------------

    pub async fn register_with_password(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> SessionResult<ResolvedIdentity> {
        let gen = self.begin_explicit("register")?;
        let created = self.provider.sign_up_with_password(email, password).await.map_err(classify_provider)?;
        let named = self.provider.set_display_name(&created, display_name).await.map_err(classify_provider)?;
        self.exchange_and_commit(gen, named).await
    }

    pub async fn login_with_password(&self, email: &str, password: &str) -> SessionResult<ResolvedIdentity> {
        let gen = self.begin_explicit("login")?;
        let pid = self.provider.sign_in_with_password(email, password).await.map_err(classify_provider)?;
        self.exchange_and_commit(gen, pid).await
    }

    /// Fails with `SessionError::Cancelled` when the user dismisses the flow.
    pub async fn login_with_federated_provider(&self) -> SessionResult<ResolvedIdentity> {
        let gen = self.begin_explicit("federated login")?;
        let pid = self.provider.sign_in_with_federated_popup().await.map_err(classify_provider)?;
        self.exchange_and_commit(gen, pid).await
    }

    /// End the session locally, then sign the provider out in the background.
    /// The returned handle only exists for callers that want to await the
    /// remote half; its outcome never affects session state.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        let identity = self.end_local_session();
        identity.and_then(|pid| self.spawn_provider_sign_out(pid))
    }

    /// Local half of logout. Returns the provider identity to sign out, if any.
    pub fn end_local_session(&self) -> Option<ProviderIdentity> {
        let identity = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.credential = None;
            if let Err(e) = self.store.remove(CREDENTIAL_KEY) {
                warn!(target: "podium_auth", "logout: failed to clear persisted credential: {}", e);
            }
            self.publish(SessionState::Unauthenticated);
            inner.provider_identity.take()
        };
        info!(target: "podium_auth", "logout: local session ended");
        identity.or_else(|| self.provider.subscribe().borrow().clone())
    }

    /// Remote half of logout: fire-and-forget provider sign-out.
    pub fn spawn_provider_sign_out(&self, identity: ProviderIdentity) -> Option<JoinHandle<()>> {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(target: "podium_auth", "logout: no async runtime, skipping provider sign-out");
            return None;
        };
        let provider = Arc::clone(&self.provider);
        Some(rt.spawn(async move {
            match provider.sign_out(&identity).await {
                Ok(()) => debug!(target: "podium_auth", "provider sign-out completed uid={}", identity.uid),
                Err(e) => warn!(target: "podium_auth", "provider sign-out failed (ignored): {}", e),
            }
        }))
    }

    /// Re-prove the current password and mint a fresh proof for one sensitive
    /// call. Leaves the credential and resolved identity untouched.
    pub async fn reauthenticate(&self, current_password: &str) -> SessionResult<IdentityProof> {
        let tracked = self.inner.lock().provider_identity.clone();
        let identity = tracked
            .or_else(|| self.provider.subscribe().borrow().clone())
            .ok_or(SessionError::NotSignedIn)?;
        if !identity.has_password_method() {
            return Err(SessionError::ReauthNotAvailable);
        }
        self.provider
            .reauthenticate_with_password(&identity, current_password)
            .await
            .map_err(|e| match e.code {
                ProviderErrorCode::WrongPassword | ProviderErrorCode::InvalidCredential => {
                    SessionError::provider("incorrect_current_password", "Current password is incorrect")
                }
                _ => classify_provider(e),
            })?;
        let proof = self.provider.mint_identity_proof(&identity).await.map_err(classify_provider)?;
        debug!(target: "podium_auth", "reauthenticate: fresh proof minted uid={}", identity.uid);
        Ok(proof)
    }

    /// Re-fetch the backend's view of the current identity. A rejection
    /// yields `Ok(None)` without logging out; transport failures surface as
    /// `ResolutionFailed` and leave the stale identity in place.
    pub async fn refresh_resolved_identity(&self) -> SessionResult<Option<ResolvedIdentity>> {
        let (gen, cred) = {
            let inner = self.inner.lock();
            match &inner.credential {
                Some(c) => (inner.generation, c.clone()),
                None => return Ok(None),
            }
        };
        match self.backend.fetch_identity(&cred).await {
            Ok(identity) => {
                if self.commit_identity(gen, &cred, identity.clone()) {
                    Ok(Some(identity))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.is_rejection() => {
                warn!(target: "podium_auth", "refresh: backend rejected credential: {}", e);
                Ok(None)
            }
            Err(e) => Err(SessionError::resolution(e.to_string())),
        }
    }

    /// Reported by the API layer when a call made with `rejected` came back 401.
    /// Returns true if the current session was ended.
    pub fn credential_rejected(&self, rejected: &SessionCredential) -> bool {
        let mut inner = self.inner.lock();
        if inner.credential.as_ref() != Some(rejected) {
            return false;
        }
        inner.generation += 1;
        inner.credential = None;
        if let Err(e) = self.store.remove(CREDENTIAL_KEY) {
            warn!(target: "podium_auth", "failed to clear rejected credential: {}", e);
        }
        self.publish(SessionState::Unauthenticated);
        info!(target: "podium_auth", "session ended: credential rejected by backend");
        true
    }

    /// Ask the backend for a new credential and replace the persisted one.
    pub async fn reissue_credential(&self) -> SessionResult<SessionCredential> {
        let (gen, cred) = {
            let inner = self.inner.lock();
            let cred = inner.credential.clone().ok_or(SessionError::NotSignedIn)?;
            (inner.generation, cred)
        };
        let fresh = match self.backend.reissue(&cred).await {
            Ok(c) => c,
            Err(e) => {
                if e.is_rejection() {
                    self.credential_rejected(&cred);
                }
                return Err(classify_exchange(e));
            }
        };
        let mut inner = self.inner.lock();
        if inner.generation != gen || inner.credential.as_ref() != Some(&cred) {
            return Err(SessionError::Superseded);
        }
        self.store.put(CREDENTIAL_KEY, fresh.as_str())?;
        inner.credential = Some(fresh.clone());
        debug!(target: "podium_auth", "credential reissued {}", fresh.redacted());
        Ok(fresh)
    }

    /// Change the provider password, backed by a freshly re-proven identity.
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> SessionResult<()> {
        if current_password.is_empty() {
            return Err(SessionError::InvalidInput("Current password is required".into()));
        }
        let min = self.options.password_min_length;
        if new_password.chars().count() < min {
            return Err(SessionError::InvalidInput(format!("Password must be at least {} characters", min)));
        }
        let cred = self.credential().ok_or(SessionError::NotSignedIn)?;
        let proof = self.reauthenticate(current_password).await?;
        self.backend
            .change_password(&cred, &proof, new_password)
            .await
            .map_err(|e| SessionError::PasswordChangeFailed { status: e.status(), message: e.message().to_string() })?;
        info!(target: "podium_auth", "password changed");
        Ok(())
    }

    // ---- commit helpers ----------------------------------------------------

    /// Start an explicit login-type operation: supersede everything in flight
    /// and drop any prior credential so a failure can only end logged out.
    fn begin_explicit(&self, op: &str) -> SessionResult<u64> {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        self.store.remove(CREDENTIAL_KEY)?;
        inner.credential = None;
        self.publish(SessionState::Unauthenticated);
        tprintln!("session.begin op={} gen={}", op, inner.generation);
        Ok(inner.generation)
    }

    async fn exchange_for(&self, pid: &ProviderIdentity) -> SessionResult<Exchange> {
        let proof = self.provider.mint_identity_proof(pid).await.map_err(classify_provider)?;
        self.backend.exchange(&proof).await.map_err(classify_exchange)
    }

    async fn exchange_and_commit(&self, gen: u64, pid: ProviderIdentity) -> SessionResult<ResolvedIdentity> {
        // the provider sign-in may have outlived a logout; never exchange for it
        if self.generation() != gen {
            self.release_superseded(pid);
            return Err(SessionError::Superseded);
        }
        let uid = pid.uid.clone();
        let exchange = self.exchange_for(&pid).await?;
        let res = self.commit_session(gen, exchange, Some(pid.clone()));
        match &res {
            Ok(_) => info!(target: "podium_auth", "session established uid={}", uid),
            Err(SessionError::Superseded) => self.release_superseded(pid),
            Err(e) => warn!(target: "podium_auth", "failed to persist session uid={}: {}", uid, e),
        }
        res
    }

    /// Sign the provider out of an identity obtained by a superseded login,
    /// unless a newer session already tracks the same user.
    fn release_superseded(&self, pid: ProviderIdentity) {
        let tracked = self.inner.lock().provider_identity.as_ref().map(|p| p.uid == pid.uid).unwrap_or(false);
        if tracked {
            debug!(target: "podium_auth", "superseded login uid={} is the current session user, keeping provider state", pid.uid);
            return;
        }
        info!(target: "podium_auth", "discarding superseded login uid={}", pid.uid);
        self.spawn_provider_sign_out(pid);
    }

    fn commit_session(
        &self,
        gen: u64,
        exchange: Exchange,
        provider_identity: Option<ProviderIdentity>,
    ) -> SessionResult<ResolvedIdentity> {
        let mut inner = self.inner.lock();
        if inner.generation != gen {
            return Err(SessionError::Superseded);
        }
        self.store.put(CREDENTIAL_KEY, exchange.credential.as_str())?;
        inner.credential = Some(exchange.credential);
        if provider_identity.is_some() {
            inner.provider_identity = provider_identity;
        }
        self.publish(SessionState::Authenticated(exchange.identity.clone()));
        Ok(exchange.identity)
    }

    fn commit_identity(&self, gen: u64, cred: &SessionCredential, identity: ResolvedIdentity) -> bool {
        let inner = self.inner.lock();
        if inner.generation != gen || inner.credential.as_ref() != Some(cred) {
            return false;
        }
        self.publish(SessionState::Authenticated(identity));
        true
    }

    fn clear_if_current(&self, cred: &SessionCredential) {
        let mut inner = self.inner.lock();
        if inner.credential.as_ref() != Some(cred) {
            return;
        }
        inner.credential = None;
        if let Err(e) = self.store.remove(CREDENTIAL_KEY) {
            warn!(target: "podium_auth", "failed to clear stale credential: {}", e);
        }
        self.publish(SessionState::Unauthenticated);
    }

    fn settle_unauthenticated(&self, gen: u64) {
        let inner = self.inner.lock();
        if inner.generation == gen && inner.credential.is_none() {
            self.publish(SessionState::Unauthenticated);
        }
    }
}
