//! In-test fakes for the identity provider and the backend. Every call is
//! counted; selected calls can be held on a gate until the test releases them.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use podium_auth::identity::{
    BackendError, BackendResult, Exchange, IdentityProof, IdentityProvider, ProviderError, ProviderErrorCode,
    ProviderIdentity, ProviderResult, ResolvedIdentity, SessionBackend, SessionCredential, SignInMethod,
};

/// A call that waits for `release` before continuing, after signalling `entered`.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

pub fn user(uid: &str) -> ResolvedIdentity {
    ResolvedIdentity {
        id: uid.to_string(),
        email: Some(format!("{}@example.com", uid)),
        display_name: Some(uid.to_uppercase()),
        has_password_provider: true,
        ..Default::default()
    }
}

pub fn password_identity(uid: &str) -> ProviderIdentity {
    ProviderIdentity::new(uid, Some(format!("{}@example.com", uid)), vec![SignInMethod::Password])
}

pub fn federated_identity(uid: &str) -> ProviderIdentity {
    ProviderIdentity::new(uid, Some(format!("{}@example.com", uid)), vec![SignInMethod::Federated("google.com".into())])
}

#[derive(Default)]
pub struct ProviderCalls {
    pub sign_in: AtomicUsize,
    pub sign_up: AtomicUsize,
    pub set_display_name: AtomicUsize,
    pub federated: AtomicUsize,
    pub sign_out: AtomicUsize,
    pub mint: AtomicUsize,
    pub reauth: AtomicUsize,
}

pub struct MockProvider {
    /// email -> (password, identity)
    accounts: Mutex<HashMap<String, (String, ProviderIdentity)>>,
    federated_result: Mutex<Option<ProviderResult<ProviderIdentity>>>,
    pub sign_out_fails: Mutex<bool>,
    pub sign_in_gate: Mutex<Option<Gate>>,
    pub sign_out_gate: Mutex<Option<Gate>>,
    pub reauth_gate: Mutex<Option<Gate>>,
    pub calls: ProviderCalls,
    current: watch::Sender<Option<ProviderIdentity>>,
}

impl MockProvider {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            federated_result: Mutex::new(None),
            sign_out_fails: Mutex::new(false),
            sign_in_gate: Mutex::new(None),
            sign_out_gate: Mutex::new(None),
            reauth_gate: Mutex::new(None),
            calls: ProviderCalls::default(),
            current,
        }
    }

    pub fn with_account(self, email: &str, password: &str, identity: ProviderIdentity) -> Self {
        self.accounts.lock().insert(email.to_string(), (password.to_string(), identity));
        self
    }

    pub fn set_federated(&self, result: ProviderResult<ProviderIdentity>) {
        *self.federated_result.lock() = Some(result);
    }

    /// Simulate a provider-side identity change (another tab, token expiry).
    pub fn emit(&self, identity: Option<ProviderIdentity>) {
        self.current.send_replace(identity);
    }

    pub fn gate_sign_in(&self) -> Gate {
        let g = Gate::default();
        *self.sign_in_gate.lock() = Some(g.clone());
        g
    }

    pub fn gate_sign_out(&self) -> Gate {
        let g = Gate::default();
        *self.sign_out_gate.lock() = Some(g.clone());
        g
    }

    pub fn gate_reauth(&self) -> Gate {
        let g = Gate::default();
        *self.reauth_gate.lock() = Some(g.clone());
        g
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ProviderResult<ProviderIdentity> {
        self.calls.sign_in.fetch_add(1, Ordering::SeqCst);
        let gate = self.sign_in_gate.lock().clone();
        if let Some(g) = gate {
            g.pass().await;
        }
        let found = match self.accounts.lock().get(email) {
            Some((pw, id)) if pw == password => Ok(id.clone()),
            Some(_) => Err(ProviderError::from_code(ProviderErrorCode::WrongPassword)),
            None => Err(ProviderError::from_code(ProviderErrorCode::UserNotFound)),
        };
        // like a real provider, a successful sign-in becomes the current user
        if let Ok(id) = &found {
            self.current.send_replace(Some(id.clone()));
        }
        found
    }

    async fn sign_up_with_password(&self, email: &str, password: &str) -> ProviderResult<ProviderIdentity> {
        self.calls.sign_up.fetch_add(1, Ordering::SeqCst);
        if password.len() < 6 {
            return Err(ProviderError::from_code(ProviderErrorCode::WeakPassword));
        }
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(email) {
            return Err(ProviderError::from_code(ProviderErrorCode::EmailExists));
        }
        let uid = email.split('@').next().unwrap_or("new").to_string();
        let id = ProviderIdentity::new(uid, Some(email.to_string()), vec![SignInMethod::Password]);
        accounts.insert(email.to_string(), (password.to_string(), id.clone()));
        Ok(id)
    }

    async fn set_display_name(&self, identity: &ProviderIdentity, name: &str) -> ProviderResult<ProviderIdentity> {
        self.calls.set_display_name.fetch_add(1, Ordering::SeqCst);
        let mut updated = identity.clone();
        updated.display_name = Some(name.to_string());
        Ok(updated)
    }

    async fn sign_in_with_federated_popup(&self) -> ProviderResult<ProviderIdentity> {
        self.calls.federated.fetch_add(1, Ordering::SeqCst);
        self.federated_result.lock().clone().unwrap_or_else(|| Err(ProviderError::cancelled()))
    }

    async fn sign_out(&self, identity: &ProviderIdentity) -> ProviderResult<()> {
        self.calls.sign_out.fetch_add(1, Ordering::SeqCst);
        let gate = self.sign_out_gate.lock().clone();
        if let Some(g) = gate {
            g.pass().await;
        }
        if *self.sign_out_fails.lock() {
            return Err(ProviderError::from_code(ProviderErrorCode::Network));
        }
        self.current.send_if_modified(|cur| {
            if cur.as_ref().map(|c| c.uid == identity.uid).unwrap_or(false) {
                *cur = None;
                return true;
            }
            false
        });
        Ok(())
    }

    async fn mint_identity_proof(&self, identity: &ProviderIdentity) -> ProviderResult<IdentityProof> {
        let n = self.calls.mint.fetch_add(1, Ordering::SeqCst);
        Ok(IdentityProof::new(format!("proof:{}:{}", identity.uid, n)))
    }

    async fn reauthenticate_with_password(&self, identity: &ProviderIdentity, password: &str) -> ProviderResult<()> {
        self.calls.reauth.fetch_add(1, Ordering::SeqCst);
        let gate = self.reauth_gate.lock().clone();
        if let Some(g) = gate {
            g.pass().await;
        }
        let email = identity.email.clone().unwrap_or_default();
        match self.accounts.lock().get(&email) {
            Some((pw, _)) if pw == password => Ok(()),
            _ => Err(ProviderError::from_code(ProviderErrorCode::InvalidCredential)),
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<ProviderIdentity>> { self.current.subscribe() }
}

#[derive(Default)]
pub struct BackendCalls {
    pub exchange: AtomicUsize,
    pub me: AtomicUsize,
    pub reissue: AtomicUsize,
    pub change_password: AtomicUsize,
}

impl BackendCalls {
    pub fn total(&self) -> usize {
        self.exchange.load(Ordering::SeqCst)
            + self.me.load(Ordering::SeqCst)
            + self.reissue.load(Ordering::SeqCst)
            + self.change_password.load(Ordering::SeqCst)
    }
}

pub struct MockBackend {
    sessions: Mutex<HashMap<String, ResolvedIdentity>>,
    pub exchange_error: Mutex<Option<BackendError>>,
    pub me_error: Mutex<Option<BackendError>>,
    pub exchange_gate: Mutex<Option<Gate>>,
    pub password_changes: Mutex<Vec<(String, String, String)>>,
    pub calls: BackendCalls,
    issued: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            exchange_error: Mutex::new(None),
            me_error: Mutex::new(None),
            exchange_gate: Mutex::new(None),
            password_changes: Mutex::new(Vec::new()),
            calls: BackendCalls::default(),
            issued: AtomicUsize::new(0),
        }
    }

    /// A credential the backend already knows, e.g. one persisted by a previous run.
    pub fn with_session(self, credential: &str, identity: ResolvedIdentity) -> Self {
        self.sessions.lock().insert(credential.to_string(), identity);
        self
    }

    /// Server-side invalidation: later calls with `credential` get a 401.
    pub fn revoke(&self, credential: &str) {
        self.sessions.lock().remove(credential);
    }

    pub fn fail_exchange(&self, err: BackendError) {
        *self.exchange_error.lock() = Some(err);
    }

    pub fn fail_me(&self, err: Option<BackendError>) {
        *self.me_error.lock() = err;
    }

    pub fn gate_exchange(&self) -> Gate {
        let g = Gate::default();
        *self.exchange_gate.lock() = Some(g.clone());
        g
    }

    fn issue(&self, identity: ResolvedIdentity) -> SessionCredential {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = format!("cred-{}-{}", identity.id, n);
        self.sessions.lock().insert(token.clone(), identity);
        SessionCredential::new(token)
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn exchange(&self, proof: &IdentityProof) -> BackendResult<Exchange> {
        self.calls.exchange.fetch_add(1, Ordering::SeqCst);
        let gate = self.exchange_gate.lock().clone();
        if let Some(g) = gate {
            g.pass().await;
        }
        if let Some(err) = self.exchange_error.lock().clone() {
            return Err(err);
        }
        let uid = proof.as_str().split(':').nth(1).unwrap_or("anon").to_string();
        let identity = user(&uid);
        let credential = self.issue(identity.clone());
        Ok(Exchange { credential, identity })
    }

    async fn fetch_identity(&self, credential: &SessionCredential) -> BackendResult<ResolvedIdentity> {
        self.calls.me.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.me_error.lock().clone() {
            return Err(err);
        }
        self.sessions
            .lock()
            .get(credential.as_str())
            .cloned()
            .ok_or_else(|| BackendError::from_status(401, "Invalid token."))
    }

    async fn reissue(&self, credential: &SessionCredential) -> BackendResult<SessionCredential> {
        self.calls.reissue.fetch_add(1, Ordering::SeqCst);
        let identity = self.sessions.lock().get(credential.as_str()).cloned();
        match identity {
            Some(id) => Ok(self.issue(id)),
            None => Err(BackendError::from_status(401, "Invalid token.")),
        }
    }

    async fn change_password(
        &self,
        credential: &SessionCredential,
        fresh_proof: &IdentityProof,
        new_password: &str,
    ) -> BackendResult<()> {
        self.calls.change_password.fetch_add(1, Ordering::SeqCst);
        if !self.sessions.lock().contains_key(credential.as_str()) {
            return Err(BackendError::from_status(401, "Invalid token."));
        }
        self.password_changes.lock().push((
            credential.as_str().to_string(),
            fresh_proof.as_str().to_string(),
            new_password.to_string(),
        ));
        Ok(())
    }
}
