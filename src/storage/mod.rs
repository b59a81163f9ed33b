//!
//! podium-auth storage module
//! --------------------------
//! Durable key-value slot for the session credential (and, optionally, the
//! identity provider's own signed-in user). Semantics mirror browser local
//! storage: put/get/remove of opaque strings under a key.
//!
//! Operations are synchronous so the `SessionManager` can check its generation
//! and write the credential inside one critical section.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::SessionResult;

mod file;

pub use file::FileCredentialStore;

/// Key holding the backend-issued session credential.
pub const CREDENTIAL_KEY: &str = "jwtToken";
/// Key holding the identity provider's persisted user (JSON).
pub const PROVIDER_IDENTITY_KEY: &str = "provider.identity";

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> SessionResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> SessionResult<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> SessionResult<()>;
}

/// Process-local store; contents vanish with the process.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    map: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }

    /// Seed a value, e.g. a credential "left over" from a previous page load.
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.map.write().insert(key.to_string(), value.to_string());
        self
    }

    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> SessionResult<Option<String>> { Ok(self.map.read().get(key).cloned()) }

    fn put(&self, key: &str, value: &str) -> SessionResult<()> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SessionResult<()> {
        self.map.write().remove(key);
        Ok(())
    }
}
