//! Session identity bridging: provider identity proofs in, backend session
//! credentials out. Keep the public surface thin and split implementation
//! across sub-modules.

mod backend;
mod principal;
mod proof;
mod provider;
mod session;

pub use backend::{BackendError, BackendResult, Exchange, SessionBackend};
pub use principal::{ResolvedIdentity, SessionState, Subscription};
pub use proof::{IdentityProof, SessionCredential};
pub use provider::{
    FederatedPrompt, IdentityProvider, IdpCredential, ProviderError, ProviderErrorCode, ProviderIdentity,
    ProviderResult, SignInMethod,
};
pub use session::{SessionManager, SessionOptions};
