//! Network adapters for the identity seams: the application backend and an
//! Identity-Toolkit style identity provider, both over reqwest.

mod backend_http;
mod identity_toolkit;

pub use backend_http::HttpBackend;
pub use identity_toolkit::{provider_error_from_body, IdentityToolkitProvider};
