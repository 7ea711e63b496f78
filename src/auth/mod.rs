//! Stateless authentication.
//!
//! - **Credential verification**: username + password checked against an
//!   Argon2 hash held by a [`UserLookup`] (the SurrealDB-backed [`UserStore`])
//! - **Token codec**: RS256 JWTs carrying subject and scope, issued at login
//!   and verified on every later request
//! - **Authenticated context**: per-request identity rebuilt from a fresh
//!   token; never stored server side
//!
//! ## Usage
//!
//! ```ignore
//! let manager = AuthenticationManager::with_user_lookup(Arc::new(store));
//! let identity = manager
//!     .authenticate(&AuthenticationRequest::username_password("alice", "pw"))
//!     .await?;
//! let token = codec.issue(identity.username(), identity.authorities())?;
//! assert!(codec.verify(&token));
//! ```

mod context;
pub mod password;
pub mod token;
mod user_store;
mod verifier;

pub use context::{AuthenticatedContext, Identity};
pub use token::{DEFAULT_EXPIRE_SECONDS, DEFAULT_ISSUER, TokenClaims, TokenCodec, TokenError, TokenStatus};
pub use user_store::{UserLookup, UserStore};
pub use verifier::{
    AuthenticationError, AuthenticationFuture, AuthenticationManager, AuthenticationProvider,
    AuthenticationRequest, CredentialVerifier,
};

#[cfg(test)]
pub(crate) use token::dev_codec;
#[cfg(test)]
pub(crate) use user_store::tests::seeded_store;
