//! Credential verification behind a provider-based authentication manager.
//!
//! The login handler only talks to [`AuthenticationManager`]; username and
//! password checking is one [`AuthenticationProvider`] among possibly many.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::context::Identity;
use crate::auth::password::{verify_against_dummy_blocking, verify_password_blocking};
use crate::auth::user_store::UserLookup;

/// Credentials presented for authentication.
#[derive(Clone)]
pub enum AuthenticationRequest {
    UsernamePassword { username: String, password: String },
}

impl AuthenticationRequest {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The principal name the request claims, for logging.
    pub fn principal(&self) -> &str {
        match self {
            Self::UsernamePassword { username, .. } => username,
        }
    }
}

impl fmt::Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Authentication errors.
///
/// `UnknownUser` and `BadCredentials` are kept apart for server-side logs
/// only; callers facing clients must collapse them into one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No identity with that username exists
    UnknownUser,
    /// The password did not match
    BadCredentials,
    /// The identity exists but is deactivated
    Disabled,
    /// No registered provider handles this kind of request
    ProviderNotFound,
    /// The user lookup failed
    Lookup(String),
    /// The password check itself could not run
    Hashing(String),
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownUser => write!(f, "User not found"),
            Self::BadCredentials => write!(f, "Bad credentials"),
            Self::Disabled => write!(f, "User account is deactivated"),
            Self::ProviderNotFound => write!(f, "No authentication provider for request"),
            Self::Lookup(msg) => write!(f, "User lookup failed: {}", msg),
            Self::Hashing(msg) => write!(f, "Password verification failed: {}", msg),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Future returned by providers.
pub type AuthenticationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Identity, AuthenticationError>> + Send + 'a>>;

/// A strategy able to authenticate some kinds of [`AuthenticationRequest`].
pub trait AuthenticationProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether this provider handles the given request kind.
    fn supports(&self, request: &AuthenticationRequest) -> bool;

    /// Authenticate the request, returning the verified identity.
    fn authenticate<'a>(&'a self, request: &'a AuthenticationRequest) -> AuthenticationFuture<'a>;
}

/// Username/password provider backed by a [`UserLookup`].
pub struct CredentialVerifier {
    users: Arc<dyn UserLookup>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserLookup>) -> Self {
        Self { users }
    }

    /// Look up `username` and compare `password` against its stored hash.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Identity, AuthenticationError> {
        let identity = self
            .users
            .find_identity(username)
            .await
            .map_err(|e| AuthenticationError::Lookup(e.to_string()))?;

        let Some(identity) = identity else {
            verify_against_dummy_blocking(password)
                .await
                .map_err(|e| AuthenticationError::Hashing(e.to_string()))?;
            return Err(AuthenticationError::UnknownUser);
        };

        let matches = verify_password_blocking(password, identity.password_hash())
            .await
            .map_err(|e| AuthenticationError::Hashing(e.to_string()))?;
        if !matches {
            return Err(AuthenticationError::BadCredentials);
        }

        if !identity.is_active() {
            return Err(AuthenticationError::Disabled);
        }

        Ok(identity)
    }
}

impl AuthenticationProvider for CredentialVerifier {
    fn name(&self) -> &str {
        "username_password"
    }

    fn supports(&self, request: &AuthenticationRequest) -> bool {
        matches!(request, AuthenticationRequest::UsernamePassword { .. })
    }

    fn authenticate<'a>(&'a self, request: &'a AuthenticationRequest) -> AuthenticationFuture<'a> {
        Box::pin(async move {
            match request {
                AuthenticationRequest::UsernamePassword { username, password } => {
                    self.verify(username, password).await
                }
            }
        })
    }
}

/// Ordered list of providers; the first one that supports a request decides.
#[derive(Default)]
pub struct AuthenticationManager {
    providers: Vec<Arc<dyn AuthenticationProvider>>,
}

impl AuthenticationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider after the existing ones.
    pub fn register_provider(mut self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Manager with a single username/password provider.
    pub fn with_user_lookup(users: Arc<dyn UserLookup>) -> Self {
        Self::new().register_provider(Arc::new(CredentialVerifier::new(users)))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn authenticate(
        &self,
        request: &AuthenticationRequest,
    ) -> Result<Identity, AuthenticationError> {
        let Some(provider) = self.providers.iter().find(|p| p.supports(request)) else {
            warn!("No authentication provider supports request for '{}'", request.principal());
            return Err(AuthenticationError::ProviderNotFound);
        };

        debug!(
            provider = provider.name(),
            principal = request.principal(),
            "Authenticating"
        );
        provider.authenticate(request).await
    }
}
