//! Identity records and the request-scoped authenticated context.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Authority, Username};

/// A stored identity as resolved by a [`UserLookup`](super::UserLookup).
///
/// Immutable for the lifetime of a request. The password hash is never
/// serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    username: Username,
    password_hash: String,
    authorities: BTreeSet<Authority>,
    is_active: bool,
}

impl Identity {
    /// Create a new active identity.
    pub fn new(
        username: impl Into<Username>,
        password_hash: impl Into<String>,
        authorities: impl IntoIterator<Item = Authority>,
    ) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            authorities: authorities.into_iter().collect(),
            is_active: true,
        }
    }

    /// Mark the identity as disabled.
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn authorities(&self) -> &BTreeSet<Authority> {
        &self.authorities
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("authorities", &self.authorities)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Identity reconstructed from a fresh bearer token.
///
/// One instance is created per request by the identity filter and carried in
/// that request's extensions. It is never cached or shared across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedContext {
    /// Token subject
    subject: Username,
    /// Authorities from the token's scope claim
    authorities: BTreeSet<Authority>,
    /// Client IP address (for audit logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_address: Option<String>,
    /// Client user agent (for audit logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<String>,
}

impl AuthenticatedContext {
    pub fn new(subject: Username, authorities: BTreeSet<Authority>) -> Self {
        Self {
            subject,
            authorities,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Set client metadata for audit logging.
    pub fn with_client_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn subject(&self) -> &Username {
        &self.subject
    }

    pub fn authorities(&self) -> &BTreeSet<Authority> {
        &self.authorities
    }

    /// Check whether a single authority was granted.
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    /// Check whether at least one of the given authorities was granted.
    pub fn has_any_authority<'a>(&self, authorities: impl IntoIterator<Item = &'a str>) -> bool {
        authorities.into_iter().any(|a| self.has_authority(a))
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ROLE_ADMIN, ROLE_USER, parse_scope};

    #[test]
    fn test_identity_new_is_active() {
        let identity = Identity::new("alice", "$argon2id$...", [Authority::new(ROLE_USER)]);
        assert_eq!(identity.username().as_str(), "alice");
        assert!(identity.is_active());
        assert!(identity.authorities().contains(ROLE_USER));

        let disabled = identity.deactivated();
        assert!(!disabled.is_active());
    }

    #[test]
    fn test_identity_debug_redacts_hash() {
        let identity = Identity::new("alice", "$argon2id$secret", []);
        let debug = format!("{:?}", identity);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_context_authority_checks() {
        let ctx = AuthenticatedContext::new(Username::new("alice"), parse_scope("ROLE_USER"));

        assert!(ctx.has_authority(ROLE_USER));
        assert!(!ctx.has_authority(ROLE_ADMIN));
        assert!(ctx.has_any_authority([ROLE_ADMIN, ROLE_USER]));
        assert!(!ctx.has_any_authority([ROLE_ADMIN]));
    }

    #[test]
    fn test_context_with_client_info() {
        let ctx = AuthenticatedContext::new(Username::new("alice"), BTreeSet::new())
            .with_client_info(Some("192.168.1.1".to_string()), Some("curl/8".to_string()));

        assert_eq!(ctx.ip_address(), Some("192.168.1.1"));
        assert_eq!(ctx.user_agent(), Some("curl/8"));
    }
}
