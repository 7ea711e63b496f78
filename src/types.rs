//! NewType wrappers for the strings that flow through authentication.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a role name where a username is expected).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Unique login name of an identity.
    ///
    /// This is the `sub` claim of every token issued for the identity and
    /// the key used by the user store.
    Username
);

newtype_string!(
    /// A granted permission or role name (e.g., "ROLE_ADMIN").
    ///
    /// Authorities travel inside tokens as the space-delimited `scope`
    /// claim, so they never contain whitespace.
    Authority
);

/// Well-known administrator authority.
pub const ROLE_ADMIN: &str = "ROLE_ADMIN";

/// Well-known plain user authority.
pub const ROLE_USER: &str = "ROLE_USER";

impl Authority {
    /// Whether this value can be carried in a `scope` claim.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.chars().any(char::is_whitespace)
    }
}

/// Split a space-delimited scope string into authorities.
///
/// Repeated separators are tolerated; empty input yields an empty set.
pub fn parse_scope(scope: &str) -> BTreeSet<Authority> {
    scope.split_whitespace().map(Authority::from).collect()
}

/// Join authorities into the space-delimited form used by the `scope` claim.
pub fn join_scope<'a, I>(authorities: I) -> String
where
    I: IntoIterator<Item = &'a Authority>,
{
    authorities
        .into_iter()
        .map(Authority::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_creation() {
        let name = Username::new("alice");
        assert_eq!(name.as_str(), "alice");
        assert_eq!(name.to_string(), "alice");
    }

    #[test]
    fn test_username_from_string() {
        let name: Username = "alice".into();
        assert_eq!(name.as_str(), "alice");

        let name: Username = String::from("bob").into();
        assert_eq!(name.into_inner(), "bob");
    }

    #[test]
    fn test_authority_serde() {
        let authority = Authority::new(ROLE_ADMIN);
        let json = serde_json::to_string(&authority).unwrap();
        assert_eq!(json, "\"ROLE_ADMIN\"");

        let parsed: Authority = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, authority);
    }

    #[test]
    fn test_authority_validity() {
        assert!(Authority::new(ROLE_USER).is_valid());
        assert!(!Authority::new("").is_valid());
        assert!(!Authority::new("ROLE A").is_valid());
    }

    #[test]
    fn test_parse_scope() {
        let scope = parse_scope("ROLE_USER  ROLE_ADMIN");
        assert_eq!(scope.len(), 2);
        assert!(scope.contains(&Authority::new(ROLE_USER)));
        assert!(scope.contains(&Authority::new(ROLE_ADMIN)));

        assert!(parse_scope("").is_empty());
        assert!(parse_scope("   ").is_empty());
    }

    #[test]
    fn test_join_scope_is_inverse_of_parse() {
        let authorities: BTreeSet<Authority> =
            [ROLE_USER, ROLE_ADMIN].into_iter().map(Authority::from).collect();
        let joined = join_scope(&authorities);
        assert_eq!(joined, "ROLE_ADMIN ROLE_USER");
        assert_eq!(parse_scope(&joined), authorities);
    }

    #[test]
    fn test_borrow_lookup() {
        let set: BTreeSet<Authority> = parse_scope("ROLE_USER");
        assert!(set.contains("ROLE_USER"));
    }
}
