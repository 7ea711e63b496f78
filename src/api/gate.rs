//! Authorization gate.
//!
//! An explicit table mapping route patterns to access rules, evaluated
//! first-match against the identity the filter attached to the request.

use std::fmt;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::AppState;
use crate::auth::AuthenticatedContext;
use crate::error::ApiError;
use crate::types::Authority;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*`: exactly one segment
    Single,
    /// `**`: zero or more segments
    Any,
}

/// Ant-style path pattern such as `/api/*/items` or `/public/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|s| match s {
                "*" => Segment::Single,
                "**" => Segment::Any,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = split_path(path).collect();
        match_segments(&self.segments, &path)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::Any, rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            Some((head, tail)) => {
                let head_matches = match segment {
                    Segment::Literal(literal) => literal == head,
                    _ => true,
                };
                head_matches && match_segments(rest, tail)
            }
            None => false,
        },
    }
}

/// What a route requires of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    PermitAll,
    Authenticated,
    HasAuthority(Authority),
    HasAnyAuthority(Vec<Authority>),
}

/// Outcome of evaluating a request against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// No identity where one is required
    Unauthenticated,
    /// Identity present but lacking the required authority
    Forbidden(String),
}

impl AccessRule {
    pub fn evaluate(&self, ctx: Option<&AuthenticatedContext>) -> AccessDecision {
        let ctx = match (self, ctx) {
            (Self::PermitAll, _) => return AccessDecision::Allow,
            (_, None) => return AccessDecision::Unauthenticated,
            (_, Some(ctx)) => ctx,
        };

        match self {
            Self::PermitAll | Self::Authenticated => AccessDecision::Allow,
            Self::HasAuthority(authority) => {
                if ctx.has_authority(authority.as_str()) {
                    AccessDecision::Allow
                } else {
                    AccessDecision::Forbidden(format!("requires {}", authority))
                }
            }
            Self::HasAnyAuthority(authorities) => {
                if ctx.has_any_authority(authorities.iter().map(|a| a.as_str())) {
                    AccessDecision::Allow
                } else {
                    let names: Vec<&str> = authorities.iter().map(|a| a.as_str()).collect();
                    AccessDecision::Forbidden(format!("requires one of {}", names.join(", ")))
                }
            }
        }
    }
}

/// Ordered route-to-rule table with a fallback rule.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: Vec<(PathPattern, AccessRule)>,
    default_rule: AccessRule,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_rule: AccessRule::Authenticated,
        }
    }
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; earlier rules win.
    pub fn rule(mut self, pattern: &str, rule: AccessRule) -> Self {
        self.rules.push((PathPattern::new(pattern), rule));
        self
    }

    pub fn permit(self, pattern: &str) -> Self {
        self.rule(pattern, AccessRule::PermitAll)
    }

    pub fn require_authenticated(self, pattern: &str) -> Self {
        self.rule(pattern, AccessRule::Authenticated)
    }

    pub fn require_authority(self, pattern: &str, authority: impl Into<Authority>) -> Self {
        self.rule(pattern, AccessRule::HasAuthority(authority.into()))
    }

    pub fn require_any_authority<I, A>(self, pattern: &str, authorities: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Authority>,
    {
        let authorities = authorities.into_iter().map(Into::into).collect();
        self.rule(pattern, AccessRule::HasAnyAuthority(authorities))
    }

    pub fn with_default_rule(mut self, rule: AccessRule) -> Self {
        self.default_rule = rule;
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule governing `path`.
    pub fn rule_for(&self, path: &str) -> &AccessRule {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, rule)| rule)
            .unwrap_or(&self.default_rule)
    }

    pub fn evaluate(&self, path: &str, ctx: Option<&AuthenticatedContext>) -> AccessDecision {
        self.rule_for(path).evaluate(ctx)
    }
}

/// Middleware rejecting requests the policy does not allow.
pub async fn authorization_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let decision = state
        .policy
        .evaluate(&path, request.extensions().get::<AuthenticatedContext>());

    match decision {
        AccessDecision::Allow => next.run(request).await,
        AccessDecision::Unauthenticated => {
            debug!("Unauthenticated request to {}", path);
            ApiError::Unauthenticated.into_response()
        }
        AccessDecision::Forbidden(reason) => {
            ApiError::AccessDenied(format!("{} {}", path, reason)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::types::{ROLE_ADMIN, ROLE_USER, Username};

    fn ctx(authorities: &[&str]) -> AuthenticatedContext {
        let set: BTreeSet<Authority> = authorities.iter().map(|a| Authority::new(*a)).collect();
        AuthenticatedContext::new(Username::new("alice"), set)
    }

    #[test]
    fn test_literal_pattern() {
        let pattern = PathPattern::new("/login");
        assert!(pattern.matches("/login"));
        assert!(pattern.matches("/login/"));
        assert!(!pattern.matches("/login/extra"));
        assert!(!pattern.matches("/logout"));
        assert!(!pattern.matches("/"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        let pattern = PathPattern::new("/users/*/profile");
        assert!(pattern.matches("/users/alice/profile"));
        assert!(!pattern.matches("/users/profile"));
        assert!(!pattern.matches("/users/a/b/profile"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        let pattern = PathPattern::new("/public/**");
        assert!(pattern.matches("/public"));
        assert!(pattern.matches("/public/"));
        assert!(pattern.matches("/public/css/site.css"));
        assert!(!pattern.matches("/private/css"));

        let pattern = PathPattern::new("/**/admin");
        assert!(pattern.matches("/admin"));
        assert!(pattern.matches("/a/b/admin"));
        assert!(!pattern.matches("/a/b/admin/x"));

        assert!(PathPattern::new("/**").matches("/anything/at/all"));
    }

    #[test]
    fn test_first_match_wins() {
        let policy = AccessPolicy::new()
            .permit("/docs/public")
            .require_authority("/docs/**", ROLE_ADMIN);

        assert_eq!(policy.evaluate("/docs/public", None), AccessDecision::Allow);
        assert_eq!(
            policy.evaluate("/docs/secret", None),
            AccessDecision::Unauthenticated
        );
        assert!(matches!(
            policy.evaluate("/docs/secret", Some(&ctx(&[ROLE_USER]))),
            AccessDecision::Forbidden(_)
        ));
        assert_eq!(
            policy.evaluate("/docs/secret", Some(&ctx(&[ROLE_ADMIN]))),
            AccessDecision::Allow
        );
    }

    #[test]
    fn test_default_rule_requires_identity() {
        let policy = AccessPolicy::new().permit("/health");
        assert_eq!(policy.len(), 1);

        assert_eq!(policy.evaluate("/health", None), AccessDecision::Allow);
        assert_eq!(policy.evaluate("/hello", None), AccessDecision::Unauthenticated);
        assert_eq!(policy.evaluate("/hello", Some(&ctx(&[]))), AccessDecision::Allow);

        let open = AccessPolicy::new().with_default_rule(AccessRule::PermitAll);
        assert!(open.is_empty());
        assert_eq!(open.evaluate("/hello", None), AccessDecision::Allow);
    }

    #[test]
    fn test_has_any_authority() {
        let policy = AccessPolicy::new().require_any_authority("/reports/**", [ROLE_ADMIN, "ROLE_AUDITOR"]);

        assert_eq!(
            policy.evaluate("/reports/q3", Some(&ctx(&["ROLE_AUDITOR"]))),
            AccessDecision::Allow
        );
        match policy.evaluate("/reports/q3", Some(&ctx(&[ROLE_USER]))) {
            AccessDecision::Forbidden(reason) => {
                assert_eq!(reason, "requires one of ROLE_ADMIN, ROLE_AUDITOR")
            }
            other => panic!("expected forbidden, got {:?}", other),
        }
    }
}
