//! Signed token issuance and verification.
//!
//! Tokens are compact RS256 JWTs carrying `iss`, `sub`, `iat`, `exp` and a
//! space-delimited `scope`. Nothing is stored server side: a token is accepted
//! if and only if it is well formed, its signature verifies against the
//! configured public key, and the current time is before its `exp`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Authority, Username, join_scope, parse_scope};

/// Default token lifetime in seconds (10 hours).
pub const DEFAULT_EXPIRE_SECONDS: i64 = 36000;

/// Issuer written into every token.
pub const DEFAULT_ISSUER: &str = "self";

/// Claims carried by an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject (username)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Space-delimited authorities
    #[serde(default)]
    pub scope: String,
}

impl TokenClaims {
    pub fn subject(&self) -> Username {
        Username::new(self.sub.clone())
    }

    /// Authorities parsed from the scope claim; empty scope yields an empty set.
    pub fn authorities(&self) -> BTreeSet<Authority> {
        parse_scope(&self.scope)
    }

    /// Whether the token is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Acceptance status of a presented token.
///
/// Only `Fresh` tokens may establish an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Fresh(TokenClaims),
    Expired,
    SignatureInvalid,
    Malformed,
}

impl TokenStatus {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Expired => "expired",
            Self::SignatureInvalid => "signature_invalid",
            Self::Malformed => "malformed",
        }
    }
}

/// Token codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not a structurally valid JWT or lacks required claims
    Malformed(String),
    /// The signature does not verify against the configured public key
    SignatureInvalid,
    /// The token is past its expiry
    Expired,
    /// Signing failed
    Encoding(String),
    /// Key material could not be loaded
    InvalidKey(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed token: {}", msg),
            Self::SignatureInvalid => write!(f, "Token signature is invalid"),
            Self::Expired => write!(f, "Token has expired"),
            Self::Encoding(msg) => write!(f, "Failed to sign token: {}", msg),
            Self::InvalidKey(msg) => write!(f, "Invalid key material: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::SignatureInvalid,
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Issues and verifies RS256 tokens with a single fixed key pair.
///
/// Holds only immutable key material, so one instance is shared by every
/// request without locking.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expire_seconds: i64,
    validation: Validation,
}

impl TokenCodec {
    /// Build a codec from PEM encoded RSA keys (PKCS#1 or PKCS#8 private key,
    /// SPKI or PKCS#1 public key).
    pub fn from_rsa_pem(public_pem: &[u8], private_pem: &[u8]) -> Result<Self, TokenError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::InvalidKey(format!("public key: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| TokenError::InvalidKey(format!("private key: {}", e)))?;

        // Expiry is checked against our own clock in `status_at`; audience and
        // issuer values are not validated, only their presence.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Ok(Self {
            encoding_key,
            decoding_key,
            issuer: DEFAULT_ISSUER.to_string(),
            expire_seconds: DEFAULT_EXPIRE_SECONDS,
            validation,
        })
    }

    /// Override the token lifetime.
    pub fn with_expire_seconds(mut self, expire_seconds: i64) -> Self {
        self.expire_seconds = expire_seconds;
        self
    }

    /// Override the issuer written into new tokens.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn expire_seconds(&self) -> i64 {
        self.expire_seconds
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for `subject` valid from now for the configured lifetime.
    pub fn issue(
        &self,
        subject: &Username,
        authorities: &BTreeSet<Authority>,
    ) -> Result<String, TokenError> {
        self.issue_at(subject, authorities, Utc::now())
    }

    /// Issue a token as if the current time were `issued_at`.
    pub fn issue_at(
        &self,
        subject: &Username,
        authorities: &BTreeSet<Authority>,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = issued_at.timestamp();
        let exp = iat.checked_add(self.expire_seconds).ok_or_else(|| {
            TokenError::Encoding(format!(
                "expiry overflows: iat {} + {}s",
                iat, self.expire_seconds
            ))
        })?;
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            iat,
            exp,
            scope: join_scope(authorities),
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        debug!(subject = %subject, exp = claims.exp, "Issued token");
        Ok(token)
    }

    /// Whether the token is acceptable right now. Never fails.
    pub fn verify(&self, token: &str) -> bool {
        self.status(token).is_fresh()
    }

    /// Whether the token is acceptable at `now`. Never fails.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.status_at(token, now).is_fresh()
    }

    /// Verify the signature and parse the claims, without checking expiry.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Classify a token against the current time.
    pub fn status(&self, token: &str) -> TokenStatus {
        self.status_at(token, Utc::now())
    }

    /// Classify a token against `now`.
    ///
    /// Transitions: unparsed tokens become `Malformed` or `SignatureInvalid`,
    /// or are valid; valid tokens are then `Fresh` or `Expired`.
    pub fn status_at(&self, token: &str, now: DateTime<Utc>) -> TokenStatus {
        match self.decode(token) {
            Ok(claims) if claims.is_expired_at(now) => TokenStatus::Expired,
            Ok(claims) => TokenStatus::Fresh(claims),
            Err(TokenError::SignatureInvalid) => TokenStatus::SignatureInvalid,
            Err(TokenError::Expired) => TokenStatus::Expired,
            Err(_) => TokenStatus::Malformed,
        }
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("keys", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("expire_seconds", &self.expire_seconds)
            .finish()
    }
}

/// Codec over the development key pair shipped in `keys/`.
#[cfg(test)]
pub(crate) fn dev_codec() -> TokenCodec {
    TokenCodec::from_rsa_pem(
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/keys/dev_public.pem")),
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/keys/dev_private.pem")),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::Duration;

    use crate::types::{ROLE_ADMIN, ROLE_USER};

    fn foreign_codec() -> TokenCodec {
        TokenCodec::from_rsa_pem(
            include_bytes!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/tests/fixtures/foreign_public.pem"
            )),
            include_bytes!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/tests/fixtures/foreign_private.pem"
            )),
        )
        .unwrap()
    }

    fn user_scope() -> BTreeSet<Authority> {
        [Authority::new(ROLE_USER)].into_iter().collect()
    }

    /// Replace one character in the given segment with a different one.
    fn tamper_segment(token: &str, segment: usize) -> String {
        let mut parts: Vec<String> = token.split('.').map(|s| s.to_string()).collect();
        let mut chars: Vec<char> = parts[segment].chars().collect();
        let i = chars.len() / 2;
        chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
        parts[segment] = chars.into_iter().collect();
        parts.join(".")
    }

    #[test]
    fn test_issue_then_decode_alice() {
        let codec = dev_codec();
        let token = codec.issue(&Username::new("alice"), &user_scope()).unwrap();

        assert_eq!(token.split('.').count(), 3);
        assert!(codec.verify(&token));

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.subject().as_str(), "alice");
        assert_eq!(claims.authorities(), user_scope());
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert_eq!(claims.exp - claims.iat, DEFAULT_EXPIRE_SECONDS);
    }

    #[test]
    fn test_scope_is_order_insensitive_set() {
        let codec = dev_codec();
        let authorities: BTreeSet<Authority> = [ROLE_USER, ROLE_ADMIN, "REPORTS_READ"]
            .into_iter()
            .map(Authority::from)
            .collect();

        let token = codec.issue(&Username::new("bob"), &authorities).unwrap();
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.authorities(), authorities);
    }

    #[test]
    fn test_empty_authorities_roundtrip() {
        let codec = dev_codec();
        let token = codec.issue(&Username::new("carol"), &BTreeSet::new()).unwrap();

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.scope, "");
        assert!(claims.authorities().is_empty());
        assert!(codec.verify(&token));
    }

    #[test]
    fn test_claims_payload_shape() {
        let codec = dev_codec();
        let token = codec.issue(&Username::new("alice"), &user_scope()).unwrap();

        let payload = token.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["iss"], "self");
        assert_eq!(json["sub"], "alice");
        assert_eq!(json["scope"], "ROLE_USER");
        assert!(json["iat"].is_i64());
        assert!(json["exp"].is_i64());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let codec = dev_codec();
        let token = codec.issue(&Username::new("alice"), &user_scope()).unwrap();

        let tampered = tamper_segment(&token, 2);
        assert_ne!(tampered, token);
        assert!(!codec.verify(&tampered));
        assert!(!codec.status(&tampered).is_fresh());
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let codec = dev_codec();
        let token = codec.issue(&Username::new("alice"), &user_scope()).unwrap();

        let tampered = tamper_segment(&token, 1);
        assert!(!codec.verify(&tampered));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let codec = dev_codec();
        let token = foreign_codec()
            .issue(&Username::new("mallory"), &user_scope())
            .unwrap();

        assert!(!codec.verify(&token));
        assert_eq!(codec.status(&token), TokenStatus::SignatureInvalid);
        assert_eq!(codec.decode(&token), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = dev_codec().with_expire_seconds(1);
        let issued_at = Utc::now() - Duration::seconds(5);
        let token = codec
            .issue_at(&Username::new("alice"), &user_scope(), issued_at)
            .unwrap();

        assert!(!codec.verify(&token));
        assert_eq!(codec.status(&token), TokenStatus::Expired);

        // Signature is still fine, so decode succeeds.
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn test_expiry_boundary_with_fixed_clock() {
        let codec = dev_codec().with_expire_seconds(1);
        let issued_at = Utc::now();
        let token = codec
            .issue_at(&Username::new("alice"), &user_scope(), issued_at)
            .unwrap();

        assert!(codec.verify_at(&token, issued_at));
        assert!(!codec.verify_at(&token, issued_at + Duration::seconds(1)));
        assert!(!codec.verify_at(&token, issued_at + Duration::seconds(2)));
    }

    #[test]
    fn test_malformed_tokens_fail_closed() {
        let codec = dev_codec();

        for garbage in ["", "abc", "abc.def", "a.b.c", "..", "not a token at all"] {
            assert!(!codec.verify(garbage), "accepted {:?}", garbage);
            assert_eq!(codec.status(garbage), TokenStatus::Malformed, "{:?}", garbage);
        }

        assert!(matches!(codec.decode("abc"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_hs256_token_rejected() {
        let claims = TokenClaims {
            iss: "self".to_string(),
            sub: "alice".to_string(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 600,
            scope: ROLE_ADMIN.to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        assert!(!dev_codec().verify(&token));
    }

    #[test]
    fn test_custom_issuer_and_ttl() {
        let codec = dev_codec().with_issuer("authgate").with_expire_seconds(60);
        assert_eq!(codec.issuer(), "authgate");
        assert_eq!(codec.expire_seconds(), 60);

        let token = codec.issue(&Username::new("alice"), &user_scope()).unwrap();
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.iss, "authgate");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_overflowing_ttl_is_an_error() {
        let codec = dev_codec().with_expire_seconds(i64::MAX);

        let err = codec
            .issue(&Username::new("alice"), &user_scope())
            .unwrap_err();
        assert!(matches!(err, TokenError::Encoding(msg) if msg.contains("overflows")));
    }

    #[test]
    fn test_invalid_key_material() {
        let err = TokenCodec::from_rsa_pem(b"nope", b"nope").unwrap_err();
        assert!(matches!(err, TokenError::InvalidKey(_)));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let debug = format!("{:?}", dev_codec());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("BEGIN"));
    }

    #[test]
    fn test_token_error_display() {
        assert_eq!(TokenError::Expired.to_string(), "Token has expired");
        assert_eq!(
            TokenError::SignatureInvalid.to_string(),
            "Token signature is invalid"
        );
    }
}
