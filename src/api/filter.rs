//! Request identity filter.
//!
//! Runs once per request before routing. A fresh bearer token becomes an
//! [`AuthenticatedContext`] in the request's extensions; a missing, expired or
//! invalid token leaves the request anonymous and lets the gate decide.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::request::Parts;
use http::{HeaderMap, header};
use tracing::debug;

use super::AppState;
use crate::auth::{AuthenticatedContext, TokenCodec, TokenStatus};
use crate::error::ApiError;

const BEARER_PREFIX: &str = "Bearer ";

/// Client metadata recorded in audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    fn from_parts(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let ip_address = forwarded.or_else(|| connect_info.map(|ci| ci.0.ip().to_string()));

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        Self {
            ip_address,
            user_agent,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(
            &parts.headers,
            parts.extensions.get::<ConnectInfo<SocketAddr>>(),
        ))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    (!token.is_empty()).then_some(token)
}

/// Build an authenticated context from the request headers, if they carry a
/// fresh token.
pub fn authenticate_headers(codec: &TokenCodec, headers: &HeaderMap) -> Option<AuthenticatedContext> {
    let token = bearer_token(headers)?;

    match codec.status(token) {
        TokenStatus::Fresh(claims) => Some(AuthenticatedContext::new(
            claims.subject(),
            claims.authorities(),
        )),
        other => {
            debug!(status = other.label(), "Ignoring bearer token");
            None
        }
    }
}

/// Middleware attaching the caller's identity to the request.
pub async fn identity_filter(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Only this filter may place an identity on the request.
    request.extensions_mut().remove::<AuthenticatedContext>();

    if let Some(ctx) = authenticate_headers(&state.codec, request.headers()) {
        let client = ClientInfo::from_parts(
            request.headers(),
            request.extensions().get::<ConnectInfo<SocketAddr>>(),
        );
        debug!(subject = %ctx.subject(), "Request authenticated");
        request
            .extensions_mut()
            .insert(ctx.with_client_info(client.ip_address, client.user_agent));
    }

    next.run(request).await
}

/// Handlers that need an identity take `AuthenticatedContext` directly;
/// missing identity is a 401.
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedContext>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for AuthenticatedContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthenticatedContext>().cloned())
    }
}
