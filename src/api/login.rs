//! Login and logout handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use super::filter::ClientInfo;
use crate::auth::{AuthenticatedContext, AuthenticationError, AuthenticationRequest};
use crate::db::{AuditAction, AuditLogCreate};
use crate::error::ApiError;

/// Body of `POST /login`.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonToken {
    pub token: String,
}

pub const LOGOUT_MESSAGE: &str = "Bye!";

/// `POST /login`: exchange a username and password for a signed token.
///
/// Every verification failure produces the same 401 body.
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    body: Bytes,
) -> Result<Json<JsonToken>, ApiError> {
    let credentials: LoginRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!("Unparsable login request: {}", e);
        ApiError::MalformedRequest("Expected JSON body with username and password".to_string())
    })?;

    let request = AuthenticationRequest::username_password(credentials.username, credentials.password);
    let username = request.principal().to_string();

    let identity = match state.auth_manager.authenticate(&request).await {
        Ok(identity) => identity,
        Err(err) => {
            match &err {
                AuthenticationError::Lookup(_) | AuthenticationError::Hashing(_) => {
                    error!("Login for '{}' failed: {}", username, err)
                }
                _ => warn!("Login for '{}' rejected: {}", username, err),
            }
            record(
                &state,
                AuditLogCreate::new(AuditAction::LoginFailed, Some(&username))
                    .with_details(json!({ "reason": err.to_string() }))
                    .with_client_info(client.ip_address, client.user_agent),
            )
            .await;
            return Err(ApiError::AuthenticationFailed);
        }
    };

    let token = state
        .codec
        .issue(identity.username(), identity.authorities())
        .map_err(|e| ApiError::Internal(format!("token issuance failed: {}", e)))?;

    info!("User '{}' logged in", identity.username());
    record(
        &state,
        AuditLogCreate::new(AuditAction::Login, Some(identity.username().as_str()))
            .with_client_info(client.ip_address, client.user_agent),
    )
    .await;

    Ok(Json(JsonToken { token }))
}

/// `POST /logout`: nothing to invalidate server side.
pub async fn logout(
    State(state): State<AppState>,
    ctx: Option<AuthenticatedContext>,
) -> Json<&'static str> {
    if let Some(ctx) = ctx {
        info!("User '{}' logged out", ctx.subject());
        record(
            &state,
            AuditLogCreate::new(AuditAction::Logout, Some(ctx.subject().as_str())).with_client_info(
                ctx.ip_address().map(str::to_string),
                ctx.user_agent().map(str::to_string),
            ),
        )
        .await;
    }

    Json(LOGOUT_MESSAGE)
}

/// Audit failures never fail the request.
async fn record(state: &AppState, entry: AuditLogCreate) {
    if let Some(store) = &state.user_store {
        if let Err(e) = store.audit_log(entry).await {
            warn!("Failed to write audit entry: {:#}", e);
        }
    }
}
