// HTTP surface: login, logout and the protected routes behind the gate

pub mod filter;
pub mod gate;
pub mod login;

use axum::{
    Router,
    http::Uri,
    middleware,
    response::Json,
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthenticatedContext, AuthenticationManager, TokenCodec, UserStore};
use crate::error::ApiError;

pub use filter::{ClientInfo, authenticate_headers, bearer_token, identity_filter};
pub use gate::{AccessDecision, AccessPolicy, AccessRule, PathPattern, authorization_gate};
pub use login::{JsonToken, LOGOUT_MESSAGE, LoginRequest};

/// Shared, read-only request state. Nothing in here changes per request.
#[derive(Clone)]
pub struct AppState {
    pub codec: Arc<TokenCodec>,
    pub auth_manager: Arc<AuthenticationManager>,
    pub policy: Arc<AccessPolicy>,
    /// Audit sink; login still works without one
    pub user_store: Option<UserStore>,
}

impl AppState {
    pub fn new(
        codec: Arc<TokenCodec>,
        auth_manager: Arc<AuthenticationManager>,
        policy: Arc<AccessPolicy>,
    ) -> Self {
        Self {
            codec,
            auth_manager,
            policy,
            user_store: None,
        }
    }

    pub fn with_user_store(mut self, store: UserStore) -> Self {
        self.user_store = Some(store);
        self
    }
}

/// Policy with the routes that must stay reachable without a token.
pub fn public_endpoints() -> AccessPolicy {
    AccessPolicy::new()
        .permit("/login")
        .permit("/logout")
        .permit("/health")
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(login::login))
        .route("/logout", post(login::logout))
        .route("/hello", get(hello))
        .route("/me", get(me))
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), identity_filter))
                .layer(middleware::from_fn_with_state(state.clone(), authorization_gate)),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn hello() -> &'static str {
    "Hello Admin"
}

/// Identity the token carried, as seen by the server.
async fn me(ctx: AuthenticatedContext) -> Json<Value> {
    Json(serde_json::json!({
        "subject": ctx.subject(),
        "authorities": ctx.authorities(),
    }))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
