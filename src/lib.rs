// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

// Re-export key types and functions
pub use api::{AccessPolicy, AppState, create_router};
pub use auth::{
    AuthenticatedContext, AuthenticationManager, Identity, TokenClaims, TokenCodec, UserLookup,
    UserStore,
};
pub use config::{AppConfig, load_config};
pub use db::{DatabaseConfig, Db, create_connection, ensure_schema};
pub use error::ApiError;
pub use types::{Authority, Username};

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use db::UserCreate;

/// Create roles and users listed in the config that don't exist yet.
pub async fn seed_users(store: &UserStore, config: &AppConfig) -> Result<usize> {
    let mut created = 0;

    for seed in &config.seed_users {
        for role in &seed.roles {
            store.ensure_role(role).await?;
        }

        if store.exists_by_username(&seed.username).await? {
            continue;
        }

        store
            .create_user(&UserCreate {
                username: seed.username.clone(),
                email: seed.email.clone(),
                password: seed.password.clone(),
                roles: seed.roles.clone(),
            })
            .await?;
        created += 1;
    }

    if created > 0 {
        info!("Seeded {} user(s)", created);
    }
    Ok(created)
}

/// Convenience function to build the fully wired HTTP application.
///
/// Connects to the database, applies the schema, seeds configured users and
/// loads the signing keys.
pub async fn create_app(config: &AppConfig) -> Result<axum::Router> {
    let db = create_connection(config.database.clone()).await?;
    ensure_schema(&db).await?;

    let store = UserStore::new(db);
    seed_users(&store, config).await?;

    let codec = config.jwt.load_codec()?;
    info!(
        issuer = codec.issuer(),
        expire_seconds = codec.expire_seconds(),
        "Token codec ready"
    );

    let auth_manager = AuthenticationManager::with_user_lookup(Arc::new(store.clone()));
    let state = AppState::new(
        Arc::new(codec),
        Arc::new(auth_manager),
        Arc::new(config.access_policy()),
    )
    .with_user_store(store);

    Ok(create_router(state))
}
