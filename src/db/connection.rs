use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::debug;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("AUTHGATE_DB_URL")
                .unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("AUTHGATE_DB_NAMESPACE")
                .unwrap_or_else(|_| "authgate".to_string()),
            database: env::var("AUTHGATE_DB_DATABASE")
                .unwrap_or_else(|_| "identity".to_string()),
            username: env::var("AUTHGATE_DB_USERNAME").ok(),
            password: env::var("AUTHGATE_DB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Define the user, role and audit tables. Safe to run repeatedly.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // Role catalogue
        "DEFINE TABLE IF NOT EXISTS role SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS name ON TABLE role TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE role TYPE datetime DEFAULT time::now();
         DEFINE INDEX IF NOT EXISTS role_name ON TABLE role COLUMNS name UNIQUE;",

        // Users carry role names directly; every name must exist in `role`
        "DEFINE TABLE IF NOT EXISTS user SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS username ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS email ON TABLE user TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS password_hash ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS roles ON TABLE user TYPE array<string> DEFAULT [];
         DEFINE FIELD IF NOT EXISTS is_active ON TABLE user TYPE bool DEFAULT true;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE user TYPE datetime DEFAULT time::now();
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE user TYPE datetime VALUE time::now();
         DEFINE INDEX IF NOT EXISTS user_username ON TABLE user COLUMNS username UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_email ON TABLE user COLUMNS email UNIQUE;",

        // Authentication audit trail
        "DEFINE TABLE IF NOT EXISTS audit_log SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS username ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS action ON TABLE audit_log TYPE string;
         DEFINE FIELD IF NOT EXISTS details ON TABLE audit_log FLEXIBLE TYPE option<object>;
         DEFINE FIELD IF NOT EXISTS ip_address ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS user_agent ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE audit_log TYPE datetime DEFAULT time::now();
         DEFINE INDEX IF NOT EXISTS audit_log_username ON TABLE audit_log COLUMNS username;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    debug!("Identity schema ensured");
    Ok(())
}
