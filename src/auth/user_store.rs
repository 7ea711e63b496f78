//! User and role storage.

use std::future::Future;
use std::pin::Pin;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::auth::context::Identity;
use crate::auth::password::hash_password_blocking;
use crate::db::Db;
use crate::db::schema::{AuditLogCreate, AuditLogRecord, RoleRecord, UserCreate, UserRecord};
use crate::types::Authority;

/// Source of stored identities for credential verification.
pub trait UserLookup: Send + Sync {
    /// Resolve an identity by username. `Ok(None)` when no such user exists.
    fn find_identity<'a>(
        &'a self,
        username: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Identity>>> + Send + 'a>>;
}

/// User store for database operations.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    /// Create a new user store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Get a user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM user WHERE username = $username LIMIT 1")
            .bind(("username", username.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    pub async fn exists_by_username(&self, username: &str) -> Result<bool> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    pub async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let mut res = self
            .db
            .query("SELECT * FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(!users.is_empty())
    }

    /// Create a new user, hashing the supplied password.
    ///
    /// Fails if the username or email is taken or a role does not exist.
    pub async fn create_user(&self, create: &UserCreate) -> Result<UserRecord> {
        if create.username.trim().is_empty() {
            bail!("Username must not be empty");
        }
        if self.exists_by_username(&create.username).await? {
            bail!("User '{}' already exists", create.username);
        }
        if let Some(email) = &create.email {
            if self.exists_by_email(email).await? {
                bail!("Email '{}' is already registered", email);
            }
        }
        for role in &create.roles {
            if self.find_role_by_name(role).await?.is_none() {
                bail!("Role '{}' does not exist", role);
            }
        }

        let password_hash = hash_password_blocking(&create.password).await?;

        let query = r#"
            CREATE user CONTENT {
                username: $username,
                email: $email,
                password_hash: $password_hash,
                roles: $roles,
                is_active: true
            }
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("username", create.username.clone()))
            .bind(("email", create.email.clone()))
            .bind(("password_hash", password_hash))
            .bind(("roles", create.roles.clone()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        let user = users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to create user"))?;

        info!("Created user '{}' with roles {:?}", user.username, user.roles);
        Ok(user)
    }

    /// Create a role, or return the existing one with the same name.
    pub async fn ensure_role(&self, name: &str) -> Result<RoleRecord> {
        if !Authority::new(name).is_valid() {
            bail!("Role name '{}' must be non-empty and contain no whitespace", name);
        }
        if let Some(role) = self.find_role_by_name(name).await? {
            return Ok(role);
        }

        let mut res = self
            .db
            .query("CREATE role CONTENT { name: $name }")
            .bind(("name", name.to_string()))
            .await?;

        let roles: Vec<RoleRecord> = res.take(0)?;
        let role = roles
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to create role"))?;

        debug!("Created role '{}'", role.name);
        Ok(role)
    }

    pub async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM role WHERE name = $name LIMIT 1")
            .bind(("name", name.to_string()))
            .await?;

        let roles: Vec<RoleRecord> = res.take(0)?;
        Ok(roles.into_iter().next())
    }

    pub async fn list_roles(&self) -> Result<Vec<RoleRecord>> {
        let mut res = self.db.query("SELECT * FROM role ORDER BY name").await?;
        let roles: Vec<RoleRecord> = res.take(0)?;
        Ok(roles)
    }

    /// Grant an existing role to an existing user.
    pub async fn assign_role(&self, username: &str, role: &str) -> Result<()> {
        if self.find_role_by_name(role).await?.is_none() {
            bail!("Role '{}' does not exist", role);
        }
        if !self.exists_by_username(username).await? {
            bail!("User '{}' does not exist", username);
        }

        let query = r#"
            UPDATE user SET
                roles = array::union(roles, [$role])
            WHERE username = $username
        "#;

        self.db
            .query(query)
            .bind(("username", username.to_string()))
            .bind(("role", role.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Deactivate a user account.
    pub async fn deactivate_user(&self, username: &str) -> Result<()> {
        self.set_active(username, false).await
    }

    /// Reactivate a user account.
    pub async fn reactivate_user(&self, username: &str) -> Result<()> {
        self.set_active(username, true).await
    }

    async fn set_active(&self, username: &str, is_active: bool) -> Result<()> {
        self.db
            .query("UPDATE user SET is_active = $is_active WHERE username = $username")
            .bind(("username", username.to_string()))
            .bind(("is_active", is_active))
            .await?
            .check()?;

        Ok(())
    }

    /// Write an audit log entry.
    pub async fn audit_log(&self, entry: AuditLogCreate) -> Result<()> {
        let query = r#"
            CREATE audit_log CONTENT {
                username: $username,
                action: $action,
                details: $details,
                ip_address: $ip_address,
                user_agent: $user_agent
            }
        "#;

        self.db
            .query(query)
            .bind(("username", entry.username))
            .bind(("action", entry.action))
            .bind(("details", entry.details))
            .bind(("ip_address", entry.ip_address))
            .bind(("user_agent", entry.user_agent))
            .await?
            .check()?;

        Ok(())
    }

    /// Get recent audit log entries for a user, newest first.
    pub async fn recent_audit_log(&self, username: &str, limit: u32) -> Result<Vec<AuditLogRecord>> {
        let query = r#"
            SELECT * FROM audit_log
            WHERE username = $username
            ORDER BY created_at DESC
            LIMIT $limit
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("username", username.to_string()))
            .bind(("limit", limit))
            .await?;

        let logs: Vec<AuditLogRecord> = res.take(0)?;
        Ok(logs)
    }
}

impl UserLookup for UserStore {
    fn find_identity<'a>(
        &'a self,
        username: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Identity>>> + Send + 'a>> {
        Box::pin(async move {
            let Some(user) = self.find_by_username(username).await? else {
                return Ok(None);
            };

            let authorities = user
                .roles
                .into_iter()
                .map(Authority::from)
                .filter(Authority::is_valid);

            let identity = Identity::new(user.username, user.password_hash, authorities);
            Ok(Some(if user.is_active {
                identity
            } else {
                identity.deactivated()
            }))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::schema::AuditAction;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::types::{ROLE_ADMIN, ROLE_USER};

    pub(crate) async fn setup_test_db() -> Db {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    /// Store with `alice` (ROLE_USER, password "wonderland") and
    /// `root` (ROLE_ADMIN + ROLE_USER, password "toor").
    pub(crate) async fn seeded_store() -> UserStore {
        let store = UserStore::new(setup_test_db().await);
        store.ensure_role(ROLE_USER).await.unwrap();
        store.ensure_role(ROLE_ADMIN).await.unwrap();

        store
            .create_user(&UserCreate {
                username: "alice".to_string(),
                email: Some("alice@example.com".to_string()),
                password: "wonderland".to_string(),
                roles: vec![ROLE_USER.to_string()],
            })
            .await
            .unwrap();
        store
            .create_user(&UserCreate {
                username: "root".to_string(),
                email: None,
                password: "toor".to_string(),
                roles: vec![ROLE_ADMIN.to_string(), ROLE_USER.to_string()],
            })
            .await
            .unwrap();

        store
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = seeded_store().await;

        let user = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, Some("alice@example.com".to_string()));
        assert_eq!(user.roles, vec![ROLE_USER.to_string()]);
        assert!(user.is_active);
        assert!(user.password_hash.starts_with("$argon2id$"));
        assert_ne!(user.password_hash, "wonderland");

        assert!(store.find_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists_checks() {
        let store = seeded_store().await;

        assert!(store.exists_by_username("alice").await.unwrap());
        assert!(!store.exists_by_username("bob").await.unwrap());
        assert!(store.exists_by_email("alice@example.com").await.unwrap());
        assert!(!store.exists_by_email("bob@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = seeded_store().await;

        let result = store
            .create_user(&UserCreate {
                username: "alice".to_string(),
                email: None,
                password: "other".to_string(),
                roles: vec![],
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_email_unique_at_schema_level() {
        let store = seeded_store().await;

        // Bypasses the create_user check
        let result = store
            .db
            .query("CREATE user CONTENT { username: 'mallory', email: 'alice@example.com', password_hash: 'x' }")
            .await
            .and_then(|res| res.check());
        assert!(result.is_err());

        // Users without an email do not collide with each other
        store
            .create_user(&UserCreate {
                username: "bob".to_string(),
                email: None,
                password: "builder".to_string(),
                roles: vec![],
            })
            .await
            .unwrap();
        assert!(store.find_by_username("bob").await.unwrap().is_some());
        assert!(store.find_by_username("root").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_role_rejected() {
        let store = seeded_store().await;

        let result = store
            .create_user(&UserCreate {
                username: "bob".to_string(),
                email: None,
                password: "builder".to_string(),
                roles: vec!["ROLE_GHOST".to_string()],
            })
            .await;
        assert!(result.is_err());
        assert!(!store.exists_by_username("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_role_is_idempotent() {
        let store = UserStore::new(setup_test_db().await);

        let first = store.ensure_role(ROLE_ADMIN).await.unwrap();
        let second = store.ensure_role(ROLE_ADMIN).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_roles().await.unwrap().len(), 1);

        assert!(store.ensure_role("ROLE WITH SPACE").await.is_err());
    }

    #[tokio::test]
    async fn test_assign_role() {
        let store = seeded_store().await;

        store.assign_role("alice", ROLE_ADMIN).await.unwrap();
        store.assign_role("alice", ROLE_ADMIN).await.unwrap();

        let user = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.roles.len(), 2);
        assert!(user.roles.contains(&ROLE_ADMIN.to_string()));

        assert!(store.assign_role("alice", "ROLE_GHOST").await.is_err());
        assert!(store.assign_role("nobody", ROLE_USER).await.is_err());
    }

    #[tokio::test]
    async fn test_find_identity() {
        let store = seeded_store().await;

        let identity = store.find_identity("root").await.unwrap().unwrap();
        assert_eq!(identity.username().as_str(), "root");
        assert!(identity.is_active());
        assert!(identity.authorities().contains(ROLE_ADMIN));
        assert!(identity.authorities().contains(ROLE_USER));

        assert!(store.find_identity("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deactivated_identity() {
        let store = seeded_store().await;

        store.deactivate_user("alice").await.unwrap();
        let identity = store.find_identity("alice").await.unwrap().unwrap();
        assert!(!identity.is_active());

        store.reactivate_user("alice").await.unwrap();
        let identity = store.find_identity("alice").await.unwrap().unwrap();
        assert!(identity.is_active());
    }

    #[tokio::test]
    async fn test_audit_log() {
        let store = seeded_store().await;

        store
            .audit_log(AuditLogCreate::new(AuditAction::Login, Some("alice")))
            .await
            .unwrap();
        store
            .audit_log(
                AuditLogCreate::new(AuditAction::Logout, Some("alice"))
                    .with_client_info(Some("127.0.0.1".to_string()), None),
            )
            .await
            .unwrap();

        let logs = store.recent_audit_log("alice", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().any(|l| l.action == "login"));
        assert!(logs.iter().any(|l| l.action == "logout"));

        assert!(store.recent_audit_log("root", 10).await.unwrap().is_empty());
    }
}
