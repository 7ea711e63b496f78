use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{RecordId, sql::Datetime};

/// Persisted role in the role catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Database identifier
    pub id: RecordId,
    /// Authority name granted by this role (e.g., "ROLE_ADMIN")
    pub name: String,
    pub created_at: Option<Datetime>,
}

/// Persisted user with credential hash and granted roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Database identifier
    pub id: RecordId,
    /// Unique login name
    pub username: String,
    /// Optional contact email
    pub email: Option<String>,
    /// Argon2 PHC string; the salt is embedded
    pub password_hash: String,
    /// Role names granted to this user
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether the user may log in
    pub is_active: bool,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// Payload for creating a new user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub email: Option<String>,
    /// Plaintext password; hashed by the store before it is persisted.
    pub password: String,
    pub roles: Vec<String>,
}

/// Audit log action types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Credentials were accepted and a token issued
    Login,
    /// Credentials were rejected
    LoginFailed,
    /// Client called the logout endpoint
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
        }
    }
}

/// Persisted audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRecord {
    /// Database identifier
    pub id: RecordId,
    /// Username the entry refers to, when known
    pub username: Option<String>,
    /// The action that was performed
    pub action: String,
    /// Additional context
    pub details: Option<Value>,
    /// Client IP address
    pub ip_address: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// When the action occurred
    pub created_at: Option<Datetime>,
}

/// Payload for writing an audit log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLogCreate {
    pub username: Option<String>,
    pub action: String,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditLogCreate {
    pub fn new(action: AuditAction, username: Option<&str>) -> Self {
        Self {
            username: username.map(|s| s.to_string()),
            action: action.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_client_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}
