use anyhow::{Context, bail};
use serde::Deserialize;
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::api::{AccessPolicy, public_endpoints};
use crate::auth::{DEFAULT_EXPIRE_SECONDS, DEFAULT_ISSUER, TokenCodec};
use crate::db::DatabaseConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Longest accepted token lifetime (5 years).
pub const MAX_EXPIRE_SECONDS: i64 = 5 * 365 * 24 * 60 * 60;

/// Top-level `authgate.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    pub jwt: JwtConfig,
    /// Path patterns reachable without a token, on top of login/logout/health
    pub permit_paths: Vec<String>,
    pub authority_rules: Vec<AuthorityRule>,
    /// Users created at startup when they don't exist yet
    pub seed_users: Vec<SeedUser>,
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            jwt: JwtConfig::default(),
            permit_paths: Vec::new(),
            authority_rules: Vec::new(),
            seed_users: Vec::new(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
    /// Inline PEM; takes precedence over `public_key`
    pub public_key_pem: Option<String>,
    /// Inline PEM; takes precedence over `private_key`
    pub private_key_pem: Option<String>,
    pub expire_seconds: i64,
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            public_key: PathBuf::from("keys/dev_public.pem"),
            private_key: PathBuf::from("keys/dev_private.pem"),
            public_key_pem: None,
            private_key_pem: None,
            expire_seconds: DEFAULT_EXPIRE_SECONDS,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }
}

impl JwtConfig {
    /// Read the key pair and build the token codec.
    pub fn load_codec(&self) -> anyhow::Result<TokenCodec> {
        if self.expire_seconds <= 0 || self.expire_seconds > MAX_EXPIRE_SECONDS {
            bail!(
                "jwt.expire_seconds must be between 1 and {}, got {}",
                MAX_EXPIRE_SECONDS,
                self.expire_seconds
            );
        }

        let public_pem = read_pem(self.public_key_pem.as_deref(), &self.public_key)?;
        let private_pem = read_pem(self.private_key_pem.as_deref(), &self.private_key)?;

        let codec = TokenCodec::from_rsa_pem(public_pem.as_bytes(), private_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid JWT key material: {}", e))?
            .with_expire_seconds(self.expire_seconds)
            .with_issuer(self.issuer.clone());

        Ok(codec)
    }
}

fn read_pem(inline: Option<&str>, path: &Path) -> anyhow::Result<String> {
    if let Some(pem) = inline {
        return Ok(pem.to_string());
    }
    debug!("Reading key from {}", path.display());
    fs::read_to_string(path).with_context(|| format!("Failed to read key file {}", path.display()))
}

/// Require `authority` on every path matching `pattern`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AuthorityRule {
    pub pattern: String,
    pub authority: String,
}

#[derive(Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl fmt::Debug for SeedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedUser")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .field("roles", &self.roles)
            .finish()
    }
}

impl AppConfig {
    /// Access policy: built-in public endpoints, then configured permits,
    /// then authority rules. Everything else requires a token.
    pub fn access_policy(&self) -> AccessPolicy {
        let policy = self
            .permit_paths
            .iter()
            .fold(public_endpoints(), |policy, path| policy.permit(path));

        self.authority_rules
            .iter()
            .fold(policy, |policy, rule| {
                policy.require_authority(&rule.pattern, rule.authority.as_str())
            })
    }

    /// Expand `${VAR}` references. References in secrets must all resolve.
    fn expand(mut self) -> anyhow::Result<Self> {
        self.bind = expand_env_vars(&self.bind);

        let jwt = &mut self.jwt;
        jwt.public_key = PathBuf::from(expand_env_vars(&jwt.public_key.to_string_lossy()));
        jwt.private_key = PathBuf::from(expand_env_vars(&jwt.private_key.to_string_lossy()));
        if let Some(pem) = jwt.public_key_pem.as_mut() {
            *pem = expand_secret(pem, "jwt.public_key_pem")?;
        }
        if let Some(pem) = jwt.private_key_pem.as_mut() {
            *pem = expand_secret(pem, "jwt.private_key_pem")?;
        }
        jwt.issuer = expand_env_vars(&jwt.issuer);

        for user in &mut self.seed_users {
            user.password = expand_secret(
                &user.password,
                &format!("seed_users[{}].password", user.username),
            )?;
            if let Some(email) = user.email.as_mut() {
                *email = expand_env_vars(email);
            }
        }

        let db = &mut self.database;
        db.url = expand_env_vars(&db.url);
        if let Some(username) = db.username.as_mut() {
            *username = expand_secret(username, "database.username")?;
        }
        if let Some(password) = db.password.as_mut() {
            *password = expand_secret(password, "database.password")?;
        }

        Ok(self)
    }
}

/// Locate the config file: `$AUTHGATE_CONFIG`, then
/// `$XDG_CONFIG_HOME/authgate/authgate.json`, then `./authgate.json`.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("AUTHGATE_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("authgate").join("authgate.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("authgate.json");
    candidate.exists().then_some(candidate)
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
/// Unset variables and unterminated references are left as written.
pub fn expand_env_vars(input: &str) -> String {
    substitute(input).0
}

/// Like [`expand_env_vars`], but every reference must resolve.
pub fn expand_secret(input: &str, field: &str) -> anyhow::Result<String> {
    let (out, missing) = substitute(input);
    if !missing.is_empty() {
        bail!(
            "{} references unset environment variable(s): {}",
            field,
            missing.join(", ")
        );
    }
    Ok(out)
}

/// Expanded text plus the names of variables that were not set.
fn substitute(input: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(input.len());
    let mut missing = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let reference = &rest[start..];

        let Some(end) = reference.find('}') else {
            break;
        };

        let name = &reference[2..end];
        match env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                missing.push(name.to_string());
                out.push_str(&reference[..=end]);
            }
        }
        rest = &reference[end + 1..];
    }

    // Either no references remain or the last one was unterminated.
    match rest.find("${") {
        Some(start) => out.push_str(&rest[start..]),
        None => out.push_str(rest),
    }
    (out, missing)
}

/// Load and expand a config file.
pub fn load_config_from(path: &Path) -> anyhow::Result<AppConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    cfg.expand()
        .with_context(|| format!("Unresolved variable in config file {}", path.display()))
}

/// Load the resolved config file, or the defaults when there is none.
pub fn load_config() -> anyhow::Result<AppConfig> {
    match resolve_config_path() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_config_from(&path)
        }
        None => {
            info!("No configuration file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}
