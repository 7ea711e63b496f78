use anyhow::Result;
use authgate::auth::password::hash_password;
use authgate::config::load_config_from;
use authgate::db::UserCreate;
use authgate::types::parse_scope;
use authgate::{AppConfig, UserStore, Username, create_app, create_connection, ensure_schema};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "authgate")]
#[command(about = "Stateless JWT authentication service")]
struct Cli {
    /// Path to authgate.json (overrides discovery)
    #[arg(long, global = true, env = "AUTHGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,
        #[arg(long, env = "AUTHGATE_DB_URL")]
        db_url: Option<String>,
    },
    /// Initialize the database schema
    Init {
        #[arg(long, env = "AUTHGATE_DB_URL")]
        db_url: Option<String>,
    },
    /// Create a role if it doesn't exist
    CreateRole {
        name: String,
        #[arg(long, env = "AUTHGATE_DB_URL")]
        db_url: Option<String>,
    },
    /// Create a user with a hashed password
    CreateUser {
        username: String,
        #[arg(long, env = "AUTHGATE_NEW_USER_PASSWORD")]
        password: String,
        /// Comma-separated role names; created when missing
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "AUTHGATE_DB_URL")]
        db_url: Option<String>,
    },
    /// Print the Argon2 hash of a password
    HashPassword { password: String },
    /// Issue a token with the configured key pair, without a login
    IssueToken {
        username: String,
        /// Space-separated authorities
        #[arg(long, default_value = "")]
        scope: String,
    },
}

fn load(config: Option<PathBuf>) -> Result<AppConfig> {
    match config {
        Some(path) => load_config_from(&path),
        None => authgate::load_config(),
    }
}

async fn open_store(config: &AppConfig, db_url: Option<String>) -> Result<UserStore> {
    let mut db_config = config.database.clone();
    if let Some(url) = db_url {
        db_config.url = url;
    }
    info!("Using database url: {}", db_config.url);

    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;
    Ok(UserStore::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("authgate=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let mut config = load(cli.config)?;

    match cli.command {
        Commands::Server { bind, db_url } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(url) = db_url {
                config.database.url = url;
            }
            info!("Using database url for server: {}", config.database.url);

            let app = create_app(&config).await?;
            let listener = tokio::net::TcpListener::bind(&config.bind).await?;

            info!("Server listening on http://{}", config.bind);
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
        }
        Commands::Init { db_url } => {
            info!("Initializing database...");
            open_store(&config, db_url).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateRole { name, db_url } => {
            let store = open_store(&config, db_url).await?;
            let role = store.ensure_role(&name).await?;
            println!("Role '{}' ready", role.name);
        }
        Commands::CreateUser {
            username,
            password,
            roles,
            email,
            db_url,
        } => {
            let store = open_store(&config, db_url).await?;
            let roles: Vec<String> = roles
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            for role in &roles {
                store.ensure_role(role).await?;
            }

            let user = store
                .create_user(&UserCreate {
                    username,
                    email,
                    password,
                    roles,
                })
                .await?;

            println!("User created successfully!");
            println!();
            println!("  Username: {}", user.username);
            if let Some(email) = &user.email {
                println!("  Email:    {}", email);
            }
            if user.roles.is_empty() {
                println!("  Roles:    -");
            } else {
                println!("  Roles:    {}", user.roles.join(", "));
            }
        }
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password)?);
        }
        Commands::IssueToken { username, scope } => {
            let codec = config.jwt.load_codec()?;
            let token = codec.issue(&Username::new(username), &parse_scope(&scope))?;
            println!("{}", token);
        }
    }

    Ok(())
}
