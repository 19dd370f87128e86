//! Picard MCP Server - Entry Point
//!
//! `serve` runs the HTTP server; `register-client` and `create-user` are
//! one-shot administration commands against the configured database.

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use picard_mcp::server::oauth::{ClientRegistration, OAuthProvider};
use picard_mcp::users::UserService;
use picard_mcp::{Config, PicardServer, Repositories};

#[derive(Parser, Debug)]
#[command(name = "picard-mcp")]
#[command(about = "OAuth-protected memory server with semantic queries")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// SQLite URL, e.g. sqlite://picard.db (in-memory storage when unset)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// HTTP server port
        #[arg(long, default_value = "8000", env = "PORT")]
        port: u16,

        /// Public base URL used as issuer (e.g., https://memory.example.com)
        #[arg(long, env = "PICARD_BASE_URL")]
        base_url: Option<String>,
    },

    /// Register an OAuth client and print its credentials
    RegisterClient {
        /// Human-readable client name
        #[arg(long)]
        name: String,

        /// Allowed redirect URI (repeatable)
        #[arg(long = "redirect-uri", required = true)]
        redirect_uris: Vec<String>,

        /// Space-delimited allowed scopes (all scopes when omitted)
        #[arg(long)]
        scope: Option<String>,

        /// Register a public client (no secret, PKCE only)
        #[arg(long)]
        public: bool,
    },

    /// Create a user account
    CreateUser {
        #[arg(long)]
        username: String,

        #[arg(long, env = "PICARD_USER_PASSWORD")]
        password: String,

        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

/// One-shot commands are useless without persistent storage.
fn require_database(config: &Config) -> anyhow::Result<()> {
    if config.database_url.is_none() {
        anyhow::bail!("DATABASE_URL (or --database-url) is required for this command");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = Config::from_env()?;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }

    match cli.command {
        Command::Serve { port, base_url } => {
            config.port = port;
            if let Some(url) = base_url {
                config.base_url = url.trim_end_matches('/').to_string();
            }

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                port,
                base_url = %config.base_url,
                persistent = config.database_url.is_some(),
                "Starting Picard MCP server"
            );

            PicardServer::from_config(&config).await?.run_http().await?;
        }
        Command::RegisterClient { name, redirect_uris, scope, public } => {
            require_database(&config)?;
            let repos = Repositories::from_config(&config).await?;
            let provider = OAuthProvider::new(repos.oauth, &config);

            let registered = provider
                .register_client(ClientRegistration {
                    client_name: name,
                    redirect_uris,
                    scopes: scope,
                    is_confidential: !public,
                })
                .await?;

            println!("client_id:     {}", registered.client.client_id);
            if let Some(secret) = registered.client_secret {
                println!("client_secret: {secret}");
                println!("Store the secret now; it cannot be shown again.");
            }
            println!("scopes:        {}", registered.client.allowed_scopes);
        }
        Command::CreateUser { username, password, admin } => {
            require_database(&config)?;
            let repos = Repositories::from_config(&config).await?;
            let users = UserService::new(repos.users);

            let user = users.create_user(&username, &password, admin).await?;
            println!("Created user {} ({})", user.username, user.id);
        }
    }

    Ok(())
}
