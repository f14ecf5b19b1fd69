use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parapet::api::{run_server, AppState};
use parapet::cloudsync::CloudSyncClient;
use parapet::config::Config;
use parapet::execution::ExecutionEngine;
use parapet::scheduler::Scheduler;
use parapet::shutdown::ShutdownCoordinator;
use parapet::storage::{Environment, SqliteStorage, User};
use parapet::workflow::Org;

#[derive(Parser)]
#[command(name = "parapet")]
#[command(about = "Control plane for a security-automation workflow engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane (API + scheduler)
    Server {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage API users
    Users {
        #[command(subcommand)]
        action: UserActions,
    },
    /// Manage worker environments
    Environments {
        #[command(subcommand)]
        action: EnvironmentActions,
    },
}

#[derive(Subcommand)]
enum UserActions {
    /// Create a user and print their api key
    Add {
        username: String,
        /// admin | user | scheduler
        #[arg(short, long, default_value = "user")]
        role: String,
        /// Organization id the user acts in
        #[arg(long)]
        org_id: String,
        /// Organization display name
        #[arg(long, default_value = "")]
        org_name: String,
    },
}

#[derive(Subcommand)]
enum EnvironmentActions {
    /// Register a worker environment
    Add {
        name: String,
        #[arg(long)]
        org_id: String,
        /// onprem | cloud
        #[arg(long, default_value = "onprem")]
        env_type: String,
        /// Make this the org's default environment
        #[arg(long)]
        default: bool,
    },
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStorage::open(&path)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "parapet=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Server { port } => cmd_server(config, port).await?,
        Commands::Users { action } => match action {
            UserActions::Add {
                username,
                role,
                org_id,
                org_name,
            } => cmd_users_add(&config, &username, &role, &org_id, &org_name).await?,
        },
        Commands::Environments { action } => match action {
            EnvironmentActions::Add {
                name,
                org_id,
                env_type,
                default,
            } => cmd_environments_add(&config, &name, &org_id, &env_type, default).await?,
        },
    }

    Ok(())
}

async fn cmd_server(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    parapet::metrics::init_metrics();

    let storage = open_storage(&config)?;
    let cloudsync = CloudSyncClient::new(&config.cloudsync.url, &config.cloudsync.api_key);
    let engine = ExecutionEngine::new(storage.clone(), cloudsync.clone());
    let scheduler = Arc::new(Scheduler::new(engine.clone(), cloudsync));

    // The store is the ledger; re-register whatever it declares.
    let reloaded = scheduler.reload().await?;
    tracing::info!("Re-registered {} persisted schedule(s)", reloaded);

    let shutdown = Arc::new(ShutdownCoordinator::new());
    shutdown.start_signal_listener();

    let state = AppState {
        storage,
        engine,
        scheduler: scheduler.clone(),
        shutdown: shutdown.clone(),
    };

    let addr = std::net::SocketAddr::new(
        config.server.host.parse()?,
        port.unwrap_or(config.server.port),
    );
    run_server(state, addr).await?;

    scheduler.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn cmd_users_add(
    config: &Config,
    username: &str,
    role: &str,
    org_id: &str,
    org_name: &str,
) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        role: role.to_string(),
        api_key: uuid::Uuid::new_v4().to_string(),
        active_org: Org {
            id: org_id.to_string(),
            name: org_name.to_string(),
        },
    };
    storage.set_user(&user).await?;

    println!("Created user {} ({})", user.username, user.id);
    println!("API key: {}", user.api_key);
    Ok(())
}

async fn cmd_environments_add(
    config: &Config,
    name: &str,
    org_id: &str,
    env_type: &str,
    default: bool,
) -> anyhow::Result<()> {
    if env_type != "onprem" && env_type != "cloud" {
        anyhow::bail!("Environment type must be onprem or cloud");
    }

    let storage = open_storage(config)?;
    storage
        .set_environment(&Environment {
            name: name.to_string(),
            org_id: org_id.to_string(),
            env_type: env_type.to_string(),
            archived: false,
            default,
        })
        .await?;

    println!("Registered {} environment {} for org {}", env_type, name, org_id);
    Ok(())
}
