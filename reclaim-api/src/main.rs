//! reclaim-api - journaling and recovery backend
//!
//! `reclaim-api [serve]` runs the HTTP service. The remaining subcommands
//! manage accounts directly in the database: there is no sign-up endpoint,
//! so operators create users and hand out bearer tokens from the CLI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reclaim_common::config::{load_config, resolve_config_path};
use reclaim_common::db::{init_database, SubscriptionTier};
use reclaim_common::events::EventBus;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reclaim_api::api::buildinfo::BuildInfo;
use reclaim_api::config::{
    build_text_generator, build_transcription_provider, resolve_signing_secret, ServiceConfig,
};
use reclaim_api::db::{profiles, tokens};
use reclaim_api::services::StorageService;
use reclaim_api::AppState;

/// Command-line arguments for reclaim-api
#[derive(Parser, Debug)]
#[command(name = "reclaim-api")]
#[command(about = "Journaling and recovery backend")]
#[command(version)]
struct Args {
    /// Config file (overrides RECLAIM_CONFIG and the user config file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, global = true, env = "RECLAIM_DATABASE")]
    database: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, global = true, env = "RECLAIM_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,

    /// Create a user and print a bearer token for it
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "foundation")]
        tier: SubscriptionTier,
    },

    /// Issue a new bearer token for an existing user
    IssueToken {
        #[arg(long)]
        email: String,
        /// Token lifetime in days; omitted means no expiry
        #[arg(long)]
        ttl_days: Option<i64>,
        /// Revoke the user's existing tokens first
        #[arg(long)]
        revoke_existing: bool,
    },

    /// Change a user's subscription tier
    SetTier {
        #[arg(long)]
        email: String,
        #[arg(long)]
        tier: SubscriptionTier,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let toml = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    let config = ServiceConfig::resolve(toml, args.database, args.port);

    init_tracing(&config.toml.logging.level);

    if let Some(path) = &config_path {
        info!("Configuration file: {}", path.display());
    }
    info!("Database: {}", config.database_path.display());

    let db = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db).await,
        Command::CreateUser {
            email,
            display_name,
            tier,
        } => {
            let profile = profiles::create_profile(&db, &email, display_name.as_deref(), tier).await?;
            let token = tokens::issue_token(&db, profile.id, None).await?;
            println!("user_id: {}", profile.id);
            println!("tier:    {}", profile.subscription_tier);
            println!("token:   {}", token);
            Ok(())
        }
        Command::IssueToken {
            email,
            ttl_days,
            revoke_existing,
        } => {
            let profile = find_profile(&db, &email).await?;
            if revoke_existing {
                let revoked = tokens::revoke_all(&db, profile.id).await?;
                info!(user_id = %profile.id, revoked, "Revoked existing tokens");
            }
            let ttl = match ttl_days {
                Some(days) if days <= 0 => bail!("--ttl-days must be positive"),
                Some(days) => Some(chrono::Duration::days(days)),
                None => None,
            };
            println!("{}", tokens::issue_token(&db, profile.id, ttl).await?);
            Ok(())
        }
        Command::SetTier { email, tier } => {
            let profile = find_profile(&db, &email).await?;
            profiles::set_tier(&db, profile.id, tier).await?;
            println!("{}: {} -> {}", profile.email, profile.subscription_tier, tier);
            Ok(())
        }
    }
}

fn init_tracing(configured_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{lvl},reclaim_api={lvl},tower_http={lvl}", lvl = configured_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn find_profile(db: &SqlitePool, email: &str) -> Result<reclaim_common::db::Profile> {
    match profiles::find_by_email(db, email).await? {
        Some(profile) => Ok(profile),
        None => bail!("No user with email {}", email),
    }
}

async fn serve(config: ServiceConfig, db: SqlitePool) -> Result<()> {
    let build = BuildInfo::current();
    info!(
        version = %build.version,
        git_hash = %build.git_hash,
        build_timestamp = %build.build_timestamp,
        build_profile = %build.build_profile,
        "Starting reclaim-api"
    );

    let secret = resolve_signing_secret(&db, config.toml.storage.signing_secret.as_deref()).await?;

    tokio::fs::create_dir_all(&config.storage_root)
        .await
        .with_context(|| format!("Failed to create storage root {}", config.storage_root.display()))?;
    info!("Storage root: {}", config.storage_root.display());

    let storage = StorageService::new(
        config.storage_root.clone(),
        secret,
        &config.public_base_url(),
        config.toml.storage.url_ttl_secs,
    );

    let event_bus = EventBus::new(100);

    let state = AppState::new(
        db,
        event_bus,
        storage,
        build_transcription_provider(&config.toml.gladia),
        build_text_generator(&config.toml.gemini),
        &config.toml.transcription,
        config.toml.storage.max_upload_bytes,
    );

    let shutdown = CancellationToken::new();
    let sweeper = state.reconciler.spawn_sweeper(
        Duration::from_secs(config.toml.transcription.sweep_interval_secs),
        shutdown.clone(),
    );

    let app = reclaim_api::build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweeper task ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
