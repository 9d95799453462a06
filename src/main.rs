//! YummyVerse - Artifact tracking backend
//!
//! Serves the records API, recovers state from the storage root on startup
//! and emails each visitor their QR code once all artifacts are in.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yummyverse::{
    api::build_app,
    config::YummyConfig,
    notify::{EmailDispatcher, NotificationQueue},
    records::{FsBackend, RecordStore, RecordsState, RecoveryLoader},
};

#[derive(Parser)]
#[command(name = "yummyverse")]
#[command(version)]
#[command(about = "Artifact tracking backend with completion notifications")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "YUMMYVERSE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Log emails instead of sending them
        #[arg(long)]
        debug: bool,
    },

    /// List records recovered from the storage root
    Records,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("yummyverse={},tower_http=debug", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match cli.config {
        Some(path) => YummyConfig::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => YummyConfig::default(),
    };

    match cli.command {
        Commands::Serve { host, port, debug } => {
            run_server(config, host, port, debug).await?;
        }
        Commands::Records => {
            list_records(&config).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_server(
    mut config: YummyConfig,
    host: Option<String>,
    port: Option<u16>,
    debug: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.email.debug |= debug;

    let root = config.storage.resolved_path();
    tracing::info!("Starting YummyVerse with storage root {}", root.display());

    let backend = Arc::new(
        FsBackend::open(root)
            .await
            .context("Failed to open storage root")?,
    );
    let dispatcher = Arc::new(EmailDispatcher::new(config.email.clone()));
    let queue = Arc::new(NotificationQueue::start(&config.notify, dispatcher));
    let store = Arc::new(
        RecordStore::open(backend, queue.clone())
            .await
            .context("Failed to recover records")?,
    );

    let app = build_app(RecordsState { store }, queue.clone(), &config.server);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("YummyVerse is listening on {}. Press Ctrl+C to stop.", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Server error")?;

    tracing::info!("Shutting down...");
    queue.shutdown().await;
    let stats = queue.stats();
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        "Notification queue drained"
    );

    Ok(())
}

async fn list_records(config: &YummyConfig) -> Result<()> {
    let backend = Arc::new(FsBackend::open(config.storage.resolved_path()).await?);
    let records = RecoveryLoader::new(backend).load().await?;

    if records.is_empty() {
        println!("No records found");
        return Ok(());
    }

    println!("{:<40} {:<8} {:<30} MISSING", "ID", "READY", "EMAIL");
    for record in &records {
        let missing: Vec<String> = record
            .slots
            .missing()
            .iter()
            .map(|kind| kind.to_string())
            .collect();
        println!(
            "{:<40} {:<8} {:<30} {}",
            record.id,
            record.is_ready(),
            record.metadata.contact_address,
            missing.join(",")
        );
    }

    Ok(())
}

fn show_config(config: Option<&YummyConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
