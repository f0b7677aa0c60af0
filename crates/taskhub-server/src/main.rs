use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use taskhub_config::TaskhubConfig;
use taskhub_db::TaskDb;
use taskhub_server::middleware::HealthCheckState;
use tracing::{info, warn};

/// Taskhub backend with database connection resilience.
#[derive(Debug, Parser)]
#[command(name = "taskhub", version)]
struct Cli {
    /// Only log errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug output.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve {
        /// Override `server.host`.
        #[arg(long)]
        host: Option<String>,
        /// Override `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Open the database, ping it once, and report.
    Check,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("taskhub error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let mut config = TaskhubConfig::load_with_dotenv().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            serve(&config).await
        }
        Command::Check => {
            config.validate()?;
            check(&config).await
        }
    }
}

async fn serve(config: &TaskhubConfig) -> anyhow::Result<()> {
    let db = TaskDb::open(config)
        .await
        .with_context(|| format!("failed to open database '{}'", config.database.url))?;
    info!(
        environment = config.general.environment.as_str(),
        max_retries = db.executor().config().max_retries,
        "database opened"
    );

    let state = Arc::new(HealthCheckState::new(db.health().clone(), &config.health));
    let app = taskhub_server::router(state, Router::new());
    let (_, listener) = taskhub_server::bind(&config.server).await?;

    taskhub_server::serve(listener, app, shutdown_signal()).await?;

    if let Err(error) = db.disconnect().await {
        warn!(%error, "failed to close database connection");
    }
    info!("taskhub stopped");
    Ok(())
}

async fn check(config: &TaskhubConfig) -> anyhow::Result<()> {
    let db = TaskDb::open(config).await?;
    db.execute_safe_query(Some("startup check"), || db.health().ping())
        .await
        .context("database liveness check failed")?;
    println!("database '{}' is reachable", config.database.url);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("TASKHUB_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
