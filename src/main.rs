use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use github_runner::cli::{run_command, Cli, Commands};
use github_runner::config::{locate_config_file, Config, LogFormat};
use github_runner::github::{ClientSettings, GitHubClient};
use github_runner::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_file = locate_config_file(cli.config.as_deref())?;
    let config = Config::load(&config_file.path)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();
    init_logging(&log_level, config.logging.format);

    if config_file.created {
        tracing::info!("Created empty config file at {}", config_file.path.display());
    }
    tracing::info!("Loaded configuration from {}", config_file.path.display());

    let cancel = CancellationToken::new();

    match &cli.command {
        Commands::Server => run_server(config, cancel).await,
        command => run_command(command, &config, cancel).await,
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

async fn run_server(config: Config, cancel: CancellationToken) -> Result<()> {
    tracing::info!("Starting githubrunner v{}", env!("CARGO_PKG_VERSION"));

    let webhook_secret = config
        .github
        .webhook_secret()
        .context("A webhook secret is required to run the server")?
        .to_string();
    let settings =
        ClientSettings::from_config(&config.github).context("Invalid GitHub App configuration")?;
    let client =
        GitHubClient::new(settings, cancel.clone()).context("Failed to create GitHub client")?;

    // Resolve the installation and mint the first token so a misconfigured
    // app fails at startup.
    let token = client
        .credentials()
        .ensure_valid_token()
        .await
        .context("Failed to authenticate as the GitHub App installation")?;
    tracing::info!(
        app_id = client.credentials().app_id(),
        installation_id = ?client.credentials().installation_id().await,
        expires_at = %token.expires_at,
        "GitHub App authenticated"
    );

    let state = Arc::new(AppState::new(webhook_secret));
    let app = github_runner::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Webhook server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel outstanding GitHub calls.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
