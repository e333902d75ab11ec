//! Command-line interface.
//!
//! Subcommands:
//! - `server` - Run the webhook server
//! - `installations` - List installations of the authenticated app
//! - `runners <owner> <repo>` - List self-hosted runners of a repository
//! - `registration-token <owner> <repo>` - Fetch a runner registration token
//! - `repos <user>` - List a user's repositories
//! - `app` - Show the authenticated app
//!
//! Every command except `server` prints its result as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::github::token_manager::InstallationApi;
use crate::github::{ClientSettings, GitHubClient};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "githubrunner")]
#[command(author, version, about = "GitHub App client for self-hosted runner management", long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults to the user config directory)
    #[arg(short, long, env = "GITHUB_RUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the webhook server
    Server,

    /// List installations of the authenticated app
    Installations,

    /// List self-hosted runners registered against a repository
    Runners {
        /// Repository owner (user or org)
        owner: String,
        /// Repository name
        repo: String,
    },

    /// Fetch a token for registering a new self-hosted runner
    RegistrationToken {
        /// Repository owner (user or org)
        owner: String,
        /// Repository name
        repo: String,
    },

    /// List repositories of a user
    Repos {
        /// GitHub user name
        user: String,
    },

    /// Show the authenticated app
    App,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

fn connect(config: &Config, cancel: CancellationToken) -> Result<GitHubClient> {
    let settings =
        ClientSettings::from_config(&config.github).context("Invalid GitHub App configuration")?;
    GitHubClient::new(settings, cancel).context("Failed to create GitHub client")
}

/// Run a one-shot API command
pub async fn run_command(command: &Commands, config: &Config, cancel: CancellationToken) -> Result<()> {
    match command {
        // Handled in main.rs
        Commands::Server => Ok(()),
        Commands::Installations => {
            let installations = connect(config, cancel)?
                .app()
                .list_installations()
                .await
                .context("Failed to list installations")?;
            print_json(&installations)
        }
        Commands::Runners { owner, repo } => {
            let runners = connect(config, cancel)?
                .list_runners(owner, repo)
                .await
                .with_context(|| format!("Failed to list runners for {}/{}", owner, repo))?;
            print_json(&runners)
        }
        Commands::RegistrationToken { owner, repo } => {
            let token = connect(config, cancel)?
                .create_registration_token(owner, repo)
                .await
                .with_context(|| format!("Failed to fetch registration token for {}/{}", owner, repo))?;
            print_json(&token)
        }
        Commands::Repos { user } => {
            let repos = connect(config, cancel)?
                .list_user_repos(user)
                .await
                .with_context(|| format!("Failed to list repositories of {}", user))?;
            print_json(&repos)
        }
        Commands::App => {
            let app = connect(config, cancel)?
                .app()
                .get_app()
                .await
                .context("Failed to fetch app")?;
            print_json(&app)
        }
    }
}
