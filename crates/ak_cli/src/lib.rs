//! `ak_cli` - CLI commands for anketa
//!
//! This crate provides:
//! - clap-based command definitions
//! - `serve` to run the web server
//! - `results`, `whoami` and `config` for operators

use std::path::PathBuf;

use ak_config::AkConfig;
use ak_sheets::SheetsSession;
use ak_store::AkStore;
use ak_web::{AppState, WebServer};
use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// CLI errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Config error: {0}")]
    ConfigError(#[from] ak_config::ConfigError),

    #[error("Store error: {0}")]
    StoreError(#[from] ak_store::StoreError),

    #[error("Web error: {0}")]
    WebError(#[from] ak_web::WebError),

    #[error("Sheets error: {0}")]
    MirrorError(#[from] ak_sheets::MirrorError),
}

/// Main CLI application
#[derive(Parser, Debug)]
#[command(name = "anketa")]
#[command(
    author,
    version,
    about = "Anketa - questionnaire backend with a Google Sheets mirror"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the web server
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print stored answers, newest first
    Results {
        /// Maximum number of answers
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Print the service account the spreadsheet must be shared with
    Whoami,

    /// Print the effective configuration with secrets redacted
    Config,
}

impl Cli {
    /// Run the CLI command
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] if configuration, storage, or the command itself fails.
    pub async fn run(self) -> Result<(), CliError> {
        let mut config = load_config(self.config.as_ref())?;

        match self.command {
            Commands::Serve { bind, port } => {
                if let Some(bind) = bind {
                    config.web.bind_address = bind;
                }
                if let Some(port) = port {
                    config.web.port = port;
                }
                config.validate()?;

                let state = AppState::from_config(&config)?;
                let server = WebServer::new(state, config.web.clone());
                info!(
                    sheet_id = %config.sheets.sheet_id,
                    sheet_tab = %config.sheets.sheet_tab,
                    "Sheets mirror configured"
                );
                server.run().await?;
            }
            Commands::Results { limit } => {
                let store = AkStore::open(&config.global.db_path)?;
                let answers = store.list_recent(limit)?;
                print_json(&answers);
            }
            Commands::Whoami => {
                let session = SheetsSession::google(&config.sheets)?;
                println!("{}", session.principal()?);
            }
            Commands::Config => {
                println!("{}", render_config(&config)?);
            }
        }

        Ok(())
    }
}

fn load_config(config_path: Option<&PathBuf>) -> Result<AkConfig, CliError> {
    let config = match config_path {
        Some(path) => AkConfig::load_with_env(path)?,
        None => AkConfig::discover_with_env()?,
    };
    Ok(config)
}

fn render_config(config: &AkConfig) -> Result<String, CliError> {
    toml::to_string_pretty(&config.redacted())
        .map_err(|e| CliError::CommandFailed(format!("Failed to render config: {e}")))
}

fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {e}"}}"#));
    println!("{json}");
}
