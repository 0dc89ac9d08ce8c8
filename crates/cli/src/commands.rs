//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use playball_http::session::SessionEvent;
use playball_http::{ApiRequest, FileTokenStore, Method, SessionClient, TokenStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session token
    Login {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long, env = "PLAYBALL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Log out and drop the stored session token
    Logout,

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method
        #[arg(value_parser = parse_method)]
        method: Method,

        /// Path relative to the API base URL, e.g. /exchanges/five
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,

        /// Send without the session token and skip refresh
        #[arg(long)]
        exempt: bool,
    },

    /// Inspect or clear the stored session token
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Show or generate client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Show whether a token is stored
    Show {
        /// Print the full token instead of a masked prefix
        #[arg(long)]
        reveal: bool,
    },

    /// Remove the stored token without contacting the server
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to DATA_DIR/config.toml)
        output: Option<PathBuf>,
    },
}

fn parse_method(value: &str) -> Result<Method, String> {
    Method::from_bytes(value.to_ascii_uppercase().as_bytes())
        .map_err(|e| format!("invalid HTTP method '{value}': {e}"))
}

impl Commands {
    pub async fn execute(self, data_dir: PathBuf, config_file: Option<PathBuf>) -> Result<()> {
        match self {
            Commands::Config { command } => command.execute(&data_dir, config_file.as_deref()),
            Commands::Token { command } => {
                let client = build_client(&data_dir, config_file.as_deref())?;
                command.execute(&client)
            }
            Commands::Login { email, password } => {
                let client = build_client(&data_dir, config_file.as_deref())?;
                let mut events = client.subscribe();
                let account = client.login(&email, password).await?;
                println!("Logged in as {} (member {})", account.email, account.id);
                report_session_events(&mut events);
                Ok(())
            }
            Commands::Logout => {
                let client = build_client(&data_dir, config_file.as_deref())?;
                client.logout().await?;
                println!("Logged out");
                Ok(())
            }
            Commands::Request {
                method,
                path,
                body,
                exempt,
            } => {
                let client = build_client(&data_dir, config_file.as_deref())?;
                let mut events = client.subscribe();
                let result = send_request(&client, method, path, body, exempt).await;
                report_session_events(&mut events);
                result
            }
        }
    }
}

impl TokenCommands {
    fn execute(self, client: &SessionClient) -> Result<()> {
        match self {
            TokenCommands::Show { reveal } => {
                match client.current_token()? {
                    Some(token) if reveal => println!("{}", token.header_value()),
                    Some(token) => println!("Token stored: {token:?}"),
                    None => println!("No token stored"),
                }
                Ok(())
            }
            TokenCommands::Clear => {
                client.coordinator().store().clear()?;
                println!("Stored token removed");
                Ok(())
            }
        }
    }
}

impl ConfigCommands {
    fn execute(self, data_dir: &Path, config_file: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommands::Show => {
                let config = config::load_client_config(config_file, data_dir)?;
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommands::Init { output } => {
                let config_path = output.unwrap_or_else(|| config::default_config_path(data_dir));

                if config_path.exists() {
                    bail!(
                        "Configuration already exists at {}; remove it first",
                        config_path.display()
                    );
                }

                // Create parent directory if it doesn't exist
                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                config::generate_default_config(&config_path)?;
                println!("Generated configuration at: {}", config_path.display());
                Ok(())
            }
        }
    }
}

fn build_client(data_dir: &Path, config_file: Option<&Path>) -> Result<SessionClient> {
    let config = config::load_client_config(config_file, data_dir)?;
    let storage = config::storage_path(data_dir);
    debug!(storage = %storage.display(), base_url = %config.base_url, "Building session client");

    let store = Arc::new(FileTokenStore::new(storage, config.storage_key.clone()));
    SessionClient::builder()
        .config(config)
        .store(store)
        .build()
        .context("Failed to build session client")
}

async fn send_request(
    client: &SessionClient,
    method: Method,
    path: String,
    body: Option<String>,
    exempt: bool,
) -> Result<()> {
    let mut request = ApiRequest::new(method, path);
    if let Some(body) = body {
        let value: serde_json::Value =
            serde_json::from_str(&body).context("Request body is not valid JSON")?;
        request = request.json(&value)?;
    }
    if exempt {
        request = request.exempt();
    }

    info!(method = %request.method(), path = %request.path(), "Sending request");
    let response = client.send(request).await?;
    let status = response.status();
    let text = response.text().await?;

    debug!(%status, "Response received");
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if text.is_empty() => println!("{status}"),
        Err(_) => println!("{text}"),
    }
    Ok(())
}

/// Surface session events that happened while the command ran
fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Expired(redirect) => {
                eprintln!(
                    "Session expired. Log in again with `playball login` (web: {})",
                    redirect.location()
                );
            }
            SessionEvent::TokenRenewed => debug!("Session token renewed"),
            SessionEvent::LoggedOut => debug!("Logged out"),
        }
    }
}
