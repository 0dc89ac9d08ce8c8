//! CLI configuration utilities

use anyhow::{Context, Result};
use playball_http::ClientConfig;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const STORAGE_FILE: &str = "storage.json";

/// Pick the data directory: explicit flag, then `PLAYBALL_STATE_DIR`, then
/// the platform data directory
pub fn resolve_data_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| {
        if let Ok(state_dir) = std::env::var("PLAYBALL_STATE_DIR") {
            PathBuf::from(state_dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("playball")
        }
    })
}

/// File the session token is persisted in
pub fn storage_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STORAGE_FILE)
}

/// Default configuration file location
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load client configuration from an explicit file, or the data directory
/// default if it exists, layered under `PLAYBALL_*` environment variables
pub fn load_client_config(explicit: Option<&Path>, data_dir: &Path) -> Result<ClientConfig> {
    let fallback = default_config_path(data_dir);
    let path = match explicit {
        Some(path) => Some(path),
        None if fallback.exists() => Some(fallback.as_path()),
        None => None,
    };

    ClientConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })
}

/// Save client configuration to a TOML file
pub fn save_client_config<P: AsRef<Path>>(config: &ClientConfig, path: P) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let config = ClientConfig::default();
    save_client_config(&config, path)
}
