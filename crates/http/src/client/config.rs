//! Client configuration

use super::error::ClientError;
use crate::session::LoginRedirect;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Session client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL every request path is appended to
    pub base_url: String,

    /// Path of the token refresh endpoint
    pub refresh_path: String,

    /// Path of the login endpoint
    pub login_path: String,

    /// Path of the logout endpoint
    pub logout_path: String,

    /// Route the user is sent to when the session cannot be recovered
    pub login_route: String,

    /// Mark the login redirect with `expired=true`
    pub mark_expired: bool,

    /// Requests whose path contains any of these are sent without a token
    /// and never trigger a refresh
    pub exempt_paths: Vec<String>,

    /// Storage key the token lives under
    pub storage_key: String,

    /// Request timeout in seconds (0 disables)
    pub timeout_secs: u64,

    /// Refresh round-trip timeout in seconds (0 disables)
    pub refresh_timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/members/login".to_string(),
            logout_path: "/logout".to_string(),
            login_route: "/login".to_string(),
            mark_expired: true,
            exempt_paths: vec!["/verify-email".to_string(), "/members/login".to_string()],
            storage_key: "Authorization".to_string(),
            timeout_secs: 10,
            refresh_timeout_secs: 10,
            user_agent: "playball-client/0.1.0".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from defaults, an optional file, and `PLAYBALL_*`
    /// environment variables, in increasing precedence
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let defaults = Self::default();

        let mut builder = ::config::Config::builder()
            .set_default("base_url", defaults.base_url)
            .and_then(|b| b.set_default("refresh_path", defaults.refresh_path))
            .and_then(|b| b.set_default("login_path", defaults.login_path))
            .and_then(|b| b.set_default("logout_path", defaults.logout_path))
            .and_then(|b| b.set_default("login_route", defaults.login_route))
            .and_then(|b| b.set_default("mark_expired", defaults.mark_expired))
            .and_then(|b| b.set_default("exempt_paths", defaults.exempt_paths))
            .and_then(|b| b.set_default("storage_key", defaults.storage_key))
            .and_then(|b| b.set_default("timeout_secs", defaults.timeout_secs))
            .and_then(|b| b.set_default("refresh_timeout_secs", defaults.refresh_timeout_secs))
            .and_then(|b| b.set_default("user_agent", defaults.user_agent))
            .map_err(config_error)?;

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("PLAYBALL")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("exempt_paths"),
            )
            .build()
            .map_err(config_error)?;

        let config: Self = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the base URL parses and every path is absolute
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::Configuration(format!("base_url '{}': {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        for (name, path) in [
            ("refresh_path", &self.refresh_path),
            ("login_path", &self.login_path),
            ("logout_path", &self.logout_path),
            ("login_route", &self.login_route),
        ] {
            if !path.starts_with('/') {
                return Err(ClientError::Configuration(format!(
                    "{name} must start with '/', got '{path}'"
                )));
            }
        }

        if self.storage_key.is_empty() {
            return Err(ClientError::Configuration(
                "storage_key must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Request timeout, if enabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Refresh round-trip timeout, if enabled
    pub fn refresh_timeout(&self) -> Option<Duration> {
        (self.refresh_timeout_secs > 0).then(|| Duration::from_secs(self.refresh_timeout_secs))
    }

    /// Where an unrecoverable session sends the user
    pub fn login_redirect(&self) -> LoginRedirect {
        LoginRedirect {
            route: self.login_route.clone(),
            expired: self.mark_expired,
        }
    }
}

fn config_error(e: ::config::ConfigError) -> ClientError {
    ClientError::Configuration(e.to_string())
}
