//! Refresh round-trip transport

use super::token::BearerToken;
use crate::types::RefreshResponse;
use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::Duration;
use thiserror::Error;

/// Why a refresh round-trip did not produce a token
///
/// Every request queued behind a refresh receives its own copy of the
/// outcome, hence `Clone` and string payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The refresh endpoint answered with a non-success status
    #[error("Refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The refresh request never got a response
    #[error("Refresh request failed: {0}")]
    Transport(String),

    /// The refresh endpoint succeeded but carried no token
    #[error("Refresh response did not contain an access token")]
    MissingToken,

    /// The refresh round-trip exceeded its deadline
    #[error("Refresh timed out after {0:?}")]
    TimedOut(Duration),

    /// The refresh was dropped before it settled
    #[error("Refresh was abandoned before completing")]
    Abandoned,
}

/// Performs the single network call that exchanges an expired session
/// for a new token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<BearerToken, RefreshError>;
}

/// Refresher that posts to the backend refresh endpoint
///
/// The refresh credential travels as a cookie, so the client handed in
/// here must share the cookie jar of the client that logged in.
#[derive(Clone)]
pub struct HttpRefresher {
    client: Client,
    url: String,
}

impl HttpRefresher {
    /// Create a refresher posting to `url`
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Refresh endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self) -> Result<BearerToken, RefreshError> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let header_token = response
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerToken::new);

        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        // The body is authoritative; the header is the fallback the backend
        // also sets when it reissues an access token.
        let body_token = serde_json::from_slice::<RefreshResponse>(&body)
            .ok()
            .and_then(|payload| payload.access_token)
            .and_then(BearerToken::new);

        body_token.or(header_token).ok_or(RefreshError::MissingToken)
    }
}
