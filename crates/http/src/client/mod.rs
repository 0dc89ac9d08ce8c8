//! Playball HTTP session client

pub mod auth;
pub mod config;
pub mod error;
pub mod request;

use crate::session::{
    BearerToken, HttpRefresher, MemoryTokenStore, RefreshCoordinator, SessionEvent,
    SessionEvents, TokenRefresher, TokenStore,
};
use self::config::ClientConfig;
use self::error::ClientError;
use self::request::ApiRequest;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Where a single logical request is in its lifecycle
enum Attempt {
    /// First send, with whatever token storage holds
    Initial,
    /// Re-issued once with a token obtained after a 401
    Retried(BearerToken),
}

/// API client that attaches the session token and refreshes it on 401
#[derive(Clone)]
pub struct SessionClient {
    client: Client,
    base_url: String,
    config: Arc<ClientConfig>,
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionClient {
    /// Create a new client with default configuration and in-memory storage
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Effective configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Refresh coordinator shared by every clone of this client
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.events().subscribe()
    }

    /// The stored session token, if any
    pub fn current_token(&self) -> Result<Option<BearerToken>, ClientError> {
        Ok(self.coordinator.store().load()?)
    }

    /// Whether a request goes out without a token and skips refresh
    pub fn is_exempt(&self, request: &ApiRequest) -> bool {
        request.exempt
            || self
                .config
                .exempt_paths
                .iter()
                .any(|fragment| !fragment.is_empty() && request.path.contains(fragment.as_str()))
    }

    /// Send a request, refreshing the session once if the backend answers 401
    ///
    /// Successful responses are returned as-is. Non-401 failures, and any
    /// failure of an exempt request, are mapped with
    /// [`ClientError::from_status`] without retrying.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ClientError> {
        let exempt = self.is_exempt(&request);
        let mut attempt = Attempt::Initial;

        loop {
            let token = match &attempt {
                Attempt::Initial if exempt => None,
                Attempt::Initial => self.coordinator.store().load()?,
                Attempt::Retried(token) => Some(token.clone()),
            };

            let response = self.dispatch(&request, token.as_ref())?.send().await?;
            let status = response.status();

            if status.is_success() {
                self.capture_renewed_token(&response);
                return Ok(response);
            }
            // Consumes the body so the connection is back in the pool before
            // any refresh wait
            let rejection = Self::error_from_response(response).await;
            if status != StatusCode::UNAUTHORIZED || exempt {
                return Err(rejection);
            }

            match attempt {
                Attempt::Initial => {
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        error = %rejection,
                        "Request unauthorized, awaiting fresh token"
                    );
                    let fresh = self
                        .coordinator
                        .refreshed_token(token.as_ref())
                        .await
                        .map_err(ClientError::SessionExpired)?;
                    attempt = Attempt::Retried(fresh);
                }
                Attempt::Retried(_) => {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        "Request unauthorized again after refresh"
                    );
                    self.coordinator.expire_session();
                    return Err(rejection);
                }
            }
        }
    }

    /// Send a request and decode a JSON response body
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::put(path).json(body)?).await
    }

    /// Send a DELETE, discarding any response body
    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.send(ApiRequest::delete(path)).await.map(|_| ())
    }

    /// Build one attempt of `request`, attaching `token` when given
    fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&BearerToken>,
    ) -> Result<RequestBuilder, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut headers = request.headers.clone();

        if let Some(token) = token {
            let value = HeaderValue::from_str(&token.header_value()).map_err(|_| {
                ClientError::AuthenticationFailed("stored token is not a valid header value".into())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = self.client.request(request.method.clone(), url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder)
    }

    /// Persist a token the backend renewed on a successful response
    fn capture_renewed_token(&self, response: &Response) {
        let Some(token) = response
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerToken::new)
        else {
            return;
        };

        let store = self.coordinator.store();
        if matches!(store.load(), Ok(Some(ref current)) if *current == token) {
            return;
        }
        match store.save(&token) {
            Ok(()) => {
                debug!("Stored renewed token from response");
                self.coordinator.events().emit(SessionEvent::TokenRenewed);
            }
            Err(e) => warn!(error = %e, "Failed to store renewed token"),
        }
    }

    async fn error_from_response(response: Response) -> ClientError {
        let status = response.status();
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        ClientError::from_status(status, message)
    }
}

/// Builder for SessionClient
#[derive(Default)]
pub struct SessionClientBuilder {
    config: Option<ClientConfig>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    events: Option<SessionEvents>,
}

impl SessionClientBuilder {
    /// Start from a loaded configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set where the session token is kept
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the HTTP refresh round-trip
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Share an existing event channel
    pub fn events(mut self, events: SessionEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<SessionClient, ClientError> {
        let mut config = match (self.config, self.base_url) {
            (Some(config), Some(base_url)) => ClientConfig { base_url, ..config },
            (Some(config), None) => config,
            (None, Some(base_url)) => ClientConfig {
                base_url,
                ..ClientConfig::default()
            },
            (None, None) => {
                return Err(ClientError::Configuration("base_url is required".into()));
            }
        };
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
        config.validate()?;

        // Ensure base_url ends without a trailing slash
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new()
            .cookie_store(true)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = self.timeout.or_else(|| config.timeout()) {
            client_builder = client_builder.timeout(timeout);
        }
        let client = client_builder.build()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let refresher = self.refresher.unwrap_or_else(|| {
            Arc::new(HttpRefresher::new(
                client.clone(),
                format!("{base_url}{}", config.refresh_path),
            ))
        });
        let coordinator = RefreshCoordinator::new(
            refresher,
            store,
            self.events.unwrap_or_default(),
            config.login_redirect(),
        )
        .with_refresh_timeout(config.refresh_timeout());

        Ok(SessionClient {
            client,
            base_url,
            config: Arc::new(config),
            coordinator: Arc::new(coordinator),
        })
    }
}
