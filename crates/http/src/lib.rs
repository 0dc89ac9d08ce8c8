//! Playball HTTP session client
//!
//! Issues REST requests with the session's bearer token attached, refreshes
//! the token when the backend rejects it, and collapses concurrent refresh
//! attempts into a single round-trip.

pub mod client;
pub mod session;
pub mod types;

pub use client::config::ClientConfig;
pub use client::error::ClientError;
pub use client::request::ApiRequest;
pub use client::{SessionClient, SessionClientBuilder};
pub use reqwest::{Method, StatusCode};
pub use session::{
    BearerToken, FileTokenStore, LoginRedirect, MemoryTokenStore, RefreshError, SessionEvent,
    TokenStore,
};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
