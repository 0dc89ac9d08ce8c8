//! Bearer token value and header normalization

use std::fmt;

const BEARER_PREFIX: &str = "Bearer ";

/// An opaque session credential.
///
/// The raw value is kept as the backend issued it. Some endpoints hand out
/// the token with its `Bearer ` prefix already applied (the `Authorization`
/// response header does), so the prefix is stripped on construction and
/// re-applied exactly once by [`BearerToken::header_value`].
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a token, dropping a leading `Bearer ` prefix if present.
    ///
    /// Returns `None` for an empty or whitespace-only value.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let raw = raw.as_ref().trim_start();
        let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw).trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    /// The token without any scheme prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header: `Bearer <token>`.
    pub fn header_value(&self) -> String {
        format!("{BEARER_PREFIX}{}", self.0)
    }
}

// Tokens end up in logs through Debug on request state; keep them out.
impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(4).collect();
        write!(f, "BearerToken({visible}…)")
    }
}
