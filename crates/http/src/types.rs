//! Wire types for the auth endpoints

use serde::{Deserialize, Serialize};

/// Login request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response body; the token itself arrives in the `Authorization`
/// response header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: i64,
    pub email: String,
    pub roles: String,
}

/// Response body as the backend may send it: wrapped in a
/// `{ "message", "data" }` envelope or bare
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Wrapped {
        #[serde(default)]
        message: Option<String>,
        data: T,
    },
    Bare(T),
}

impl<T> ApiResponse<T> {
    /// The payload, whichever shape it arrived in
    pub fn into_data(self) -> T {
        match self {
            Self::Wrapped { data, .. } | Self::Bare(data) => data,
        }
    }
}

/// Refresh response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account() -> LoginResponse {
        LoginResponse {
            id: 42,
            email: "fan@example.com".into(),
            roles: "ROLE_USER".into(),
        }
    }

    #[test]
    fn login_body_accepts_envelope() {
        let body = json!({
            "message": "login ok",
            "data": { "id": 42, "email": "fan@example.com", "roles": "ROLE_USER" }
        });
        let parsed: ApiResponse<LoginResponse> = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.into_data(), account());
    }

    #[test]
    fn login_body_accepts_bare_payload() {
        let body = json!({ "id": 42, "email": "fan@example.com", "roles": "ROLE_USER" });
        let parsed: ApiResponse<LoginResponse> = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.into_data(), account());
    }

    #[test]
    fn envelope_without_payload_is_rejected() {
        let body = json!({ "message": "login ok", "data": null });
        assert!(serde_json::from_value::<ApiResponse<LoginResponse>>(body).is_err());
    }
}
