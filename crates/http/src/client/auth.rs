//! Authentication API client methods

use super::request::ApiRequest;
use super::{ClientError, SessionClient};
use crate::session::{BearerToken, SessionEvent};
use crate::types::{ApiResponse, LoginRequest, LoginResponse};
use reqwest::header;
use tracing::{info, warn};

impl SessionClient {
    /// Log in with email and password and store the issued token
    ///
    /// The backend returns the access token in the `Authorization` header and
    /// sets the refresh cookie on the shared cookie jar.
    pub async fn login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<LoginResponse, ClientError> {
        let request = ApiRequest::post(self.config().login_path.clone())
            .json(&LoginRequest {
                email: email.into(),
                password: password.into(),
            })?
            .exempt();

        // Sent outside the retry loop; the token is stored only once the body decodes
        let response = self.dispatch(&request, None)?.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let token = response
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerToken::new)
            .ok_or_else(|| {
                ClientError::AuthenticationFailed("login response carried no token".into())
            })?;

        let bytes = response.bytes().await?;
        let account = serde_json::from_slice::<ApiResponse<LoginResponse>>(&bytes)?.into_data();

        if self.current_token()?.as_ref() != Some(&token) {
            self.coordinator().store().save(&token)?;
            self.coordinator().events().emit(SessionEvent::TokenRenewed);
        }

        info!(member_id = account.id, "Logged in");
        Ok(account)
    }

    /// Log out on the server and drop the local session
    ///
    /// The token is cleared locally whatever the server answers; a server
    /// failure is still returned to the caller.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self
            .send(ApiRequest::post(self.config().logout_path.clone()))
            .await;

        self.coordinator().store().clear()?;
        self.coordinator().events().emit(SessionEvent::LoggedOut);

        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Server logout failed, local session cleared");
                Err(e)
            }
        }
    }
}
