use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;

/// Identity returned by the OAuth provider after code exchange.
#[derive(Debug, Clone)]
pub struct OAuthUserInfo {
    /// The provider's stable subject identifier.
    pub subject: String,
    pub email: String,
}

/// The OAuth provider seam.
///
/// Production talks to Google; tests substitute a scripted provider so the
/// login flow can run without the network.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// The URL the browser is redirected to, carrying the CSRF state nonce.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorisation code for the user's identity.
    async fn exchange_code(&self, code: &str) -> Result<OAuthUserInfo, ApiError>;
}

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    sub: String,
    email: String,
}

/// Google authorisation-code flow over plain reqwest.
pub struct GoogleOAuth {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    http: reqwest::Client,
}

impl GoogleOAuth {
    /// # Errors
    ///
    /// Returns [`ApiError::Internal`] if the HTTP client cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            http,
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{GOOGLE_AUTH_URL}?response_type=code&client_id={}&redirect_uri={}&scope=openid%20email&state={state}",
            self.client_id, self.redirect_url
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthUserInfo, ApiError> {
        let token: TokenResponse = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", &self.redirect_url),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("token exchange failed: {e}")))?
            .error_for_status()
            .map_err(|_| ApiError::Unauthenticated)?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("bad token response: {e}")))?;

        let info: UserInfoResponse = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("userinfo fetch failed: {e}")))?
            .error_for_status()
            .map_err(|_| ApiError::Unauthenticated)?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("bad userinfo response: {e}")))?;

        Ok(OAuthUserInfo {
            subject: info.sub,
            email: info.email,
        })
    }
}
