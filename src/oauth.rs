// 🔑 Google OAuth - authorization URL, code exchange, userinfo
//
// The browser is sent to Google with a single-use `state`; the callback
// exchanges the code, reads the profile and hands an ExternalIdentity to
// AuthService.

use serde::Deserialize;
use std::time::Duration;

use crate::auth::{ExternalIdentity, TokenResponse};
use crate::config::{GoogleSettings, Settings};
use crate::error::{AppError, AppResult};

/// How long a login `state` stays valid
pub const STATE_TTL_MINUTES: i64 = 10;

pub fn authorization_url(google: &GoogleSettings, state: &str) -> AppResult<String> {
    let client_id = google
        .client_id
        .as_deref()
        .ok_or_else(|| AppError::Upstream("Google login is not configured".to_string()))?;

    Ok(format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=select_account",
        google.auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(&google.redirect_uri),
        urlencoding::encode("openid email profile"),
        urlencoding::encode(state),
    ))
}

/// Where the browser lands after a successful Google login
pub fn frontend_success_redirect(settings: &Settings, tokens: &TokenResponse) -> String {
    format!(
        "{}/auth/google/callback?token={}&refresh={}",
        settings.frontend_url.trim_end_matches('/'),
        urlencoding::encode(&tokens.access_token),
        urlencoding::encode(&tokens.refresh_token),
    )
}

pub fn frontend_error_redirect(settings: &Settings, error: &str) -> String {
    format!(
        "{}/auth?view=login&error={}",
        settings.frontend_url.trim_end_matches('/'),
        urlencoding::encode(error),
    )
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleClient {
    google: GoogleSettings,
    http: reqwest::Client,
}

impl GoogleClient {
    pub fn new(google: GoogleSettings) -> Self {
        Self {
            google,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Trade an authorization code for the user's identity
    pub async fn identify(&self, code: &str) -> AppResult<ExternalIdentity> {
        let access_token = self.exchange_code(code).await?;
        self.fetch_identity(&access_token).await
    }

    async fn exchange_code(&self, code: &str) -> AppResult<String> {
        let (Some(client_id), Some(client_secret)) = (&self.google.client_id, &self.google.client_secret) else {
            return Err(AppError::Upstream("Google login is not configured".to_string()));
        };

        let params = [
            ("code", code),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("redirect_uri", self.google.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let resp = self
            .http
            .post(&self.google.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Token exchange failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!("Token exchange rejected ({})", resp.status())));
        }

        let token: GoogleTokenResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Invalid token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn fetch_identity(&self, access_token: &str) -> AppResult<ExternalIdentity> {
        let resp = self
            .http
            .get(&self.google.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Userinfo request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!("Userinfo rejected ({})", resp.status())));
        }

        let info: GoogleUserInfo = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Invalid userinfo response: {}", e)))?;

        Ok(ExternalIdentity {
            email: info.email,
            name: info.name,
            email_verified: info.email_verified,
        })
    }
}
