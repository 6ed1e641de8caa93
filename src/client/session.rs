// Login state on top of ApiClient: tokens + the current user profile

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::api::{ApiClient, SessionEvent};
use super::store::Tokens;
use super::ClientError;
use crate::auth::TokenResponse;
use crate::entities::{LoginRequest, PreferencesUpdate, SignupRequest, UserProfile};

pub struct AuthSession {
    client: ApiClient,
    user: RwLock<Option<UserProfile>>,
}

impl AuthSession {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            user: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.client.tokens(), Ok(Some(_)))
    }

    /// Cached profile, dropped once the client has lost its tokens
    pub async fn current_user(&self) -> Option<UserProfile> {
        if self.client.session_state() != SessionEvent::Authenticated {
            self.forget_user().await;
            return None;
        }
        self.user.read().await.clone()
    }

    pub async fn login(&self, identifier: &str, password: &str) -> Result<UserProfile, ClientError> {
        let req = LoginRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        };
        let resp: TokenResponse = self.client.post_public("/auth/login", &req).await?;
        self.establish(resp).await
    }

    pub async fn signup(&self, req: &SignupRequest) -> Result<UserProfile, ClientError> {
        let resp: TokenResponse = self.client.post_public("/auth/signup", req).await?;
        self.establish(resp).await
    }

    /// Adopt the tokens handed back by the Google callback redirect
    pub async fn google_login(&self, access_token: &str, refresh_token: &str) -> Result<UserProfile, ClientError> {
        self.client.set_tokens(&Tokens::new(access_token, refresh_token))?;
        self.fetch_me().await
    }

    /// GET /auth/me and cache the result
    pub async fn fetch_me(&self) -> Result<UserProfile, ClientError> {
        let result = self.client.get("/auth/me").await;
        self.remember(result).await
    }

    pub async fn update_preferences(&self, update: &PreferencesUpdate) -> Result<UserProfile, ClientError> {
        let result = self.client.put("/auth/me/preferences", update).await;
        self.remember(result).await
    }

    /// Revoke server side when possible; local state is cleared regardless
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Some(tokens) = self.client.tokens()? {
            let body = serde_json::json!({ "refresh_token": tokens.refresh_token });
            let result: Result<serde_json::Value, ClientError> = self.client.post("/auth/logout", &body).await;
            if let Err(e) = result {
                warn!(error = %e, "Server logout failed");
            }
        }

        self.forget_user().await;
        self.client.clear_tokens()?;
        info!("Logged out");
        Ok(())
    }

    async fn establish(&self, resp: TokenResponse) -> Result<UserProfile, ClientError> {
        self.client
            .set_tokens(&Tokens::new(resp.access_token, resp.refresh_token))?;
        match resp.user {
            Some(profile) => {
                *self.user.write().await = Some(profile.clone());
                Ok(profile)
            }
            None => self.fetch_me().await,
        }
    }

    async fn remember(&self, result: Result<UserProfile, ClientError>) -> Result<UserProfile, ClientError> {
        match result {
            Ok(profile) => {
                *self.user.write().await = Some(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                if matches!(e, ClientError::SessionExpired) {
                    self.forget_user().await;
                }
                Err(e)
            }
        }
    }

    async fn forget_user(&self) {
        *self.user.write().await = None;
    }
}
