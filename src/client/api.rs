// Authenticated HTTP client for the VerifAI API
//
// Every request carries the stored access token. A 401 triggers one refresh,
// shared by all callers that were rejected with the same token, and a single
// replay of the original request.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::store::{TokenStore, Tokens};
use super::ClientError;
use crate::agent::{AgentResult, StatusView, VerificationResult};
use crate::auth::TokenResponse;
use crate::dashboard::{ActionResult, BulkActionResult, DashboardStats, Heatmap, RiskBucket, TransactionFilter, TransactionPage};
use crate::db::{DemoRequest, Event};
use crate::entities::{AnalystAction, Transaction, TransactionRequest};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Session lifecycle, observable through [`ApiClient::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedOut,
    Authenticated,
    /// Refresh failed and tokens were cleared; the UI should show the login view
    LoginRequired,
}

/// `{"message": "..."}` bodies
#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

struct Inner {
    base_url: String,
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    refresh_gate: Mutex<()>,
    events: watch::Sender<SessionEvent>,
}

/// Cheap to clone; clones share tokens, the refresh gate and the event channel.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    /// `base_url` points at the API prefix, e.g. `http://localhost:8000/api`
    pub fn new(base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        let initial = match store.load() {
            Ok(Some(_)) => SessionEvent::Authenticated,
            _ => SessionEvent::LoggedOut,
        };
        let (events, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                http,
                store,
                refresh_gate: Mutex::new(()),
                events,
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn session_state(&self) -> SessionEvent {
        *self.inner.events.borrow()
    }

    pub fn tokens(&self) -> Result<Option<Tokens>, ClientError> {
        self.inner.store.load()
    }

    pub fn set_tokens(&self, tokens: &Tokens) -> Result<(), ClientError> {
        self.inner.store.save(tokens)?;
        self.publish(SessionEvent::Authenticated);
        Ok(())
    }

    pub fn clear_tokens(&self) -> Result<(), ClientError> {
        self.inner.store.clear()?;
        self.publish(SessionEvent::LoggedOut);
        Ok(())
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        self.inner.events.send_replace(event);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    // ------------------------------------------------------------------------
    // Generic verbs
    // ------------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        decode(self.send_authorized(|| self.inner.http.get(&url)).await?).await
    }

    pub async fn get_query<Q, T>(&self, path: &str, query: &Q) -> Result<T, ClientError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        decode(self.send_authorized(|| self.inner.http.get(&url).query(query)).await?).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        decode(self.send_authorized(|| self.inner.http.post(&url).json(body)).await?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        decode(self.send_authorized(|| self.inner.http.put(&url).json(body)).await?).await
    }

    /// POST without credentials and without the refresh cycle (login, signup)
    pub async fn post_public<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.inner.http.post(self.url(path)).json(body).send().await?;
        decode(resp).await
    }

    // ------------------------------------------------------------------------
    // 401 handling
    // ------------------------------------------------------------------------

    async fn send_authorized<F>(&self, build: F) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let sent = self.inner.store.load()?.map(|t| t.access_token);
        let resp = with_bearer(build(), sent.as_deref()).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let fresh = self.refresh_after(sent.as_deref()).await?;
        debug!("Replaying request with refreshed token");
        let replay = build().bearer_auth(&fresh).send().await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        Ok(replay)
    }

    /// Returns a usable access token after `rejected` was refused.
    ///
    /// Callers queue on the gate. Whoever gets it first performs the refresh;
    /// later callers find the token already replaced and reuse it.
    async fn refresh_after(&self, rejected: Option<&str>) -> Result<String, ClientError> {
        let _gate = self.inner.refresh_gate.lock().await;

        let Some(current) = self.inner.store.load()? else {
            // Cleared while we waited: a refresh already failed
            return Err(if rejected.is_some() {
                ClientError::SessionExpired
            } else {
                ClientError::Unauthorized
            });
        };
        if Some(current.access_token.as_str()) != rejected {
            return Ok(current.access_token);
        }
        let Some(refresh_token) = current.refresh_token else {
            return Err(ClientError::Unauthorized);
        };

        match self.call_refresh(&refresh_token).await {
            Ok(resp) => {
                let tokens = Tokens {
                    access_token: resp.access_token,
                    refresh_token: Some(resp.refresh_token),
                };
                self.inner.store.save(&tokens)?;
                self.publish(SessionEvent::Authenticated);
                info!("Access token refreshed");
                Ok(tokens.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, session cleared");
                self.inner.store.clear()?;
                self.publish(SessionEvent::LoginRequired);
                Err(ClientError::SessionExpired)
            }
        }
    }

    async fn call_refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
        self.post_public("/auth/refresh", &serde_json::json!({ "refresh_token": refresh_token }))
            .await
    }

    // ------------------------------------------------------------------------
    // Typed endpoints
    // ------------------------------------------------------------------------

    pub async fn request_demo(&self, request: &DemoRequest) -> Result<MessageBody, ClientError> {
        self.post("/demo/request", request).await
    }

    pub async fn process_transaction(&self, request: &TransactionRequest) -> Result<AgentResult, ClientError> {
        self.post("/v1/transactions/process", request).await
    }

    pub async fn transaction_status(&self, id: &str) -> Result<StatusView, ClientError> {
        self.get(&format!("/v1/transactions/status/{}", id)).await
    }

    pub async fn verify_transaction(&self, id: &str, user_confirmed: bool) -> Result<VerificationResult, ClientError> {
        let url = self.url(&format!("/v1/transactions/verify/{}", id));
        let query = [("user_confirmed", user_confirmed)];
        decode(self.send_authorized(|| self.inner.http.post(&url).query(&query)).await?).await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ClientError> {
        self.get("/dashboard/stats").await
    }

    pub async fn risk_distribution(&self) -> Result<Vec<RiskBucket>, ClientError> {
        self.get("/dashboard/risk-distribution").await
    }

    pub async fn heatmap(&self) -> Result<Heatmap, ClientError> {
        self.get("/dashboard/heatmap").await
    }

    pub async fn list_transactions(&self, filter: &TransactionFilter) -> Result<TransactionPage, ClientError> {
        self.get_query("/transactions", filter).await
    }

    pub async fn transaction(&self, id: &str) -> Result<Transaction, ClientError> {
        self.get(&format!("/transactions/{}", id)).await
    }

    pub async fn transaction_events(&self, id: &str) -> Result<Vec<Event>, ClientError> {
        self.get(&format!("/transactions/{}/events", id)).await
    }

    pub async fn take_action(&self, id: &str, action: AnalystAction) -> Result<ActionResult, ClientError> {
        self.put(&format!("/transactions/{}/action", id), &serde_json::json!({ "action": action }))
            .await
    }

    pub async fn bulk_action(&self, ids: &[String], action: AnalystAction) -> Result<BulkActionResult, ClientError> {
        self.post("/transactions/bulk-action", &serde_json::json!({ "ids": ids, "action": action }))
            .await
    }
}

fn with_bearer(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    let detail = match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => err.detail,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    let detail = if detail.is_empty() {
        status.canonical_reason().unwrap_or("Request failed").to_string()
    } else {
        detail
    };
    ClientError::Status {
        status: status.as_u16(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_prefers_detail() {
        let err = status_error(StatusCode::BAD_REQUEST, br#"{"detail":"Email already registered"}"#);
        assert!(matches!(err, ClientError::Status { status: 400, ref detail } if detail == "Email already registered"));

        let err = status_error(StatusCode::BAD_GATEWAY, b"upstream down");
        assert!(matches!(err, ClientError::Status { status: 502, ref detail } if detail == "upstream down"));

        let err = status_error(StatusCode::NOT_FOUND, b"");
        assert!(matches!(err, ClientError::Status { status: 404, ref detail } if detail == "Not Found"));
    }

    #[test]
    fn test_initial_session_state_follows_store() {
        use crate::client::MemoryTokenStore;

        let empty = ApiClient::new("http://localhost/api/", Arc::new(MemoryTokenStore::new()));
        assert_eq!(empty.session_state(), SessionEvent::LoggedOut);
        assert_eq!(empty.base_url(), "http://localhost/api");

        let stored = ApiClient::new(
            "http://localhost/api",
            Arc::new(MemoryTokenStore::with_tokens(Tokens::new("a", "r"))),
        );
        assert_eq!(stored.session_state(), SessionEvent::Authenticated);
    }
}
