// 🌐 REST API - axum router, shared state, auth extractor, error mapping
//
// Handlers lock the shared SQLite connection, run a synchronous service call
// and release the lock before any `.await`.

mod auth;
mod dashboard;
mod demo;
mod transactions;
mod users;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::AuthService;
use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::notify::{Notifier, OutboxNotifier};
use crate::oauth::GoogleClient;
use crate::scoring::RiskModel;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    pub settings: Arc<Settings>,
    pub model: Arc<dyn RiskModel>,
    pub notifier: Arc<dyn Notifier>,
    pub google: GoogleClient,
}

impl AppState {
    pub fn new(conn: Connection, settings: Settings, model: Arc<dyn RiskModel>) -> Self {
        let google = GoogleClient::new(settings.google.clone());
        Self {
            db: Arc::new(Mutex::new(conn)),
            settings: Arc::new(settings),
            model,
            notifier: Arc::new(OutboxNotifier),
            google,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn db(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("database lock poisoned")))
    }

    pub fn auth_service<'a>(&'a self, conn: &'a Connection) -> AuthService<'a> {
        AuthService::new(conn, &self.settings, self.notifier.as_ref())
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if let AppError::Internal(cause) = &self {
            error!(error = ?cause, "Request failed");
        }
        (status, Json(serde_json::json!({ "detail": self.public_detail() }))).into_response()
    }
}

// ============================================================================
// Bearer authentication
// ============================================================================

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Authenticated caller, resolved from `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;
        let user_id = authenticate(state, &token)?;
        Ok(AuthUser { user_id, token })
    }
}

fn authenticate(state: &AppState, token: &str) -> AppResult<String> {
    let conn = state.db()?;
    state.auth_service(&conn).authenticate(token)
}

// ============================================================================
// Service banner
// ============================================================================

/// GET / - Service banner
async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "VerifAI - Agentic Fraud Detection",
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "message": "VerifAI is running",
    }))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Auth
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/me", get(auth::me))
        .route("/auth/me/preferences", put(auth::update_preferences))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/google/login", get(auth::google_login))
        .route("/auth/google/callback", get(auth::google_callback))
        // Demo
        .route("/demo/request", post(demo::request_demo))
        // Risk agent
        .route("/v1/transactions/process", post(transactions::process))
        .route("/v1/transactions/status/:id", get(transactions::status))
        .route("/v1/transactions/verify/:id", post(transactions::verify))
        .route("/v1/users/register", post(users::register))
        .route("/v1/users/:id", get(users::profile))
        // Dashboard (bearer protected)
        .route("/dashboard/stats", get(dashboard::stats))
        .route("/dashboard/risk-distribution", get(dashboard::risk_distribution))
        .route("/dashboard/heatmap", get(dashboard::heatmap))
        .route("/transactions", get(dashboard::list))
        .route("/transactions/bulk-action", post(dashboard::bulk_action))
        .route("/transactions/:id", get(dashboard::get_one))
        .route("/transactions/:id/events", get(dashboard::events))
        .route("/transactions/:id/action", put(dashboard::action));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_error_response_status() {
        let response = AppError::NotFound("Transaction".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
