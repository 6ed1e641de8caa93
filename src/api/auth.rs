// Auth endpoints: /api/auth/*

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{AppState, AuthUser, MessageResponse};
use crate::auth::{generate_token, ExternalIdentity, TokenResponse};
use crate::db;
use crate::entities::{LoginRequest, PreferencesUpdate, SignupRequest, UserProfile};
use crate::error::{AppError, AppResult};
use crate::oauth::{authorization_url, frontend_error_redirect, frontend_success_redirect, STATE_TTL_MINUTES};

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenParam {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleCallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// POST /api/auth/signup
pub async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> AppResult<Json<TokenResponse>> {
    let conn = state.db()?;
    Ok(Json(state.auth_service(&conn).signup(&req)?))
}

/// POST /api/auth/login
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Json<TokenResponse>> {
    let conn = state.db()?;
    Ok(Json(state.auth_service(&conn).login(&req)?))
}

/// POST /api/auth/refresh
pub async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> AppResult<Json<TokenResponse>> {
    let conn = state.db()?;
    Ok(Json(state.auth_service(&conn).refresh(&req.refresh_token)?))
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<UserProfile>> {
    let conn = state.db()?;
    Ok(Json(state.auth_service(&conn).me(&user.user_id)?))
}

/// PUT /api/auth/me/preferences
pub async fn update_preferences(
    State(state): State<AppState>,
    user: AuthUser,
    Json(update): Json<PreferencesUpdate>,
) -> AppResult<Json<UserProfile>> {
    let conn = state.db()?;
    Ok(Json(state.auth_service(&conn).update_preferences(&user.user_id, &update)?))
}

/// POST /api/auth/logout (body optional)
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<LogoutRequest>>,
) -> AppResult<Json<MessageResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let conn = state.db()?;
    state
        .auth_service(&conn)
        .logout(&user.token, body.refresh_token.as_deref())?;
    Ok(MessageResponse::new("Logged out successfully"))
}

/// POST /api/auth/verify-email?token=... (or {"token": ...})
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<TokenParam>,
    body: Option<Json<TokenParam>>,
) -> AppResult<Json<MessageResponse>> {
    let token = query
        .token
        .or_else(|| body.and_then(|Json(b)| b.token))
        .ok_or(AppError::InvalidVerificationToken("verification"))?;

    let conn = state.db()?;
    state.auth_service(&conn).verify_email(&token)?;
    Ok(MessageResponse::new("Email verified successfully"))
}

/// POST /api/auth/forgot-password
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let conn = state.db()?;
    if let Err(e) = state.auth_service(&conn).forgot_password(&req.email) {
        // Same answer either way
        warn!(error = %e, "Password reset request failed");
    }
    Ok(MessageResponse::new("If email exists, reset link will be sent"))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let conn = state.db()?;
    state.auth_service(&conn).reset_password(&req.token, &req.new_password)?;
    Ok(MessageResponse::new("Password reset successfully"))
}

// ============================================================================
// Google OAuth
// ============================================================================

/// GET /api/auth/google/login - Redirect to Google's consent screen
pub async fn google_login(State(state): State<AppState>) -> AppResult<Redirect> {
    let login_state = generate_token();
    let url = authorization_url(&state.settings.google, &login_state)?;

    let conn = state.db()?;
    db::insert_oauth_state(&conn, &login_state, Utc::now() + Duration::minutes(STATE_TTL_MINUTES))?;
    Ok(Redirect::temporary(&url))
}

fn consume_state(state: &AppState, login_state: &str) -> AppResult<bool> {
    let conn = state.db()?;
    Ok(db::consume_oauth_state(&conn, login_state, Utc::now())?)
}

fn sign_in(state: &AppState, identity: &ExternalIdentity) -> AppResult<TokenResponse> {
    let conn = state.db()?;
    state.auth_service(&conn).login_with_external(identity)
}

async fn complete_google_login(state: &AppState, params: GoogleCallbackParams) -> AppResult<TokenResponse> {
    if let Some(error) = params.error {
        return Err(AppError::Upstream(format!("Google sign-in cancelled: {}", error)));
    }

    let login_state = params
        .state
        .ok_or_else(|| AppError::Unauthorized("Missing OAuth state".to_string()))?;
    if !consume_state(state, &login_state)? {
        return Err(AppError::Unauthorized("Invalid or expired OAuth state".to_string()));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::validation("Missing authorization code"))?;
    let identity = state.google.identify(&code).await?;
    sign_in(state, &identity)
}

/// GET /api/auth/google/callback - Finish login and bounce back to the frontend
pub async fn google_callback(State(state): State<AppState>, Query(params): Query<GoogleCallbackParams>) -> Response {
    match complete_google_login(&state, params).await {
        Ok(tokens) => Redirect::temporary(&frontend_success_redirect(&state.settings, &tokens)).into_response(),
        Err(e) => {
            warn!(error = %e, "Google login failed");
            Redirect::temporary(&frontend_error_redirect(&state.settings, &e.public_detail())).into_response()
        }
    }
}
