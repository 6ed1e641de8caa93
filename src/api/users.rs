// Monitored users: /api/v1/users/*

use axum::extract::{Path, State};
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::{ApiResponse, AppState};
use crate::dashboard::{behavior_profile, BehaviorProfile};
use crate::db::{self, MonitoredUser};
use crate::entities::user::validate_email;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /api/v1/users/register - Start monitoring a user
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<ApiResponse<MonitoredUser>>> {
    let email = req.email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty());
    if let Some(email) = &email {
        validate_email(email)?;
    }
    let phone_number = req.phone_number.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    if email.is_none() && phone_number.is_none() {
        return Err(AppError::validation("email or phone_number is required"));
    }

    let user = MonitoredUser {
        user_id: uuid::Uuid::new_v4().to_string(),
        phone_number,
        email,
        name: req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        created_at: Utc::now(),
    };

    let conn = state.db()?;
    db::insert_monitored_user(&conn, &user)?;
    info!(user_id = %user.user_id, "Monitored user registered");

    Ok(Json(ApiResponse::with_message(user, "User registered successfully")))
}

/// GET /api/v1/users/:id - Behavior profile built from stored transactions
pub async fn profile(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<BehaviorProfile>> {
    let conn = state.db()?;
    Ok(Json(behavior_profile(&conn, &id)?))
}
