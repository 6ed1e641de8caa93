// Demo requests: POST /api/demo/request

use axum::extract::State;
use axum::response::Json;
use tracing::info;

use super::{AppState, MessageResponse};
use crate::db::{self, DemoRequest};
use crate::entities::user::validate_email;
use crate::error::{AppError, AppResult};
use crate::notify::Templates;

fn validate(req: &DemoRequest) -> AppResult<()> {
    validate_email(&req.email)?;
    if req.role.trim().is_empty() {
        return Err(AppError::validation("role is required"));
    }
    Ok(())
}

/// POST /api/demo/request - store the lead and notify support
pub async fn request_demo(
    State(state): State<AppState>,
    Json(req): Json<DemoRequest>,
) -> AppResult<Json<MessageResponse>> {
    validate(&req)?;

    let conn = state.db()?;
    let id = db::insert_demo_request(&conn, &req)?;
    let message = Templates::new(&state.settings).demo_request(&req);
    state.notifier.send(&conn, &message)?;

    info!(request_id = %id, role = %req.role, "Demo request received");
    Ok(MessageResponse::new("Demo request sent successfully"))
}
