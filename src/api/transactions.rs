// Risk agent endpoints: /api/v1/transactions/*

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;

use super::AppState;
use crate::agent::{AgentResult, FraudAgent, StatusView, VerificationResult};
use crate::entities::TransactionRequest;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub user_confirmed: bool,
}

fn agent<'a>(state: &'a AppState, conn: &'a rusqlite::Connection) -> FraudAgent<'a> {
    FraudAgent::new(conn, &state.settings, state.model.as_ref(), state.notifier.as_ref())
}

/// POST /api/v1/transactions/process - Score a transaction and act on it
pub async fn process(
    State(state): State<AppState>,
    Json(req): Json<TransactionRequest>,
) -> AppResult<Json<AgentResult>> {
    let conn = state.db()?;
    Ok(Json(agent(&state, &conn).process_transaction(&req)?))
}

/// GET /api/v1/transactions/status/:id
pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<StatusView>> {
    let conn = state.db()?;
    Ok(Json(agent(&state, &conn).status(&id)?))
}

/// POST /api/v1/transactions/verify/:id?user_confirmed=true|false
pub async fn verify(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<VerifyParams>,
) -> AppResult<Json<VerificationResult>> {
    let conn = state.db()?;
    Ok(Json(agent(&state, &conn).handle_verification(&id, params.user_confirmed)?))
}
