// Analyst dashboard endpoints (bearer protected)

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{AppState, AuthUser};
use crate::dashboard::{
    self as board, ActionResult, BulkActionResult, DashboardStats, Heatmap, RiskBucket, TransactionFilter,
    TransactionPage,
};
use crate::db::Event;
use crate::entities::{AnalystAction, Transaction};
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: AnalystAction,
}

#[derive(Debug, Deserialize)]
pub struct BulkActionRequest {
    pub ids: Vec<String>,
    pub action: AnalystAction,
}

/// GET /api/dashboard/stats
pub async fn stats(State(state): State<AppState>, _user: AuthUser) -> AppResult<Json<DashboardStats>> {
    let conn = state.db()?;
    Ok(Json(board::stats(&conn, Utc::now())?))
}

/// GET /api/dashboard/risk-distribution
pub async fn risk_distribution(State(state): State<AppState>, _user: AuthUser) -> AppResult<Json<Vec<RiskBucket>>> {
    let conn = state.db()?;
    Ok(Json(board::risk_distribution(&conn)?))
}

/// GET /api/dashboard/heatmap
pub async fn heatmap(State(state): State<AppState>, _user: AuthUser) -> AppResult<Json<Heatmap>> {
    let conn = state.db()?;
    Ok(Json(board::heatmap(&conn)?))
}

/// GET /api/transactions?search=&status=&risk_min=&risk_max=&sort_by=&order=&page=&limit=
pub async fn list(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(filter): Query<TransactionFilter>,
) -> AppResult<Json<TransactionPage>> {
    let conn = state.db()?;
    Ok(Json(board::list_transactions(&conn, &filter)?))
}

/// GET /api/transactions/:id
pub async fn get_one(State(state): State<AppState>, _user: AuthUser, Path(id): Path<String>) -> AppResult<Json<Transaction>> {
    let conn = state.db()?;
    Ok(Json(board::get_transaction(&conn, &id)?))
}

/// GET /api/transactions/:id/events - Audit trail, newest first
pub async fn events(State(state): State<AppState>, _user: AuthUser, Path(id): Path<String>) -> AppResult<Json<Vec<Event>>> {
    let conn = state.db()?;
    Ok(Json(board::transaction_events(&conn, &id)?))
}

/// PUT /api/transactions/:id/action
pub async fn action(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> AppResult<Json<ActionResult>> {
    let conn = state.db()?;
    Ok(Json(board::take_action(&conn, &id, req.action, &user.user_id)?))
}

/// POST /api/transactions/bulk-action
pub async fn bulk_action(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<BulkActionRequest>,
) -> AppResult<Json<BulkActionResult>> {
    let conn = state.db()?;
    Ok(Json(board::bulk_action(&conn, &req.ids, req.action, &user.user_id)?))
}
