//! Positions API
//!
//! - GET /api/positions - Active positions for a user (optional type filter)
//! - GET /api/positions/history - Paginated position history by date range
//! - GET /api/positions/due-square-off - Intraday positions past the cutoff
//! - GET /api/positions/expired-delivery - Delivery positions awaiting conversion
//! - GET /api/positions/:id - Get position details
//! - POST /api/positions/:id/square-off - Manually square off a position
//! - GET /api/holdings - Holdings for a user

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::services::EngineError;
use crate::types::{Holding, Position, PositionHistoryQuery, PositionQuery};
use crate::AppState;

/// Create positions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_positions))
        .route("/history", get(position_history))
        .route("/due-square-off", get(due_square_off))
        .route("/expired-delivery", get(expired_delivery))
        .route("/:id", get(get_position))
        .route("/:id/square-off", post(square_off))
}

/// Create holdings router.
pub fn holdings_router() -> Router<AppState> {
    Router::new().route("/", get(list_holdings))
}

async fn list_positions(
    State(state): State<AppState>,
    Query(query): Query<PositionQuery>,
) -> Json<Vec<Position>> {
    let positions = state
        .store
        .get_active_positions(&query.user_id, query.position_type);
    Json(positions)
}

async fn position_history(
    State(state): State<AppState>,
    Query(query): Query<PositionHistoryQuery>,
) -> Json<Vec<Position>> {
    let positions = state.store.get_position_history(
        &query.user_id,
        query.from,
        query.to,
        query.limit,
        query.offset,
    );
    Json(positions)
}

async fn due_square_off(State(state): State<AppState>) -> Json<Vec<Position>> {
    let now = state.clock.now_ms();
    Json(state.store.get_intraday_due_for_square_off(now))
}

async fn expired_delivery(State(state): State<AppState>) -> Json<Vec<Position>> {
    let now = state.clock.now_ms();
    Json(state.store.get_expired_delivery_positions(now))
}

async fn get_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Position>, EngineError> {
    state
        .store
        .get_position(&id)
        .map(Json)
        .ok_or(EngineError::PositionNotFound(id))
}

/// Manual square-off: routed through the coordinator exactly like the
/// sweeper's automatic square-off, contending on the same position lock.
async fn square_off(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Position>, EngineError> {
    let position = state
        .coordinator
        .square_off_position(&id, "manual")
        .await?;
    Ok(Json(position))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldingsQuery {
    user_id: String,
}

async fn list_holdings(
    State(state): State<AppState>,
    Query(query): Query<HoldingsQuery>,
) -> Json<Vec<Holding>> {
    Json(state.store.get_user_holdings(&query.user_id))
}
