//! Orders API
//!
//! - POST /api/orders - Place an order (market fills now; limit/stop rests)
//! - GET /api/orders - List a user's orders
//! - GET /api/orders/:id - Get order details
//! - DELETE /api/orders/:id - Cancel a resting order

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::services::EngineError;
use crate::types::{Order, PlaceOrderRequest, PlaceOrderResponse};
use crate::AppState;

/// Create orders router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(place_order))
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id", delete(cancel_order))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOrdersQuery {
    user_id: String,
    limit: Option<u32>,
}

async fn place_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>, EngineError> {
    let response = state.coordinator.place_order(request).await?;
    Ok(Json(response))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Json<Vec<Order>> {
    let orders = state
        .store
        .get_user_orders(&query.user_id, query.limit.unwrap_or(100));
    Json(orders)
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, EngineError> {
    state
        .coordinator
        .get_order(&id)
        .map(Json)
        .ok_or(EngineError::OrderNotFound(id))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, EngineError> {
    let order = state.coordinator.cancel_order(&id).await?;
    Ok(Json(order))
}
