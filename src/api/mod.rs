pub mod health;
pub mod orders;
pub mod positions;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/orders", orders::router())
        .nest("/api/positions", positions::router())
        .nest("/api/holdings", positions::holdings_router())
}
