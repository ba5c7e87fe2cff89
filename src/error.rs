use crate::services::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Map engine errors onto the API's JSON error envelope.
///
/// Feed disruption never reaches here: it is logged and reconnected inside
/// the feed client, and resting orders are left untouched.
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            EngineError::PositionNotFound(_) => (StatusCode::NOT_FOUND, "POSITION_NOT_FOUND"),
            EngineError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            EngineError::DuplicateFill { .. } => (StatusCode::CONFLICT, "DUPLICATE_FILL"),
            EngineError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            EngineError::MissingApproval(_) => (StatusCode::FORBIDDEN, "MISSING_APPROVAL"),
            EngineError::NoPriceData(_) => (StatusCode::SERVICE_UNAVAILABLE, "NO_PRICE_DATA"),
            EngineError::InvalidOrder(_) => (StatusCode::BAD_REQUEST, "INVALID_ORDER"),
            EngineError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_FAILURE")
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
