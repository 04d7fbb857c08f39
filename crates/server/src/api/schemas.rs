use axum::Json;
use serde::Serialize;

/// Success envelope: `{success: true, data}`.
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
    }))
}
