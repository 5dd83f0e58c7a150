use axum::response::Json;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
}

/// Liveness only; the model is loaded before the listener is bound.
pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Available".into(),
    })
}
