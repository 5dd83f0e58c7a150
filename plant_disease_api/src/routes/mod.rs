mod health;
mod labels;
mod metrics;
mod predict;

pub use health::healthcheck;
pub use labels::class_labels;
pub use metrics::metrics_handler;
pub use predict::predict_image;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/predict", post(predict_image::<M>))
        .route("/labels", get(class_labels::<M>))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler::<M>))
}
