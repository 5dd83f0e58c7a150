use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct ClassLabelsResponse {
    pub labels: Vec<String>,
}

pub async fn class_labels<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Json<ClassLabelsResponse> {
    state.metrics.record_request("/labels");

    Json(ClassLabelsResponse {
        labels: state.labels.as_slice().to_vec(),
    })
}
