use async_trait::async_trait;
use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelServiceError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs one forward pass over a `[1, 3, H, W]` batch and returns the raw class
/// scores of its single element.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn infer(&self, input: Array<f32, Ix4>) -> Result<Vec<f32>, ModelServiceError>;
}
