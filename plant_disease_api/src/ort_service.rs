use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelService, ModelServiceError},
};
use async_trait::async_trait;
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX Runtime backed classifier. Holds a fixed pool of sessions over the same
/// model file, handed out round-robin.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelServiceError> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelServiceError::Load(e.to_string()))?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
        })
    }

    fn next_session(&self) -> (usize, Arc<Mutex<Session>>) {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        (index, self.sessions[index].clone())
    }
}

fn run_session(
    session: &Mutex<Session>,
    input: &Array<f32, Ix4>,
) -> Result<Vec<f32>, ModelServiceError> {
    let mut session = session
        .lock()
        .map_err(|e| ModelServiceError::Poisoned(e.to_string()))?;

    let owned_buffer;
    let input_view = if input.view().is_standard_layout() {
        input.view()
    } else {
        owned_buffer = input.as_standard_layout().into_owned();
        owned_buffer.view()
    };

    let tensor_ref = TensorRef::from_array_view(input_view)
        .map_err(|e| ModelServiceError::Inference(format!("failed to build tensor: {}", e)))?;

    let outputs = session
        .run(ort::inputs![tensor_ref])
        .map_err(|e| ModelServiceError::Inference(e.to_string()))?;

    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ModelServiceError::Inference(format!("failed to extract tensor: {}", e)))?;

    tracing::debug!("Model output shape {:?}", shape);

    Ok(data.to_vec())
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn infer(&self, input: Array<f32, Ix4>) -> Result<Vec<f32>, ModelServiceError> {
        let (index, session) = self.next_session();
        tracing::debug!("Handling request with session {}", index);

        tokio::task::spawn_blocking(move || run_session(&session, &input)).await?
    }
}
