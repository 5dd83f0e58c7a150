use crate::{
    classification::{ClassificationError, Prediction},
    model_service::{ModelService, ModelServiceError},
    preprocessing::{preprocess_image, PreprocessError},
    server::SharedState,
    upload::{allowed_file, UploadError},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::instrument;

const ROUTE: &str = "/predict";
const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No image provided")]
    NoImage,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Model(#[from] ModelServiceError),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("Prediction task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PredictionResponse {
    pub disease: String,
    pub confidence: f32,
    pub status: String,
}

impl From<Prediction> for PredictionResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            disease: prediction.label,
            confidence: prediction.confidence,
            status: "success".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClientErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ServerErrorResponse {
    pub status: String,
    pub message: String,
    pub error: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let client_error = match &self {
            PredictError::NoImage | PredictError::NoSelectedFile | PredictError::InvalidFileType => {
                Some(StatusCode::BAD_REQUEST)
            }
            PredictError::Multipart(err) => Some(err.status()),
            _ => None,
        };

        match client_error {
            Some(status) => (
                status,
                Json(ClientErrorResponse {
                    error: self.to_string(),
                }),
            )
                .into_response(),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ServerErrorResponse {
                    status: "error".to_string(),
                    message: "Failed to process image".to_string(),
                    error: self.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict_image<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, PredictError> {
    state.metrics.record_request(ROUTE);

    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Request is not a multipart upload: {}", rejection);
        PredictError::NoImage
    })?;

    let (filename, data) = read_image_field(&mut multipart)
        .await?
        .ok_or(PredictError::NoImage)?;

    if filename.is_empty() {
        return Err(PredictError::NoSelectedFile);
    }
    if !allowed_file(&filename) {
        return Err(PredictError::InvalidFileType);
    }

    let started = Instant::now();
    let prediction = run_prediction(&state, filename, data)
        .await
        .inspect_err(|e| tracing::error!("Prediction failed: {}", e))?;

    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, ROUTE);
    state.metrics.record_prediction(&prediction.label);
    tracing::debug!(
        "Predicted class_id={}, label={}, confidence={:.3}",
        prediction.class_id,
        prediction.label,
        prediction.confidence
    );

    Ok(Json(prediction.into()))
}

/// Returns the filename and content of the first `image` part that is a file.
async fn read_image_field(
    multipart: &mut Multipart,
) -> Result<Option<(String, Bytes)>, PredictError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        return Ok(Some((filename, data)));
    }

    Ok(None)
}

async fn run_prediction<M: ModelService>(
    state: &SharedState<M>,
    filename: String,
    data: Bytes,
) -> Result<Prediction, PredictError> {
    let uploads = state.uploads.clone();

    // Any early return below drops `upload`, which deletes the file.
    let (upload, input) = task::spawn_blocking(move || -> Result<_, PredictError> {
        let upload = uploads.persist(&filename, &data)?;
        let input = preprocess_image(upload.path())?;
        Ok((upload, input))
    })
    .await??;

    let logits = state.model_service.infer(input).await?;
    let prediction = Prediction::from_logits(&logits, &state.labels)?;

    upload.close().map_err(UploadError::from)?;

    Ok(prediction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        labels::{ClassLabels, DISEASE_CLASSES},
        server::build_router,
        telemetry::Metrics,
        upload::UploadStore,
    };
    use async_trait::async_trait;
    use axum::{body::Body, extract::Request, http::header::CONTENT_TYPE, Router};
    use http_body_util::BodyExt;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use ndarray::{Array, Ix4};
    use std::{io::Cursor, path::Path, sync::Arc};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "leaf-boundary";

    /// Scores each class from simple statistics of the input so that different
    /// images give different, but repeatable, predictions.
    struct MockModelService {}

    #[async_trait]
    impl ModelService for MockModelService {
        async fn infer(&self, input: Array<f32, Ix4>) -> Result<Vec<f32>, ModelServiceError> {
            let shape = input.shape().to_vec();
            assert_eq!(shape, vec![1, 3, 224, 224]);

            let channel_mean =
                |c: usize| input.slice(ndarray::s![0, c, .., ..]).mean().unwrap_or(0.0);
            Ok(vec![
                channel_mean(0),
                channel_mean(1),
                channel_mean(2),
                0.5,
                -0.5,
            ])
        }
    }

    struct FailingModelService {}

    #[async_trait]
    impl ModelService for FailingModelService {
        async fn infer(&self, _input: Array<f32, Ix4>) -> Result<Vec<f32>, ModelServiceError> {
            Err(ModelServiceError::Inference("out of memory".to_string()))
        }
    }

    fn test_app<M: ModelService>(model_service: M) -> (Router, TempDir) {
        test_app_with_limit(model_service, 16 * 1024 * 1024)
    }

    fn test_app_with_limit<M: ModelService>(
        model_service: M,
        max_upload_bytes: usize,
    ) -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path().join("uploads")).unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let state = SharedState::new(model_service, ClassLabels::default(), uploads, metrics);

        (build_router(state, max_upload_bytes), dir)
    }

    fn encode_image(format: ImageFormat, color: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(320, 240, Rgb(color));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, format).unwrap();
        cursor.into_inner()
    }

    fn multipart_request(field_name: &str, filename: Option<&str>, data: &[u8]) -> Request {
        let disposition = match filename {
            Some(filename) => format!(
                "form-data; name=\"{}\"; filename=\"{}\"",
                field_name, filename
            ),
            None => format!("form-data; name=\"{}\"", field_name),
        };

        let mut body = format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, request: Request) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    fn upload_count(dir: &TempDir) -> usize {
        let uploads: &Path = &dir.path().join("uploads");
        std::fs::read_dir(uploads).unwrap().count()
    }

    #[tokio::test]
    async fn test_predict_png() {
        let (app, dir) = test_app(MockModelService {});
        let image = encode_image(ImageFormat::Png, [30, 160, 40]);

        let (status, body) = send(&app, multipart_request("image", Some("leaf.png"), &image)).await;

        assert_eq!(status, StatusCode::OK);
        let response: PredictionResponse = serde_json::from_value(body).unwrap();
        assert!(DISEASE_CLASSES.contains(&response.disease.as_str()));
        assert!((0.0..=1.0).contains(&response.confidence));
        assert_eq!(response.status, "success");
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_predict_jpeg_with_uppercase_extension() {
        let (app, dir) = test_app(MockModelService {});
        let image = encode_image(ImageFormat::Jpeg, [200, 180, 20]);

        let (status, body) =
            send(&app, multipart_request("image", Some("Leaf Photo.JPEG"), &image)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_predict_is_repeatable() {
        let (app, _dir) = test_app(MockModelService {});
        let image = encode_image(ImageFormat::Png, [90, 20, 220]);

        let (_, first) = send(&app, multipart_request("image", Some("a.png"), &image)).await;
        let (_, second) = send(&app, multipart_request("image", Some("a.png"), &image)).await;

        assert_eq!(first["disease"], second["disease"]);
        assert_eq!(first["confidence"], second["confidence"]);
    }

    #[tokio::test]
    async fn test_predict_long_filename() {
        let (app, dir) = test_app(MockModelService {});
        let image = encode_image(ImageFormat::Png, [30, 160, 40]);
        let filename = format!("{}.png", "a".repeat(246));

        let (status, body) =
            send(&app, multipart_request("image", Some(&filename), &image)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let (app, dir) = test_app_with_limit(MockModelService {}, 1024);
        let data = vec![7u8; 4096];

        let (status, body) = send(&app, multipart_request("image", Some("leaf.png"), &data)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid multipart body"));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let (app, _dir) = test_app(MockModelService {});
        let image = encode_image(ImageFormat::Png, [0, 0, 0]);

        let (status, body) = send(&app, multipart_request("file", Some("leaf.png"), &image)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_image_field_without_file() {
        let (app, _dir) = test_app(MockModelService {});

        let (status, body) = send(&app, multipart_request("image", None, b"text value")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_non_multipart_request() {
        let (app, _dir) = test_app(MockModelService {});
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_empty_filename() {
        let (app, _dir) = test_app(MockModelService {});

        let (status, body) = send(&app, multipart_request("image", Some(""), b"")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No selected file");
    }

    #[tokio::test]
    async fn test_invalid_file_type() {
        let (app, dir) = test_app(MockModelService {});
        let image = encode_image(ImageFormat::Png, [0, 0, 0]);

        for filename in ["leaf.gif", "leaf.PNG.txt", "leaf"] {
            let (status, body) =
                send(&app, multipart_request("image", Some(filename), &image)).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", filename);
            assert_eq!(body["error"], "Invalid file type");
        }
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_cleaned_up() {
        let (app, dir) = test_app(MockModelService {});

        let (status, body) = send(
            &app,
            multipart_request("image", Some("leaf.jpg"), b"not really a jpeg"),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Failed to process image");
        assert!(body["error"].as_str().unwrap().contains("decoding"));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_model_failure_is_cleaned_up() {
        let (app, dir) = test_app(FailingModelService {});
        let image = encode_image(ImageFormat::Png, [10, 200, 10]);

        let (status, body) = send(&app, multipart_request("image", Some("leaf.png"), &image)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Inference failed: out of memory");
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_labels_and_health() {
        let (app, _dir) = test_app(MockModelService {});

        let labels = Request::builder().uri("/labels").body(Body::empty()).unwrap();
        let (status, body) = send(&app, labels).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["labels"].as_array().unwrap().len(), DISEASE_CLASSES.len());
        assert_eq!(body["labels"][0], "Early Blight");

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, health).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Available");
    }
}
