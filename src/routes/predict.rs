use crate::{inference_service::PredictError, server::SharedState};
use axum::{
    extract::{
        multipart::{Multipart, MultipartError},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tokio::{task, time::timeout};
use tracing::instrument;

const PREDICTION_MESSAGE: &str = "Model ran successfully!";

#[derive(Serialize)]
pub struct PredictionResponse {
    class_index: usize,
    confidence: f32,
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Error, Debug)]
pub enum PredictApiError {
    #[error("Invalid multipart upload: {0}")]
    InvalidUpload(#[from] MultipartError),
    #[error("No `file` field found in the upload")]
    MissingFile,
    #[error("Prediction did not complete within the request deadline")]
    DeadlineExceeded,
    #[error("Prediction worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Pipeline(#[from] PredictError),
}

impl IntoResponse for PredictApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictApiError::InvalidUpload(_) | PredictApiError::MissingFile => {
                StatusCode::BAD_REQUEST
            }
            // Undecodable uploads are the caller's fault; everything past
            // the decode stage is ours.
            PredictApiError::Pipeline(PredictError::Decode(_)) => StatusCode::BAD_REQUEST,
            PredictApiError::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Prediction request failed: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictApiError> {
    state.metrics.record_request("predict");

    let image_data = read_upload(&mut multipart).await?;

    // The forward pass is CPU-bound; run it off the async executor and
    // bound it with the per-request deadline.
    let service = state.inference_service.clone();
    let started = Instant::now();
    let joined = timeout(
        state.request_timeout,
        task::spawn_blocking(move || service.predict(&image_data)),
    )
    .await
    .map_err(|_| PredictApiError::DeadlineExceeded)?;

    let prediction = joined.map_err(|e| PredictApiError::Worker(e.to_string()))??;

    state
        .metrics
        .record_pipeline_duration(started.elapsed().as_millis() as u64, "predict");

    Ok(Json(PredictionResponse {
        class_index: prediction.class_index,
        confidence: prediction.confidence,
        message: PREDICTION_MESSAGE,
    }))
}

async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, PredictApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            return Ok(field.bytes().await?.to_vec());
        }
    }

    Err(PredictApiError::MissingFile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model_service::InferenceError, preprocess::DecodeError};

    fn decode_error() -> PredictApiError {
        PredictApiError::Pipeline(PredictError::Decode(DecodeError::ZeroDimensions))
    }

    fn inference_error() -> PredictApiError {
        PredictApiError::Pipeline(PredictError::Inference(InferenceError::EmptyOutput))
    }

    #[test]
    fn decode_faults_map_to_client_errors() {
        let response = decode_error().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = PredictApiError::MissingFile.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn inference_faults_map_to_server_errors() {
        let response = inference_error().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn deadline_expiry_maps_to_request_timeout() {
        let response = PredictApiError::DeadlineExceeded.into_response();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
