use crate::{
    model_service::{InferenceError, ModelService},
    preprocess::{self, DecodeError, NormalizeError},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Image decoding failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Image normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
}

/// The class index with the highest raw score, and that score. The score is
/// deliberately not rescaled to a probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub confidence: f32,
}

/// Runs the per-request pipeline against an injected model. A failing stage
/// short-circuits; nothing downstream of it is attempted.
#[derive(Debug, Clone)]
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(model_service: M) -> Self {
        Self {
            model_service: Arc::new(model_service),
        }
    }

    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, PredictError> {
        let decoded = preprocess::decode(image_bytes)?;
        let input = preprocess::normalize(&decoded)?;
        let scores = self.model_service.infer(&input)?;

        let (class_index, confidence) = argmax(&scores).ok_or(InferenceError::EmptyOutput)?;
        tracing::debug!(
            "Scored image: class_index={}, confidence={:.3}",
            class_index,
            confidence
        );

        Ok(Prediction {
            class_index,
            confidence,
        })
    }
}

/// First index wins on ties, so predictions stay reproducible with
/// quantized models that emit equal top scores.
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::{Array, Ix4};
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Clone)]
    struct MockModelService {
        scores: Vec<f32>,
        calls: Arc<AtomicUsize>,
    }

    impl MockModelService {
        fn returning(scores: Vec<f32>) -> Self {
            Self {
                scores,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ModelService for MockModelService {
        fn infer(&self, _input: &Array<f32, Ix4>) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 100, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        image_data
    }

    #[test]
    fn predict_returns_index_and_raw_score_of_best_class() {
        let mut scores = vec![0.0; 1000];
        scores[7] = 42.5;
        let service = InferenceService::new(MockModelService::returning(scores));

        let prediction = service.predict(&png_bytes()).unwrap();

        assert_eq!(prediction.class_index, 7);
        // Raw score, not a [0,1] probability.
        assert_eq!(prediction.confidence, 42.5);
    }

    #[test]
    fn predict_breaks_ties_on_first_index() {
        let service = InferenceService::new(MockModelService::returning(vec![0.3, 0.9, 0.9, 0.1]));

        let prediction = service.predict(&png_bytes()).unwrap();

        assert_eq!(prediction.class_index, 1);
        assert_eq!(prediction.confidence, 0.9);
    }

    #[test]
    fn decode_failure_never_reaches_the_model() {
        let mock = MockModelService::returning(vec![1.0]);
        let calls = mock.calls.clone();
        let service = InferenceService::new(mock);

        let result = service.predict(b"");
        assert!(matches!(result, Err(PredictError::Decode(_))));

        let result = service.predict(b"not an image at all");
        assert!(matches!(result, Err(PredictError::Decode(_))));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_score_vector_is_an_inference_error() {
        let service = InferenceService::new(MockModelService::returning(Vec::new()));

        let result = service.predict(&png_bytes());
        assert!(matches!(
            result,
            Err(PredictError::Inference(InferenceError::EmptyOutput))
        ));
    }

    #[test]
    fn argmax_prefers_earliest_of_equal_scores() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), Some((1, 3.0)));
        assert_eq!(argmax(&[5.0]), Some((0, 5.0)));
        assert_eq!(argmax(&[]), None);
    }
}
