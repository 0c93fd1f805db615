use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Input shape {got:?} does not match the declared signature {declared:?}")]
    ShapeMismatch { declared: Vec<i64>, got: Vec<usize> },
    #[error("Input dtype f32 does not match the declared element type {declared}")]
    DtypeMismatch { declared: String },
    #[error("Model returned {got} scores, expected {expected}")]
    UnexpectedOutput { expected: usize, got: usize },
    #[error("Model produced no scores")]
    EmptyOutput,
    #[error("Session mutex poisoned")]
    SessionPoisoned,
    #[error("Inference engine failure: {0}")]
    Engine(#[from] ort::Error),
}

/// One forward pass over the loaded model. Implementations own the engine
/// handle and whatever locking the engine needs; callers hand in a
/// `(1, 3, 224, 224)` tensor and get back the raw score vector.
pub trait ModelService: Send + Sync + Clone + 'static {
    fn infer(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, InferenceError>;
}
