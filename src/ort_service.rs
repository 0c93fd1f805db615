use crate::{
    config::{ConcurrencyPolicy, ModelConfig},
    model_service::{InferenceError, ModelService},
};
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    tensor::TensorElementType,
    value::{TensorRef, ValueType},
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Model artifact not found at {0:?}")]
    ArtifactMissing(PathBuf),
    #[error("Failed to build inference session: {0}")]
    Session(#[from] ort::Error),
    #[error("Model signature could not be determined: {0}")]
    Signature(String),
}

/// Name, element type and declared dims of one model input or output.
/// Captured once at load; dynamic dims are kept as negative values.
#[derive(Debug, Clone)]
struct TensorSignature {
    name: String,
    ty: TensorElementType,
    dims: Vec<i64>,
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input: TensorSignature,
    output: TensorSignature,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let model_path = model_config.get_model_path();
        if !model_path.exists() {
            return Err(ModelLoadError::ArtifactMissing(model_path));
        }

        ort::init().commit()?;

        // One mutexed session serializes every infer call; the pool only
        // grows when the engine build is trusted to run sessions in parallel.
        let num_sessions = match model_config.concurrency {
            ConcurrencyPolicy::Serialize => 1,
            ConcurrencyPolicy::Concurrent => model_config.num_instances.max(1),
        };

        let sessions = (0..num_sessions)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let (input, output) = {
            let session = sessions[0]
                .lock()
                .map_err(|_| ModelLoadError::Signature("session mutex poisoned".into()))?;

            let input = session
                .inputs
                .first()
                .ok_or_else(|| ModelLoadError::Signature("model declares no inputs".into()))
                .and_then(|i| tensor_signature(&i.name, &i.input_type))?;
            let output = session
                .outputs
                .first()
                .ok_or_else(|| ModelLoadError::Signature("model declares no outputs".into()))
                .and_then(|o| tensor_signature(&o.name, &o.output_type))?;

            (input, output)
        };

        tracing::info!(
            "Created {} ONNX session(s) for {:?}: input `{}` {:?}, output `{}` {:?}",
            num_sessions,
            model_path,
            input.name,
            input.dims,
            output.name,
            output.dims,
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            input,
            output,
        })
    }

    fn check_input(&self, got: &[usize]) -> Result<(), InferenceError> {
        if self.input.ty != TensorElementType::Float32 {
            return Err(InferenceError::DtypeMismatch {
                declared: format!("{:?}", self.input.ty),
            });
        }
        if !shape_matches(&self.input.dims, got) {
            return Err(InferenceError::ShapeMismatch {
                declared: self.input.dims.clone(),
                got: got.to_vec(),
            });
        }
        Ok(())
    }

    /// The number of classes the artifact promises, if its output width is
    /// declared statically.
    fn declared_classes(&self) -> Option<usize> {
        self.output
            .dims
            .last()
            .filter(|&&dim| dim > 0)
            .map(|&dim| dim as usize)
    }
}

impl ModelService for OrtModelService {
    fn infer(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, InferenceError> {
        self.check_input(input.shape())?;

        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|_| InferenceError::SessionPoisoned)?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![self.input.name.as_str() => tensor_ref])?;

        let (_, data) = outputs[self.output.name.as_str()].try_extract_tensor::<f32>()?;
        let scores = data.to_vec();

        if let Some(expected) = self.declared_classes() {
            if scores.len() != expected {
                return Err(InferenceError::UnexpectedOutput {
                    expected,
                    got: scores.len(),
                });
            }
        }

        Ok(scores)
    }
}

fn tensor_signature(name: &str, value_type: &ValueType) -> Result<TensorSignature, ModelLoadError> {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => Ok(TensorSignature {
            name: name.to_string(),
            ty: *ty,
            dims: shape.iter().copied().collect(),
        }),
        other => Err(ModelLoadError::Signature(format!(
            "`{}` is not a tensor value: {:?}",
            name, other
        ))),
    }
}

/// Negative declared dims are dynamic and match anything.
fn shape_matches(declared: &[i64], got: &[usize]) -> bool {
    declared.len() == got.len()
        && declared
            .iter()
            .zip(got)
            .all(|(&dim, &actual)| dim < 0 || dim as usize == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyPolicy;

    #[test]
    fn loading_a_missing_artifact_fails_before_engine_init() {
        let config = ModelConfig {
            model_dir: PathBuf::from("/nonexistent"),
            onnx_file: "missing.onnx".to_string(),
            num_instances: 1,
            concurrency: ConcurrencyPolicy::Serialize,
        };

        let result = OrtModelService::new(&config);
        assert!(matches!(result, Err(ModelLoadError::ArtifactMissing(_))));
    }

    #[test]
    fn shape_matches_exact_dims() {
        assert!(shape_matches(&[1, 3, 224, 224], &[1, 3, 224, 224]));
        assert!(!shape_matches(&[1, 3, 640, 640], &[1, 3, 224, 224]));
    }

    #[test]
    fn shape_matches_treats_negative_dims_as_dynamic() {
        assert!(shape_matches(&[-1, 3, 224, 224], &[1, 3, 224, 224]));
        assert!(shape_matches(&[-1, 3, 224, 224], &[8, 3, 224, 224]));
        assert!(!shape_matches(&[-1, 3, 224, 224], &[1, 1, 224, 224]));
    }

    #[test]
    fn shape_matches_rejects_rank_mismatch() {
        assert!(!shape_matches(&[3, 224, 224], &[1, 3, 224, 224]));
    }
}
