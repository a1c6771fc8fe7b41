use indexmap::IndexMap;
use thiserror::Error;

use crate::{DataType, Tensor};

/// Output labels by logit index.
pub const LABELS: [&str; 2] = ["Fake", "Real"];
/// Side length of the square RGB input the network was trained on.
pub const INPUT_SIZE: usize = 384;

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Input must be f32 with shape {expected:?}, got {data_type} with shape {found:?}")]
    InvalidInput {
        expected: [usize; 3],
        found: Vec<usize>,
        data_type: DataType,
    },
    #[error("Backend returned {found} logits for {expected} labels")]
    LogitCount {
        expected: usize,
        found: usize,
    },
    #[error("Backend returned non-finite logits")]
    NonFiniteLogits,
    #[error("Inference failed: {0}")]
    Backend(String),
}

/// A network with its parameters loaded, able to map an image tensor to
/// class logits.
pub trait InferenceBackend {
    fn infer(
        &self,
        input: &Tensor,
    ) -> Result<Box<[f32]>, PredictionError>;
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub predicted_label: String,
    pub predicted_index: usize,
    pub confidence: f32,
    pub probabilities: IndexMap<String, f32>,
}

/// Explicit handle around a loaded backend. Build it once and share it by
/// reference; it holds no mutable state.
pub struct Predictor<B: InferenceBackend> {
    backend: B,
    labels: Vec<String>,
    input_shape: [usize; 3],
}

impl<B: InferenceBackend> Predictor<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            labels: LABELS.iter().map(|label| label.to_string()).collect(),
            input_shape: [3, INPUT_SIZE, INPUT_SIZE],
        }
    }

    pub fn with_labels(
        mut self,
        labels: Vec<String>,
    ) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_input_shape(
        mut self,
        input_shape: [usize; 3],
    ) -> Self {
        self.input_shape = input_shape;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Accepts `[C, H, W]` or a batch of one `[1, C, H, W]`.
    fn check_input(
        &self,
        input: &Tensor,
    ) -> Result<(), PredictionError> {
        let shape = input.shape();
        let unbatched = match shape {
            [1, rest @ ..] if rest.len() == 3 => rest,
            _ => shape,
        };
        if input.data_type() != DataType::F32 || unbatched != self.input_shape.as_slice() {
            return Err(PredictionError::InvalidInput {
                expected: self.input_shape,
                found: shape.to_vec(),
                data_type: input.data_type(),
            });
        }
        Ok(())
    }

    pub fn predict(
        &self,
        input: &Tensor,
    ) -> Result<Prediction, PredictionError> {
        self.check_input(input)?;
        let logits = self.backend.infer(input)?;
        if logits.len() != self.labels.len() {
            return Err(PredictionError::LogitCount {
                expected: self.labels.len(),
                found: logits.len(),
            });
        }
        let probabilities = softmax(&logits)?;
        let (predicted_index, confidence) = argmax(&probabilities);
        tracing::debug!(
            label = %self.labels[predicted_index],
            confidence,
            "Prediction"
        );
        Ok(Prediction {
            predicted_label: self.labels[predicted_index].clone(),
            predicted_index,
            confidence,
            probabilities: self.labels.iter().cloned().zip(probabilities).collect(),
        })
    }
}

pub fn softmax(logits: &[f32]) -> Result<Vec<f32>, PredictionError> {
    if logits.iter().any(|logit| !logit.is_finite()) {
        return Err(PredictionError::NonFiniteLogits);
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&logit| (logit - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

/// First index wins ties.
fn argmax(values: &[f32]) -> (usize, f32) {
    values.iter().copied().enumerate().fold((0, f32::NEG_INFINITY), |best, (index, value)| {
        if value > best.1 {
            (index, value)
        } else {
            best
        }
    })
}
