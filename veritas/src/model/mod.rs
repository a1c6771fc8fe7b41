mod predictor;
mod schema;
mod skeleton;

pub use predictor::{INPUT_SIZE, InferenceBackend, LABELS, Prediction, PredictionError, Predictor, softmax};
pub use schema::{ParameterSchema, ParameterSpec, SchemaError};
pub use skeleton::{
    DataTypeMismatch, LoadedModel, SchemaMismatchError, SchemaSkeleton, ShapeMismatch, SkeletonError, build_skeleton,
    load_parameters, validate_parameters,
};
