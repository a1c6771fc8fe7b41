use thiserror::Error;

use crate::{
    pickle::PickleError,
    storage::{MalformedStorageError, MissingStorageError},
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to decode metadata stream: {0}")]
    Pickle(#[from] PickleError),
    #[error(transparent)]
    MissingStorage(#[from] MissingStorageError),
    #[error("Malformed storage reference: {0}")]
    MalformedReference(String),
    #[error("Unknown storage element type {descriptor:?}")]
    UnknownElementType {
        descriptor: String,
    },
    #[error(transparent)]
    MalformedStorage(#[from] MalformedStorageError),
    #[error(
        "Tensor view of storage {storage} (offset {offset}, shape {shape:?}, stride {stride:?}) exceeds its {storage_elements} elements"
    )]
    TensorOutOfBounds {
        storage: u64,
        offset: usize,
        shape: Vec<usize>,
        stride: Vec<usize>,
        storage_elements: usize,
    },
    #[error("Malformed tensor: {0}")]
    MalformedTensor(String),
    #[error("Not a parameter map: {0}")]
    NotAParameterMap(String),
}
