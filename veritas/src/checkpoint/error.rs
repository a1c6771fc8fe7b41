use std::path::PathBuf;

use thiserror::Error;

use crate::resolver::ResolveError;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{path} has no data.pkl metadata stream")]
    MissingMetadata {
        path: PathBuf,
    },
    #[error("Checkpoint byte order is {found:?}, this host is {expected:?}")]
    ByteOrder {
        found: String,
        expected: &'static str,
    },
    #[error("{path} does not read back as written: {reason}")]
    Verification {
        path: PathBuf,
        reason: String,
    },
    #[error("Invalid output path {path}")]
    InvalidOutputPath {
        path: PathBuf,
    },
}
