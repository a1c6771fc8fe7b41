mod blob_index;
mod typed_storage;

pub use blob_index::{BlobIndex, MISSING_STORAGE_SAMPLE, MissingStorageError};
pub use typed_storage::{MalformedStorageError, TypedStorage};
