pub mod checkpoint;
pub mod config;
mod data_type;
pub mod model;
pub mod parameters;
pub mod pickle;
pub mod resolver;
pub mod storage;
pub mod tensor;

pub use checkpoint::{
    CheckpointError, SavedModule, convert_saved_module, load_parameters_from_path, read_checkpoint, verify_checkpoint,
    write_checkpoint,
};
pub use config::{ConfigError, ConversionConfig, ElementTypePolicy};
pub use data_type::{ArrayElement, DataType};
pub use parameters::ParameterMap;
pub use resolver::{ResolveError, resolve_parameters};
pub use storage::{BlobIndex, MissingStorageError};
pub use tensor::Tensor;
