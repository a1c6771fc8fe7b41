mod error;
mod reader;
mod saved_module;
mod writer;

use std::path::Path;

pub use error::CheckpointError;
pub use reader::{load_parameters_from_path, read_checkpoint, read_checkpoint_from_archive, verify_checkpoint};
pub use saved_module::{BLOB_DIR, METADATA_FILE, SavedModule};
pub use writer::{encode_parameter_pickle, write_checkpoint};

use crate::{ConversionConfig, ParameterMap};

pub const ARCHIVE_PREFIX: &str = "archive";
pub const FORMAT_VERSION: &str = "3\n";

pub fn host_byte_order() -> &'static str {
    if cfg!(target_endian = "little") {
        "little"
    } else {
        "big"
    }
}

/// Resolves a saved module and writes it out as a single checkpoint.
pub fn convert_saved_module(
    saved_module: &Path,
    output: &Path,
    config: &ConversionConfig,
) -> Result<ParameterMap, CheckpointError> {
    let parameters = SavedModule::open(saved_module)?.load_parameters(config)?;
    write_checkpoint(output, &parameters, &config.output_wrapper_key)?;
    Ok(parameters)
}
