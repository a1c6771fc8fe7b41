use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use zip::ZipArchive;

use super::{CheckpointError, SavedModule, host_byte_order};
use crate::{ConversionConfig, ParameterMap, resolver::resolve_parameters, storage::BlobIndex};

/// Archive directory holding `data.pkl`, e.g. `archive/`.
fn archive_prefix<R: Read + Seek>(archive: &ZipArchive<R>) -> Option<String> {
    archive
        .file_names()
        .filter_map(|name| name.strip_suffix("data.pkl"))
        .filter(|prefix| prefix.is_empty() || prefix.ends_with('/'))
        .min_by_key(|prefix| prefix.len())
        .map(str::to_string)
}

fn read_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, CheckpointError> {
    let mut file = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

pub fn read_checkpoint_from_archive<R: Read + Seek>(
    mut archive: ZipArchive<R>,
    path: &Path,
    config: &ConversionConfig,
) -> Result<ParameterMap, CheckpointError> {
    let Some(prefix) = archive_prefix(&archive) else {
        return Err(CheckpointError::MissingMetadata {
            path: path.to_path_buf(),
        });
    };

    // Archives without a byteorder member predate it and are little-endian.
    let byte_order = match read_member(&mut archive, &format!("{prefix}byteorder")) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(CheckpointError::Zip(zip::result::ZipError::FileNotFound)) => "little".to_string(),
        Err(error) => return Err(error),
    };
    if byte_order != host_byte_order() {
        return Err(CheckpointError::ByteOrder {
            found: byte_order,
            expected: host_byte_order(),
        });
    }

    let pickle = read_member(&mut archive, &format!("{prefix}data.pkl"))?;
    let blobs = BlobIndex::from_archive(&mut archive, &prefix)?;
    tracing::info!(
        path = %path.display(),
        blobs = blobs.len(),
        bytes = blobs.total_bytes(),
        "Loading checkpoint"
    );
    Ok(resolve_parameters(&pickle, &blobs, config)?)
}

pub fn read_checkpoint(
    path: &Path,
    config: &ConversionConfig,
) -> Result<ParameterMap, CheckpointError> {
    let file = File::open(path)?;
    let archive = ZipArchive::new(BufReader::new(file))?;
    read_checkpoint_from_archive(archive, path, config)
}

/// Reads `path` back and checks that it holds exactly `expected` under
/// `wrapper_key`, in the same order and with the same bytes.
pub fn verify_checkpoint(
    path: &Path,
    expected: &ParameterMap,
    wrapper_key: &str,
    config: &ConversionConfig,
) -> Result<(), CheckpointError> {
    let config = ConversionConfig {
        wrapper_keys: vec![wrapper_key.to_string()],
        ..config.clone()
    };
    let reloaded = read_checkpoint(path, &config)?;
    if let Some(reason) = first_difference(expected, &reloaded) {
        return Err(CheckpointError::Verification {
            path: path.to_path_buf(),
            reason,
        });
    }
    tracing::info!(
        path = %path.display(),
        parameters = reloaded.len(),
        wrapper = wrapper_key,
        "Verified checkpoint"
    );
    Ok(())
}

fn first_difference(
    expected: &ParameterMap,
    found: &ParameterMap,
) -> Option<String> {
    if expected.len() != found.len() {
        return Some(format!("expected {} parameters, found {}", expected.len(), found.len()));
    }
    for ((name, tensor), (found_name, found_tensor)) in expected.iter().zip(found) {
        if name != found_name {
            return Some(format!("expected parameter {name}, found {found_name}"));
        }
        if tensor != found_tensor {
            return Some(format!("{name} differs: expected {tensor:?}, found {found_tensor:?}"));
        }
    }
    None
}

/// Loads a saved-module directory or a checkpoint file, whichever `path` is.
pub fn load_parameters_from_path(
    path: &Path,
    config: &ConversionConfig,
) -> Result<ParameterMap, CheckpointError> {
    if path.is_dir() {
        SavedModule::open(path)?.load_parameters(config)
    } else {
        read_checkpoint(path, config)
    }
}
