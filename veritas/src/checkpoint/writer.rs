use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use super::{ARCHIVE_PREFIX, CheckpointError, FORMAT_VERSION, host_byte_order};
use crate::{ParameterMap, Tensor, pickle::PickleWriter};

const PICKLE_PROTOCOL: u8 = 2;
// Storage members are aligned so they can be memory-mapped.
const STORAGE_ALIGNMENT: u16 = 64;

/// Removes the file on drop unless the write was committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn partial_path(path: &Path) -> Result<PathBuf, CheckpointError> {
    let Some(file_name) = path.file_name() else {
        return Err(CheckpointError::InvalidOutputPath {
            path: path.to_path_buf(),
        });
    };
    let mut partial = file_name.to_os_string();
    partial.push(".partial");
    Ok(path.with_file_name(partial))
}

/// Encodes `{wrapper_key: OrderedDict(name -> tensor)}`, with storage `n`
/// holding the `n`-th parameter.
pub fn encode_parameter_pickle(
    parameters: &ParameterMap,
    wrapper_key: &str,
) -> Vec<u8> {
    let mut writer = PickleWriter::new();
    writer.proto(PICKLE_PROTOCOL).empty_dict().string(wrapper_key).ordered_dict().mark();
    for (key, (name, tensor)) in parameters.iter().enumerate() {
        writer.string(name);
        write_rebuild_call(&mut writer, &key.to_string(), tensor);
    }
    writer.setitems().setitem().stop();
    writer.into_bytes()
}

fn write_rebuild_call(
    writer: &mut PickleWriter,
    storage_key: &str,
    tensor: &Tensor,
) {
    writer.global("torch._utils", "_rebuild_tensor_v2").mark();

    writer
        .mark()
        .string("storage")
        .global("torch", tensor.data_type().storage_class_name())
        .string(storage_key)
        .string("cpu")
        .int(tensor.num_elements() as i64)
        .tuple()
        .binpersid();

    writer.int(0).mark();
    for &dim in tensor.shape() {
        writer.int(dim as i64);
    }
    writer.tuple().mark();
    for &step in crate::tensor::contiguous_stride(tensor.shape()).iter() {
        writer.int(step as i64);
    }
    writer.tuple().bool(false).ordered_dict();

    writer.tuple().reduce();
}

/// Writes `parameters` as one self-contained torch zip checkpoint.
///
/// The archive is assembled next to `path` and renamed into place, so a
/// failed write leaves no file at `path`.
pub fn write_checkpoint(
    path: &Path,
    parameters: &ParameterMap,
    wrapper_key: &str,
) -> Result<(), CheckpointError> {
    let mut partial = PartialFile {
        path: partial_path(path)?,
        committed: false,
    };
    let file = File::create(&partial.path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file(format!("{ARCHIVE_PREFIX}/data.pkl"), options)?;
    zip.write_all(&encode_parameter_pickle(parameters, wrapper_key))?;

    zip.start_file(format!("{ARCHIVE_PREFIX}/byteorder"), options)?;
    zip.write_all(host_byte_order().as_bytes())?;

    let storage_options = options.with_alignment(STORAGE_ALIGNMENT);
    for (key, tensor) in parameters.values().enumerate() {
        zip.start_file(format!("{ARCHIVE_PREFIX}/data/{key}"), storage_options)?;
        zip.write_all(tensor.as_bytes())?;
    }

    zip.start_file(format!("{ARCHIVE_PREFIX}/version"), options)?;
    zip.write_all(FORMAT_VERSION.as_bytes())?;

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);

    fs::rename(&partial.path, path)?;
    partial.committed = true;
    tracing::info!(
        path = %path.display(),
        parameters = parameters.len(),
        wrapper = wrapper_key,
        "Wrote checkpoint"
    );
    Ok(())
}
