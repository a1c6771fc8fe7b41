#![allow(dead_code)]

use std::{fs, path::Path};

use veritas::{pickle::PickleWriter, tensor::contiguous_stride};

/// How a fixture spells its storage persistent ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceLayout {
    /// `('storage', torch.<Class>, '<key>', 'cpu', numel)`, as `torch.save` writes.
    Torch,
    /// `('storage', '<Class>', <key>, 'cpu')`
    IntegerIndex,
    /// `('storage', '<Class>', 'cpu', '<key>')`
    DeviceFirst,
}

#[derive(Debug, Clone)]
pub struct TensorEntry {
    pub name: String,
    pub storage_class: String,
    pub key: u64,
    pub offset: usize,
    pub shape: Vec<usize>,
    pub stride: Vec<usize>,
}

impl TensorEntry {
    pub fn contiguous(
        name: &str,
        storage_class: &str,
        key: u64,
        shape: &[usize],
    ) -> Self {
        Self {
            name: name.to_string(),
            storage_class: storage_class.to_string(),
            key,
            offset: 0,
            shape: shape.to_vec(),
            stride: contiguous_stride(shape).to_vec(),
        }
    }
}

fn write_reference(
    writer: &mut PickleWriter,
    entry: &TensorEntry,
    layout: ReferenceLayout,
) {
    writer.mark().string("storage");
    match layout {
        ReferenceLayout::Torch => {
            let numel = entry.offset + entry.shape.iter().product::<usize>();
            writer
                .global("torch", &entry.storage_class)
                .string(&entry.key.to_string())
                .string("cpu")
                .int(numel as i64);
        },
        ReferenceLayout::IntegerIndex => {
            writer.string(&entry.storage_class).int(entry.key as i64).string("cpu");
        },
        ReferenceLayout::DeviceFirst => {
            writer.string(&entry.storage_class).string("cpu").string(&entry.key.to_string());
        },
    }
    writer.tuple().binpersid();
}

fn write_dims(
    writer: &mut PickleWriter,
    dims: &[usize],
) {
    writer.mark();
    for &dim in dims {
        writer.int(dim as i64);
    }
    writer.tuple();
}

/// A pickled state dict, optionally nested as `{wrapper: state_dict}`.
pub fn state_dict_pickle(
    entries: &[TensorEntry],
    wrapper: Option<&str>,
    layout: ReferenceLayout,
) -> Vec<u8> {
    let mut writer = PickleWriter::new();
    writer.proto(2);
    if let Some(wrapper) = wrapper {
        writer.empty_dict().string(wrapper);
    }
    writer.ordered_dict().mark();
    for entry in entries {
        writer.string(&entry.name);
        writer.global("torch._utils", "_rebuild_tensor_v2").mark();
        write_reference(&mut writer, entry, layout);
        writer.int(entry.offset as i64);
        write_dims(&mut writer, &entry.shape);
        write_dims(&mut writer, &entry.stride);
        writer.bool(false).ordered_dict().tuple().reduce();
    }
    writer.setitems();
    if wrapper.is_some() {
        writer.setitem();
    }
    writer.stop();
    writer.into_bytes()
}

/// Lays out `dir/data.pkl` and `dir/data/<index>` files.
pub fn write_saved_module(
    dir: &Path,
    pickle: &[u8],
    blobs: &[(u64, Vec<u8>)],
) {
    fs::create_dir_all(dir.join("data")).unwrap();
    fs::write(dir.join("data.pkl"), pickle).unwrap();
    for (index, bytes) in blobs {
        fs::write(dir.join("data").join(index.to_string()), bytes).unwrap();
    }
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

pub fn ramp(count: usize) -> Vec<f32> {
    (0..count).map(|i| i as f32 * 0.25 - 1.0).collect()
}
