mod common;

use std::fs;

use common::{ReferenceLayout, TensorEntry, f32_bytes, ramp, state_dict_pickle, write_saved_module};
use half::f16;
use veritas::{
    CheckpointError, ConversionConfig, DataType, ElementTypePolicy, ResolveError, SavedModule,
    load_parameters_from_path,
};

fn load(dir: &std::path::Path) -> Result<veritas::ParameterMap, CheckpointError> {
    SavedModule::open(dir)?.load_parameters(&ConversionConfig::default())
}

#[test]
fn test_float_storage_with_integer_index() {
    let dir = tempfile::tempdir().unwrap();
    let values = [0.5f32, -1.0, 2.25, 1e-3];
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("fc.weight", "FloatStorage", 0, &[4])],
        None,
        ReferenceLayout::IntegerIndex,
    );
    let bytes = f32_bytes(&values);
    assert_eq!(bytes.len(), 16);
    write_saved_module(dir.path(), &pickle, &[(0, bytes)]);

    let parameters = load(dir.path()).unwrap();
    let tensor = &parameters["fc.weight"];
    assert_eq!(tensor.data_type(), DataType::F32);
    assert_eq!(tensor.shape(), &[4]);
    assert_eq!(tensor.to_vec::<f32>().unwrap(), values.to_vec());
}

#[test]
fn test_wrapped_state_dict_is_unwrapped_once() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<TensorEntry> = (0..42)
        .map(|i| TensorEntry::contiguous(&format!("features.{i}.weight"), "FloatStorage", i, &[2, 3]))
        .collect();
    let blobs: Vec<(u64, Vec<u8>)> = (0..42).map(|i| (i, f32_bytes(&ramp(6)))).collect();
    let pickle = state_dict_pickle(&entries, Some("model"), ReferenceLayout::Torch);
    write_saved_module(dir.path(), &pickle, &blobs);

    let parameters = load(dir.path()).unwrap();
    assert_eq!(parameters.len(), 42);
    let names: Vec<&str> = parameters.keys().map(String::as_str).collect();
    assert_eq!(names[0], "features.0.weight");
    assert_eq!(names[41], "features.41.weight");
    assert!(parameters.values().all(|tensor| tensor.shape() == [2, 3]));
}

#[test]
fn test_unrecognized_wrapper_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("w", "FloatStorage", 0, &[1])],
        Some("state_dict"),
        ReferenceLayout::Torch,
    );
    write_saved_module(dir.path(), &pickle, &[(0, f32_bytes(&[1.0]))]);

    let error = load(dir.path()).unwrap_err();
    assert!(matches!(error, CheckpointError::Resolve(ResolveError::NotAParameterMap(_))));

    let config = ConversionConfig {
        wrapper_keys: vec!["state_dict".to_string()],
        ..ConversionConfig::default()
    };
    let parameters = SavedModule::open(dir.path()).unwrap().load_parameters(&config).unwrap();
    assert_eq!(parameters.len(), 1);
}

#[test]
fn test_mixed_element_types() {
    let dir = tempfile::tempdir().unwrap();
    let halves = [f16::from_f32(1.5), f16::from_f32(-0.25)];
    let longs = [7i64, -9];
    let entries = [
        TensorEntry::contiguous("bn.weight", "HalfStorage", 0, &[2]),
        TensorEntry::contiguous("bn.num_batches_tracked", "LongStorage", 1, &[2]),
        TensorEntry::contiguous("mask", "BoolStorage", 2, &[3]),
        TensorEntry::contiguous("pixels", "ByteStorage", 3, &[2]),
    ];
    let pickle = state_dict_pickle(&entries, None, ReferenceLayout::Torch);
    write_saved_module(
        dir.path(),
        &pickle,
        &[
            (0, bytemuck::cast_slice(&halves).to_vec()),
            (1, bytemuck::cast_slice(&longs).to_vec()),
            (2, vec![1, 0, 1]),
            (3, vec![200, 3]),
        ],
    );

    let parameters = load(dir.path()).unwrap();
    assert_eq!(parameters["bn.weight"].to_vec::<f16>().unwrap(), halves.to_vec());
    assert_eq!(parameters["bn.num_batches_tracked"].to_vec::<i64>().unwrap(), longs.to_vec());
    assert_eq!(parameters["mask"].to_bools().unwrap(), vec![true, false, true]);
    assert_eq!(parameters["pixels"].to_vec::<u8>().unwrap(), vec![200, 3]);
}

#[test]
fn test_shared_storage_views() {
    let dir = tempfile::tempdir().unwrap();
    let weight = TensorEntry::contiguous("qkv.weight", "FloatStorage", 0, &[2, 2]);
    let transposed = TensorEntry {
        name: "qkv.weight_t".to_string(),
        stride: vec![1, 2],
        ..weight.clone()
    };
    let tail = TensorEntry {
        name: "qkv.bias".to_string(),
        offset: 4,
        shape: vec![2],
        stride: vec![1],
        ..weight.clone()
    };
    let pickle = state_dict_pickle(&[weight, transposed, tail], None, ReferenceLayout::IntegerIndex);
    write_saved_module(dir.path(), &pickle, &[(0, f32_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))]);

    let parameters = load(dir.path()).unwrap();
    assert_eq!(parameters["qkv.weight"].to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(parameters["qkv.weight_t"].to_vec::<f32>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    assert_eq!(parameters["qkv.bias"].to_vec::<f32>().unwrap(), vec![5.0, 6.0]);
}

#[test]
fn test_missing_storage_reports_index() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("w", "FloatStorage", 99, &[1])],
        None,
        ReferenceLayout::IntegerIndex,
    );
    write_saved_module(dir.path(), &pickle, &[(0, f32_bytes(&[1.0])), (1, f32_bytes(&[2.0]))]);

    let error = load(dir.path()).unwrap_err();
    let missing = match error {
        CheckpointError::Resolve(ResolveError::MissingStorage(missing)) => missing,
        other => panic!("expected a missing storage error, got {other}"),
    };
    assert_eq!(missing.index, 99);
    assert_eq!(missing.available, vec![0, 1]);
}

#[test]
fn test_unknown_element_type_policy() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("w", "ExoticStorage", 0, &[2])],
        None,
        ReferenceLayout::IntegerIndex,
    );
    write_saved_module(dir.path(), &pickle, &[(0, f32_bytes(&[1.0, 2.0]))]);

    let error = load(dir.path()).unwrap_err();
    assert!(matches!(
        error,
        CheckpointError::Resolve(ResolveError::UnknownElementType { ref descriptor }) if descriptor == "ExoticStorage"
    ));

    let lenient = ConversionConfig {
        element_types: ElementTypePolicy::Lenient,
        ..ConversionConfig::default()
    };
    let parameters = SavedModule::open(dir.path()).unwrap().load_parameters(&lenient).unwrap();
    assert_eq!(parameters["w"].to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_ragged_storage_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("w", "DoubleStorage", 0, &[1])],
        None,
        ReferenceLayout::IntegerIndex,
    );
    write_saved_module(dir.path(), &pickle, &[(0, vec![0u8; 12])]);

    let error = load(dir.path()).unwrap_err();
    assert!(matches!(error, CheckpointError::Resolve(ResolveError::MalformedStorage(_))));
}

#[test]
fn test_device_first_layout_is_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("w", "IntStorage", 5, &[2])],
        None,
        ReferenceLayout::DeviceFirst,
    );
    write_saved_module(dir.path(), &pickle, &[(5, bytemuck::cast_slice(&[3i32, -4]).to_vec())]);

    let error = load(dir.path()).unwrap_err();
    assert!(matches!(error, CheckpointError::Resolve(ResolveError::MalformedReference(_))));

    let config = ConversionConfig {
        accept_device_first_layout: true,
        ..ConversionConfig::default()
    };
    let parameters = SavedModule::open(dir.path()).unwrap().load_parameters(&config).unwrap();
    assert_eq!(parameters["w"].to_vec::<i32>().unwrap(), vec![3, -4]);
}

#[test]
fn test_stray_files_in_blob_directory_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = state_dict_pickle(
        &[TensorEntry::contiguous("w", "FloatStorage", 0, &[1])],
        None,
        ReferenceLayout::Torch,
    );
    write_saved_module(dir.path(), &pickle, &[(0, f32_bytes(&[4.0]))]);
    fs::write(dir.path().join("data").join(".DS_Store"), b"junk").unwrap();
    fs::write(dir.path().join("data").join("0.bak"), b"junk").unwrap();

    let parameters = load_parameters_from_path(dir.path(), &ConversionConfig::default()).unwrap();
    assert_eq!(parameters["w"].to_vec::<f32>().unwrap(), vec![4.0]);
}

#[test]
fn test_directory_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("data")).unwrap();
    let error = SavedModule::open(dir.path()).unwrap_err();
    assert!(matches!(error, CheckpointError::MissingMetadata { .. }));
}
