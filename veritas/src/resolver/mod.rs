mod error;
mod rebuild;
mod reference;

use std::collections::HashMap;

pub use error::ResolveError;
pub use rebuild::rebuild_tensors;
pub use reference::{STORAGE_TAG, StorageReference};

use crate::{
    ConversionConfig, DataType, ParameterMap, Tensor,
    pickle::{self, PersistentLoad, Value},
    storage::{BlobIndex, TypedStorage},
};

/// Turns storage persistent ids into typed storages backed by `blobs`.
pub struct ReferenceResolver<'a> {
    blobs: &'a BlobIndex,
    config: &'a ConversionConfig,
    resolved: HashMap<(u64, DataType), TypedStorage>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        blobs: &'a BlobIndex,
        config: &'a ConversionConfig,
    ) -> Self {
        Self {
            blobs,
            config,
            resolved: HashMap::new(),
        }
    }

    fn element_type(
        &self,
        reference: &StorageReference,
    ) -> Result<DataType, ResolveError> {
        if let Some(data_type) = DataType::from_storage_descriptor(&reference.element_type) {
            return Ok(data_type);
        }
        if self.config.is_lenient() {
            tracing::warn!(
                storage = reference.index,
                descriptor = %reference.element_type,
                "Unknown storage element type, reading it as f32"
            );
            return Ok(DataType::F32);
        }
        Err(ResolveError::UnknownElementType {
            descriptor: reference.element_type.clone(),
        })
    }

    pub fn resolve(
        &mut self,
        reference: &StorageReference,
    ) -> Result<TypedStorage, ResolveError> {
        let blob = self.blobs.get(reference.index)?;
        let data_type = self.element_type(reference)?;
        if let Some(storage) = self.resolved.get(&(reference.index, data_type)) {
            return Ok(storage.clone());
        }

        if !reference.is_host() {
            tracing::warn!(
                storage = reference.index,
                device = %reference.device,
                "Storage was saved on a non-host device, materializing on host"
            );
        }
        let storage = TypedStorage::new(reference.index, data_type, blob.clone())?;
        if let Some(numel) = reference.numel.filter(|&n| n != storage.num_elements() as u64) {
            tracing::warn!(
                storage = reference.index,
                declared = numel,
                actual = storage.num_elements(),
                "Storage element count differs from its reference"
            );
        }
        tracing::debug!(
            storage = reference.index,
            data_type = %data_type,
            elements = storage.num_elements(),
            "Resolved storage"
        );
        self.resolved.insert((reference.index, data_type), storage.clone());
        Ok(storage)
    }
}

impl PersistentLoad for ReferenceResolver<'_> {
    type Error = ResolveError;

    fn persistent_load(
        &mut self,
        pid: Value,
    ) -> Result<Value, Self::Error> {
        let reference = StorageReference::parse(&pid, self.config.accept_device_first_layout)?;
        let storage = self.resolve(&reference)?;
        Ok(Value::Storage(storage))
    }
}

/// Decodes a `data.pkl` stream against `blobs` into a flat parameter map.
///
/// Any failure aborts the whole run; no partial map is returned.
pub fn resolve_parameters(
    pickle: &[u8],
    blobs: &BlobIndex,
    config: &ConversionConfig,
) -> Result<ParameterMap, ResolveError> {
    let mut resolver = ReferenceResolver::new(blobs, config);
    let value = pickle::load(pickle, &mut resolver)?;
    let value = rebuild_tensors(value)?;
    let value = unwrap_wrapper(value, config);
    let parameters = into_parameter_map(value)?;
    tracing::info!(
        parameters = parameters.len(),
        storages = resolver.resolved.len(),
        "Resolved parameter map"
    );
    Ok(parameters)
}

/// Strips exactly one `{wrapper: {...}}` level.
fn unwrap_wrapper(
    value: Value,
    config: &ConversionConfig,
) -> Value {
    let inner = match &value {
        Value::Dict(items) => match items.borrow().as_slice() {
            [(Value::String(key), inner @ Value::Dict(_))] if config.is_wrapper_key(key) => {
                tracing::debug!(wrapper = %key, "Unwrapping parameter map");
                Some(inner.clone())
            },
            _ => None,
        },
        _ => None,
    };
    inner.unwrap_or(value)
}

fn into_parameter_map(value: Value) -> Result<ParameterMap, ResolveError> {
    let items = match value {
        Value::Dict(items) => items,
        other => {
            return Err(ResolveError::NotAParameterMap(format!(
                "top-level object is a {}",
                other.type_name()
            )));
        },
    };
    let items = items.borrow();
    let mut parameters = ParameterMap::with_capacity(items.len());
    for (key, value) in items.iter() {
        let Value::String(name) = key else {
            return Err(ResolveError::NotAParameterMap(format!(
                "key of type {} is not a parameter name",
                key.type_name()
            )));
        };
        let Value::Tensor(tensor) = value else {
            return Err(ResolveError::NotAParameterMap(format!(
                "{name} is a {}, not a tensor",
                value.type_name()
            )));
        };
        parameters.insert(name.clone(), Tensor::clone(tensor));
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{config::ElementTypePolicy, pickle::PickleWriter};

    fn blobs_with(
        index: u64,
        bytes: Vec<u8>,
    ) -> BlobIndex {
        let mut blobs = BlobIndex::new();
        blobs.insert(index, bytes);
        blobs
    }

    /// `{name: _rebuild_tensor_v2(storage(type, key, device, numel), 0, (len,), (1,), False, OrderedDict())}`
    fn tensor_pickle(
        name: &str,
        class: &str,
        key: &str,
        device: &str,
        numel: i64,
        len: i64,
    ) -> Vec<u8> {
        let mut writer = PickleWriter::new();
        writer.proto(2).empty_dict().string(name);
        writer.global("torch._utils", "_rebuild_tensor_v2").mark();
        writer.mark().string("storage").global("torch", class).string(key).string(device).int(numel);
        writer.tuple().binpersid();
        writer.int(0).mark().int(len).tuple().mark().int(1).tuple().bool(false).ordered_dict().tuple().reduce();
        writer.setitem().stop();
        writer.into_bytes()
    }

    fn single_tensor_pickle(
        name: &str,
        class: &str,
        key: &str,
        len: i64,
    ) -> Vec<u8> {
        tensor_pickle(name, class, key, "cpu", len, len)
    }

    #[test]
    fn resolves_a_float_storage() {
        let values = [1.0f32, -2.5, 3.25, 0.0];
        let blobs = blobs_with(0, bytemuck::cast_slice(&values).to_vec());
        let pickle = single_tensor_pickle("fc.weight", "FloatStorage", "0", 4);
        let parameters = resolve_parameters(&pickle, &blobs, &ConversionConfig::default()).unwrap();
        let tensor = &parameters["fc.weight"];
        assert_eq!(tensor.data_type(), DataType::F32);
        assert_eq!(tensor.shape(), &[4]);
        assert_eq!(tensor.to_vec::<f32>().unwrap(), values.to_vec());
    }

    #[test]
    fn char_storage_is_unsigned() {
        let blobs = blobs_with(2, vec![0xff, 0x01]);
        let pickle = single_tensor_pickle("q", "CharStorage", "2", 2);
        let parameters = resolve_parameters(&pickle, &blobs, &ConversionConfig::default()).unwrap();
        assert_eq!(parameters["q"].data_type(), DataType::U8);
        assert_eq!(parameters["q"].to_vec::<u8>().unwrap(), vec![255, 1]);
    }

    #[test]
    fn unknown_element_type_depends_on_policy() {
        let blobs = blobs_with(0, vec![0u8; 8]);
        let pickle = single_tensor_pickle("x", "ExoticStorage", "0", 2);

        let strict = resolve_parameters(&pickle, &blobs, &ConversionConfig::default()).unwrap_err();
        assert!(matches!(
            strict,
            ResolveError::UnknownElementType { descriptor } if descriptor == "torch.ExoticStorage"
        ));

        let lenient = ConversionConfig {
            element_types: ElementTypePolicy::Lenient,
            ..ConversionConfig::default()
        };
        let parameters = resolve_parameters(&pickle, &blobs, &lenient).unwrap();
        assert_eq!(parameters["x"].data_type(), DataType::F32);
        assert_eq!(parameters["x"].num_elements(), 2);
    }

    #[test]
    fn missing_and_ragged_storages_fail() {
        let pickle = single_tensor_pickle("x", "FloatStorage", "99", 1);
        let missing = resolve_parameters(&pickle, &blobs_with(0, vec![0u8; 4]), &ConversionConfig::default())
            .unwrap_err();
        assert!(matches!(missing, ResolveError::MissingStorage(error) if error.index == 99));

        let pickle = single_tensor_pickle("x", "IntStorage", "0", 2);
        let ragged = resolve_parameters(&pickle, &blobs_with(0, vec![0u8; 6]), &ConversionConfig::default())
            .unwrap_err();
        assert!(matches!(ragged, ResolveError::MalformedStorage(_)));
    }

    #[test]
    fn device_storages_materialize_on_the_host() {
        let values = [0.25f32, -4.0];
        let bytes: Vec<u8> = bytemuck::cast_slice(&values).to_vec();
        let blobs = blobs_with(0, bytes.clone());
        let pickle = tensor_pickle("w", "FloatStorage", "0", "cuda:0", 2, 2);
        let parameters = resolve_parameters(&pickle, &blobs, &ConversionConfig::default()).unwrap();
        assert_eq!(parameters["w"].as_bytes(), bytes.as_slice());
        assert_eq!(parameters["w"].to_vec::<f32>().unwrap(), values.to_vec());
    }

    #[test]
    fn declared_numel_does_not_override_the_blob() {
        let blobs = blobs_with(0, bytemuck::cast_slice(&[1i64, 2, 3]).to_vec());
        let config = ConversionConfig::default();
        let mut resolver = ReferenceResolver::new(&blobs, &config);
        let reference = StorageReference {
            tag: STORAGE_TAG.to_string(),
            element_type: "torch.LongStorage".to_string(),
            index: 0,
            device: "cpu".to_string(),
            numel: Some(8),
        };
        let storage = resolver.resolve(&reference).unwrap();
        assert_eq!(storage.num_elements(), 3);

        let pickle = tensor_pickle("steps", "LongStorage", "0", "cpu", 8, 3);
        let parameters = resolve_parameters(&pickle, &blobs, &config).unwrap();
        assert_eq!(parameters["steps"].to_vec::<i64>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unwraps_one_configured_level() {
        let inner = Value::new_dict();
        let outer = Value::new_dict();
        if let Value::Dict(items) = &outer {
            items.borrow_mut().push((Value::String("model".into()), inner.clone()));
        }
        let unwrapped = unwrap_wrapper(outer.clone(), &ConversionConfig::default());
        let (Value::Dict(a), Value::Dict(b)) = (&unwrapped, &inner) else {
            unreachable!()
        };
        assert!(Rc::ptr_eq(a, b));

        let other_key = ConversionConfig {
            wrapper_keys: vec!["state_dict".into()],
            ..ConversionConfig::default()
        };
        let kept = unwrap_wrapper(outer.clone(), &other_key);
        let (Value::Dict(a), Value::Dict(b)) = (&kept, &outer) else {
            unreachable!()
        };
        assert!(Rc::ptr_eq(a, b));
    }

    #[test]
    fn non_tensor_values_are_rejected() {
        let mut writer = PickleWriter::new();
        writer.proto(2).empty_dict().string("epoch").int(3).setitem().stop();
        let error = resolve_parameters(writer.as_bytes(), &BlobIndex::new(), &ConversionConfig::default())
            .unwrap_err();
        assert!(matches!(error, ResolveError::NotAParameterMap(_)));
    }
}
