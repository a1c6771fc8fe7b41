use std::{fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DataType, ParameterMap, Tensor};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ParameterSpec {
    pub shape: Vec<usize>,
    pub data_type: DataType,
}

impl From<&Tensor> for ParameterSpec {
    fn from(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            data_type: tensor.data_type(),
        }
    }
}

/// Names, shapes and element types a model expects, in declaration order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(transparent)]
pub struct ParameterSchema {
    parameters: IndexMap<String, ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters(parameters: &ParameterMap) -> Self {
        Self {
            parameters: parameters.iter().map(|(name, tensor)| (name.clone(), ParameterSpec::from(tensor))).collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), SchemaError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        spec: ParameterSpec,
    ) {
        self.parameters.insert(name.into(), spec);
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&ParameterSpec> {
        self.parameters.get(name)
    }

    pub fn get_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut ParameterSpec> {
        self.parameters.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterSpec)> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_from_parameters_in_order() {
        let mut parameters = ParameterMap::new();
        parameters.insert("b".into(), Tensor::from_slice(&[2], &[1.0f32, 2.0]).unwrap());
        parameters.insert("a".into(), Tensor::from_slice(&[], &[7i64]).unwrap());
        let schema = ParameterSchema::from_parameters(&parameters);
        let names: Vec<&String> = schema.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(schema.get("a").unwrap().data_type, DataType::I64);
    }

    #[test]
    fn json_layout_is_a_flat_object() {
        let mut schema = ParameterSchema::new();
        schema.insert(
            "classifier.1.bias",
            ParameterSpec {
                shape: vec![2],
                data_type: DataType::F32,
            },
        );
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"{"classifier.1.bias":{"shape":[2],"data_type":"f32"}}"#);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        schema.save(&path).unwrap();
        assert_eq!(ParameterSchema::from_file(&path).unwrap(), schema);
    }
}
