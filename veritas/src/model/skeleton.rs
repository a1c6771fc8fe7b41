use std::{fmt, sync::Arc};

use thiserror::Error;

use super::{ParameterSchema, ParameterSpec};
use crate::{DataType, ParameterMap, Tensor};

#[derive(Debug, Error)]
pub enum SkeletonError {
    #[error("Classifier head {head:?} has no weight or bias in the schema")]
    MissingHead {
        head: String,
    },
    #[error("Classifier head parameter {name} has no leading dimension")]
    ScalarHead {
        name: String,
    },
    #[error("A classifier needs at least one class")]
    NoClasses,
}

/// A model structure awaiting parameters.
#[derive(Debug, Clone)]
pub struct SchemaSkeleton {
    schema: ParameterSchema,
    num_classes: usize,
}

impl SchemaSkeleton {
    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Builds a skeleton from `schema` with the `head` layer resized to
/// `num_classes` outputs.
pub fn build_skeleton(
    schema: &ParameterSchema,
    num_classes: usize,
    head: &str,
) -> Result<SchemaSkeleton, SkeletonError> {
    if num_classes == 0 {
        return Err(SkeletonError::NoClasses);
    }
    let mut schema = schema.clone();
    let mut resized = 0;
    for suffix in ["weight", "bias"] {
        let name = format!("{head}.{suffix}");
        let Some(spec) = schema.get_mut(&name) else {
            continue;
        };
        let Some(leading) = spec.shape.first_mut() else {
            return Err(SkeletonError::ScalarHead {
                name,
            });
        };
        *leading = num_classes;
        resized += 1;
    }
    if resized == 0 {
        return Err(SkeletonError::MissingHead {
            head: head.to_string(),
        });
    }
    tracing::debug!(head, num_classes, "Built model skeleton");
    Ok(SchemaSkeleton {
        schema,
        num_classes,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub name: String,
    pub expected: Vec<usize>,
    pub found: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypeMismatch {
    pub name: String,
    pub expected: DataType,
    pub found: DataType,
}

/// Every structural difference between a skeleton and a parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMismatchError {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub shape_mismatches: Vec<ShapeMismatch>,
    pub data_type_mismatches: Vec<DataTypeMismatch>,
}

impl SchemaMismatchError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.shape_mismatches.is_empty()
            && self.data_type_mismatches.is_empty()
    }
}

impl fmt::Display for SchemaMismatchError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Parameters do not match the model")?;
        if !self.missing.is_empty() {
            write!(f, "; missing: {}", self.missing.join(", "))?;
        }
        if !self.unexpected.is_empty() {
            write!(f, "; unexpected: {}", self.unexpected.join(", "))?;
        }
        for mismatch in &self.shape_mismatches {
            write!(f, "; {} has shape {:?}, expected {:?}", mismatch.name, mismatch.found, mismatch.expected)?;
        }
        for mismatch in &self.data_type_mismatches {
            write!(f, "; {} is {}, expected {}", mismatch.name, mismatch.found, mismatch.expected)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaMismatchError {}

/// Parameters that passed structural validation. Immutable and cheap to
/// share between threads.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    parameters: Arc<ParameterMap>,
    num_classes: usize,
}

impl LoadedModel {
    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    pub fn parameter(
        &self,
        name: &str,
    ) -> Option<&Tensor> {
        self.parameters.get(name)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Compares `parameters` with every entry of `skeleton`.
pub fn validate_parameters(
    skeleton: &SchemaSkeleton,
    parameters: &ParameterMap,
) -> Result<(), SchemaMismatchError> {
    let mut mismatch = SchemaMismatchError::default();
    for (name, spec) in skeleton.schema.iter() {
        let Some(tensor) = parameters.get(name) else {
            mismatch.missing.push(name.clone());
            continue;
        };
        let found = ParameterSpec::from(tensor);
        if found.shape != spec.shape {
            mismatch.shape_mismatches.push(ShapeMismatch {
                name: name.clone(),
                expected: spec.shape.clone(),
                found: found.shape,
            });
        }
        if found.data_type != spec.data_type {
            mismatch.data_type_mismatches.push(DataTypeMismatch {
                name: name.clone(),
                expected: spec.data_type,
                found: found.data_type,
            });
        }
    }
    mismatch.unexpected = parameters
        .keys()
        .filter(|name| skeleton.schema.get(name).is_none())
        .cloned()
        .collect();

    if mismatch.is_empty() {
        Ok(())
    } else {
        Err(mismatch)
    }
}

/// All-or-nothing: any difference rejects the whole map.
pub fn load_parameters(
    skeleton: &SchemaSkeleton,
    parameters: ParameterMap,
) -> Result<LoadedModel, SchemaMismatchError> {
    validate_parameters(skeleton, &parameters)?;
    tracing::info!(parameters = parameters.len(), num_classes = skeleton.num_classes, "Loaded model parameters");
    Ok(LoadedModel {
        parameters: Arc::new(parameters),
        num_classes: skeleton.num_classes,
    })
}
