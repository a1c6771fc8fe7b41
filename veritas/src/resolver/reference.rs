use crate::pickle::Value;

use super::ResolveError;

pub const STORAGE_TAG: &str = "storage";

/// A validated persistent id pointing at one storage blob.
///
/// Canonical layout is `(tag, element_type, index, device[, numel])`. The
/// index may be an int or a decimal string; torch writes a string key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageReference {
    pub tag: String,
    /// Storage class descriptor, e.g. `torch.FloatStorage`.
    pub element_type: String,
    pub index: u64,
    pub device: String,
    pub numel: Option<u64>,
}

fn malformed(reason: impl Into<String>) -> ResolveError {
    ResolveError::MalformedReference(reason.into())
}

fn parse_index(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok(),
        _ => None,
    }
}

fn parse_element_type(value: &Value) -> Result<String, ResolveError> {
    match value {
        Value::Global(global) => Ok(global.to_string()),
        Value::String(s) => Ok(s.clone()),
        other => Err(malformed(format!(
            "element type must be a storage class, found {}",
            other.type_name()
        ))),
    }
}

impl StorageReference {
    pub fn parse(
        pid: &Value,
        accept_device_first_layout: bool,
    ) -> Result<Self, ResolveError> {
        let Value::Tuple(items) = pid else {
            return Err(malformed(format!("expected a tuple, found {}", pid.type_name())));
        };
        if !(4..=5).contains(&items.len()) {
            return Err(malformed(format!("expected 4 or 5 fields, found {}", items.len())));
        }

        let tag = items[0]
            .as_str()
            .ok_or_else(|| malformed(format!("tag must be a string, found {}", items[0].type_name())))?;
        if tag != STORAGE_TAG {
            return Err(malformed(format!("unexpected tag {tag:?}")));
        }
        let element_type = parse_element_type(&items[1])?;

        let (index, device) = match (parse_index(&items[2]), &items[3]) {
            (Some(index), Value::String(device)) => (index, device.clone()),
            (Some(_), other) => {
                return Err(malformed(format!(
                    "device must be a string, found {}",
                    other.type_name()
                )));
            },
            (None, _) => {
                let device_first = match (&items[2], parse_index(&items[3])) {
                    (Value::String(device), Some(index)) => Some((index, device.clone())),
                    _ => None,
                };
                match device_first {
                    Some(parsed) if accept_device_first_layout => parsed,
                    Some(_) => {
                        return Err(malformed(
                            "device precedes index; enable accept_device_first_layout to read this layout",
                        ));
                    },
                    None => {
                        return Err(malformed(format!(
                            "storage index {:?} is not a non-negative integer",
                            items[2]
                        )));
                    },
                }
            },
        };

        let numel = match items.get(4) {
            None => None,
            Some(value) => Some(
                value
                    .as_int()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| malformed(format!("element count {value:?} is not a non-negative integer")))?,
            ),
        };

        Ok(Self {
            tag: tag.to_string(),
            element_type,
            index,
            device,
            numel,
        })
    }

    pub fn is_host(&self) -> bool {
        self.device == "cpu" || self.device.starts_with("cpu:")
    }
}
