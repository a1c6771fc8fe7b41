use std::fmt;

use bytemuck::Pod;
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Element types a torch storage can carry.
#[derive(
    Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone,
)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    // Floating point
    BF16,
    F16,
    F32,
    F64,
    // Integers
    U8,
    I16,
    I32,
    I64,
    // One byte per element, zero is false
    Bool,
}

impl DataType {
    pub fn size_in_bits(&self) -> usize {
        match self {
            DataType::BF16 => 16,
            DataType::F16 => 16,
            DataType::F32 => 32,
            DataType::F64 => 64,
            DataType::U8 => 8,
            DataType::I16 => 16,
            DataType::I32 => 32,
            DataType::I64 => 64,
            DataType::Bool => 8,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bits().div_ceil(8)
    }

    /// Parses a storage class descriptor such as `FloatStorage`,
    /// `torch.LongStorage` or `<class 'torch.HalfStorage'>`.
    pub fn from_storage_descriptor(descriptor: &str) -> Option<Self> {
        let trimmed = descriptor
            .trim()
            .trim_start_matches("<class '")
            .trim_end_matches("'>");
        let class_name = trimmed.rsplit('.').next().unwrap_or(trimmed);
        let stem = class_name.strip_suffix("Storage")?;
        match stem {
            "Float" => Some(DataType::F32),
            "Double" => Some(DataType::F64),
            "Half" => Some(DataType::F16),
            "BFloat16" => Some(DataType::BF16),
            "Int" => Some(DataType::I32),
            "Long" => Some(DataType::I64),
            "Short" => Some(DataType::I16),
            // Both decode as torch.uint8.
            "Byte" | "Char" => Some(DataType::U8),
            "Bool" => Some(DataType::Bool),
            _ => None,
        }
    }

    /// Class name written into checkpoints for storages of this type.
    pub fn storage_class_name(&self) -> &'static str {
        match self {
            DataType::BF16 => "BFloat16Storage",
            DataType::F16 => "HalfStorage",
            DataType::F32 => "FloatStorage",
            DataType::F64 => "DoubleStorage",
            DataType::U8 => "ByteStorage",
            DataType::I16 => "ShortStorage",
            DataType::I32 => "IntStorage",
            DataType::I64 => "LongStorage",
            DataType::Bool => "BoolStorage",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            DataType::BF16 => "bf16",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::Bool => "bool",
        };
        f.write_str(name)
    }
}

pub trait ArrayElement: Pod {
    fn data_type() -> DataType;
}

macro_rules! impl_array_element {
    ($($type:ty => $variant:ident),+ $(,)?) => {
        $(
            impl ArrayElement for $type {
                fn data_type() -> DataType {
                    DataType::$variant
                }
            }
        )+
    };
}

impl_array_element! {
    f16 => F16,
    bf16 => BF16,
    f32 => F32,
    f64 => F64,
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
}
