use std::fmt;

use thiserror::Error;

use crate::{ArrayElement, DataType};

/// A materialized, host-resident tensor.
///
/// Bytes are contiguous, row-major and in native byte order.
#[derive(Clone, PartialEq, Eq)]
pub struct Tensor {
    data_type: DataType,
    shape: Box<[usize]>,
    data: Box<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorSizeError {
    #[error(
        "tensor of shape {shape:?} and data type {data_type} expected to be {expected_size} bytes, got {actual_size} bytes"
    )]
    Mismatch {
        data_type: DataType,
        shape: Box<[usize]>,
        expected_size: usize,
        actual_size: usize,
    },
    #[error("tensor of shape {shape:?} and data type {data_type} is larger than the address space")]
    Overflow {
        data_type: DataType,
        shape: Box<[usize]>,
    },
}

impl Tensor {
    pub fn from_bytes(
        data_type: DataType,
        shape: &[usize],
        data: impl Into<Box<[u8]>>,
    ) -> Result<Self, TensorSizeError> {
        let data = data.into();
        let Some(expected_size) = size_for_shape(shape, data_type) else {
            return Err(TensorSizeError::Overflow {
                data_type,
                shape: shape.into(),
            });
        };
        if data.len() != expected_size {
            return Err(TensorSizeError::Mismatch {
                data_type,
                shape: shape.into(),
                expected_size,
                actual_size: data.len(),
            });
        }
        Ok(Self {
            data_type,
            shape: shape.into(),
            data,
        })
    }

    pub fn from_slice<T: ArrayElement>(
        shape: &[usize],
        values: &[T],
    ) -> Result<Self, TensorSizeError> {
        Self::from_bytes(T::data_type(), shape, bytemuck::cast_slice::<T, u8>(values))
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn num_elements(&self) -> usize {
        self.data.len() / self.data_type.size_in_bytes()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Copies the elements out as `T`, or `None` if `T` does not match the
    /// tensor's data type.
    pub fn to_vec<T: ArrayElement>(&self) -> Option<Vec<T>> {
        if T::data_type() != self.data_type {
            return None;
        }
        Some(bytemuck::pod_collect_to_vec::<u8, T>(&self.data))
    }

    pub fn to_bools(&self) -> Option<Vec<bool>> {
        if self.data_type != DataType::Bool {
            return None;
        }
        Some(self.data.iter().map(|&b| b != 0).collect())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("data_type", &self.data_type)
            .field("shape", &self.shape)
            .field("size_in_bytes", &self.data.len())
            .finish()
    }
}

/// Element count of `shape`, or `None` if it does not fit in `usize`.
pub fn num_elements_for_shape(shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

pub fn size_for_shape(
    shape: &[usize],
    data_type: DataType,
) -> Option<usize> {
    num_elements_for_shape(shape)?.checked_mul(data_type.size_in_bytes())
}

pub fn contiguous_stride(shape: &[usize]) -> Box<[usize]> {
    let mut stride = vec![0usize; shape.len()];
    let mut s = 1usize;
    for (i, &dim) in shape.iter().enumerate().rev() {
        stride[i] = s;
        s = s.saturating_mul(dim.max(1));
    }
    stride.into_boxed_slice()
}
