use std::sync::Arc;

use thiserror::Error;

use crate::DataType;

#[derive(Debug, Clone, Error)]
#[error(
    "Storage {index} holds {byte_len} bytes, which is not a multiple of the {data_type} element size ({element_size} bytes)"
)]
pub struct MalformedStorageError {
    pub index: u64,
    pub data_type: DataType,
    pub byte_len: usize,
    pub element_size: usize,
}

/// A blob reinterpreted as a flat array of one element type.
///
/// Shape, stride and offset are applied later, when a tensor is rebuilt on
/// top of the storage. The bytes are shared with the blob index.
#[derive(Debug, Clone)]
pub struct TypedStorage {
    index: u64,
    data_type: DataType,
    bytes: Arc<[u8]>,
}

impl TypedStorage {
    pub fn new(
        index: u64,
        data_type: DataType,
        bytes: Arc<[u8]>,
    ) -> Result<Self, MalformedStorageError> {
        let element_size = data_type.size_in_bytes();
        if bytes.len() % element_size != 0 {
            return Err(MalformedStorageError {
                index,
                data_type,
                byte_len: bytes.len(),
                element_size,
            });
        }
        Ok(Self {
            index,
            data_type,
            bytes,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn num_elements(&self) -> usize {
        self.bytes.len() / self.data_type.size_in_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes of `count` elements starting at element `first`, or `None` if
    /// that runs past the end.
    pub fn element_bytes(
        &self,
        first: usize,
        count: usize,
    ) -> Option<&[u8]> {
        let element_size = self.data_type.size_in_bytes();
        let begin = first.checked_mul(element_size)?;
        let end = begin.checked_add(count.checked_mul(element_size)?)?;
        self.bytes.get(begin..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_follows_width() {
        let storage = TypedStorage::new(0, DataType::F64, Arc::from(vec![0u8; 24])).unwrap();
        assert_eq!(storage.num_elements(), 3);
        assert_eq!(storage.element_bytes(1, 2).map(<[u8]>::len), Some(16));
        assert!(storage.element_bytes(2, 2).is_none());
    }

    #[test]
    fn ragged_buffers_are_malformed() {
        let error = TypedStorage::new(4, DataType::I32, Arc::from(vec![0u8; 10])).unwrap_err();
        assert_eq!(error.index, 4);
        assert_eq!(error.byte_len, 10);
        assert_eq!(error.element_size, 4);
    }

    #[test]
    fn empty_buffers_hold_zero_elements() {
        let storage = TypedStorage::new(1, DataType::F16, Arc::from(Vec::<u8>::new())).unwrap();
        assert_eq!(storage.num_elements(), 0);
    }
}
