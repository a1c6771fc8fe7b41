use std::{
    collections::HashMap,
    fs,
    io::{Read, Seek},
    path::Path,
    sync::Arc,
};

use thiserror::Error;
use zip::ZipArchive;

/// How many present indices a [`MissingStorageError`] carries for diagnostics.
pub const MISSING_STORAGE_SAMPLE: usize = 10;

#[derive(Debug, Clone, Error)]
#[error(
    "Storage {index} not found in blob index ({total} blobs present, first indices: {available:?})"
)]
pub struct MissingStorageError {
    pub index: u64,
    pub available: Vec<u64>,
    pub total: usize,
}

/// Raw storage blobs keyed by their integer index.
///
/// Blobs are read once when the index is built and are never mutated.
#[derive(Debug, Default, Clone)]
pub struct BlobIndex {
    blobs: HashMap<u64, Arc<[u8]>>,
}

fn parse_blob_name(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file in `dir` whose name is a decimal integer.
    ///
    /// Other entries (subdirectories, `.DS_Store`, `data.pkl` and the like)
    /// are skipped.
    pub fn from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut index = Self::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(blob_index) = entry.file_name().to_str().and_then(parse_blob_name) else {
                continue;
            };
            if !entry.file_type()?.is_file() {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            index.insert(blob_index, bytes);
        }
        tracing::debug!(
            dir = %dir.display(),
            blobs = index.len(),
            bytes = index.total_bytes(),
            "Built blob index"
        );
        Ok(index)
    }

    /// Loads the `<prefix>data/<n>` members of a zip checkpoint.
    pub fn from_archive<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        prefix: &str,
    ) -> Result<Self, zip::result::ZipError> {
        let data_prefix = format!("{prefix}data/");
        let mut index = Self::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let Some(blob_index) = file
                .name()
                .strip_prefix(&data_prefix)
                .and_then(parse_blob_name)
            else {
                continue;
            };
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)?;
            index.insert(blob_index, bytes);
        }
        Ok(index)
    }

    /// Later inserts for the same index replace earlier ones.
    pub fn insert(
        &mut self,
        index: u64,
        bytes: impl Into<Arc<[u8]>>,
    ) {
        self.blobs.insert(index, bytes.into());
    }

    pub fn get(
        &self,
        index: u64,
    ) -> Result<&Arc<[u8]>, MissingStorageError> {
        self.blobs.get(&index).ok_or_else(|| MissingStorageError {
            index,
            available: self.indices().into_iter().take(MISSING_STORAGE_SAMPLE).collect(),
            total: self.blobs.len(),
        })
    }

    pub fn contains(
        &self,
        index: u64,
    ) -> bool {
        self.blobs.contains_key(&index)
    }

    /// Present indices in ascending order.
    pub fn indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.blobs.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.blobs.values().map(|blob| blob.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_non_numeric_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0"), [1u8, 2, 3, 4]).unwrap();
        fs::write(dir.path().join("12"), [9u8; 8]).unwrap();
        fs::write(dir.path().join("data.pkl"), b"not a blob").unwrap();
        fs::write(dir.path().join("-1"), [0u8]).unwrap();
        fs::write(dir.path().join("+3"), [0u8]).unwrap();
        fs::create_dir(dir.path().join("7")).unwrap();

        let index = BlobIndex::from_dir(dir.path()).unwrap();
        assert_eq!(index.indices(), vec![0, 12]);
        assert_eq!(&**index.get(0).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(index.get(12).unwrap().len(), 8);
        assert_eq!(index.total_bytes(), 12);
    }

    #[test]
    fn missing_index_reports_a_bounded_sample() {
        let mut index = BlobIndex::new();
        for i in 0..25u64 {
            index.insert(i, vec![0u8; 4]);
        }
        let error = index.get(99).unwrap_err();
        assert_eq!(error.index, 99);
        assert_eq!(error.total, 25);
        assert_eq!(error.available, (0..MISSING_STORAGE_SAMPLE as u64).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_inserts_keep_the_last_blob() {
        let mut index = BlobIndex::new();
        index.insert(3, vec![1u8]);
        index.insert(3, vec![2u8, 2]);
        assert_eq!(index.len(), 1);
        assert_eq!(&**index.get(3).unwrap(), &[2, 2]);
    }

    #[test]
    fn empty_directory_builds_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = BlobIndex::from_dir(dir.path()).unwrap();
        assert!(index.is_empty());
        assert!(index.get(0).is_err());
    }
}
