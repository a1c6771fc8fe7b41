use std::{
    fs,
    path::{Path, PathBuf},
};

use super::CheckpointError;
use crate::{ConversionConfig, ParameterMap, resolver::resolve_parameters, storage::BlobIndex};

pub const METADATA_FILE: &str = "data.pkl";
pub const BLOB_DIR: &str = "data";

/// A directory export: `data.pkl` next to a `data/` folder of numbered blobs.
#[derive(Debug, Clone)]
pub struct SavedModule {
    root: PathBuf,
}

impl SavedModule {
    pub fn open(dir: &Path) -> Result<Self, CheckpointError> {
        if !dir.join(METADATA_FILE).is_file() {
            return Err(CheckpointError::MissingMetadata {
                path: dir.to_path_buf(),
            });
        }
        Ok(Self {
            root: dir.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.root.join(BLOB_DIR)
    }

    /// An absent `data/` folder yields an empty index; any reference into
    /// it then fails as a missing storage.
    pub fn blob_index(&self) -> Result<BlobIndex, CheckpointError> {
        let dir = self.blob_dir();
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Saved module has no blob directory");
            return Ok(BlobIndex::new());
        }
        Ok(BlobIndex::from_dir(&dir)?)
    }

    pub fn load_parameters(
        &self,
        config: &ConversionConfig,
    ) -> Result<ParameterMap, CheckpointError> {
        let pickle = fs::read(self.metadata_path())?;
        let blobs = self.blob_index()?;
        tracing::info!(
            module = %self.root.display(),
            blobs = blobs.len(),
            bytes = blobs.total_bytes(),
            "Loading saved module"
        );
        Ok(resolve_parameters(&pickle, &blobs, config)?)
    }
}
