//! Reading finished archives back from disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use comex_core::{archive_io, ComexError};
use serde_json::Value;

use crate::archive::{DATA_FILE_NAME, METADATA_FILE_NAME};
use crate::datastore::DataStore;
use crate::metadata::{ExperimentMetadata, RunStatus};
use crate::serde::from_json_slice;

/// True when `path` is a folder holding metadata of a finished run.
pub fn is_archive(path: &Path) -> bool {
    if !path.is_dir() || !path.join(METADATA_FILE_NAME).is_file() {
        return false;
    }
    load_metadata(path).is_ok_and(|metadata| metadata.status == Some(RunStatus::Done))
}

/// Reads `experiment_meta.json` from the archive folder `path`.
pub fn load_metadata(path: &Path) -> Result<ExperimentMetadata, ComexError> {
    let file = path.join(METADATA_FILE_NAME);
    let bytes = fs::read(&file).map_err(|err| archive_io("archive.read_metadata", &file, err))?;
    from_json_slice(&bytes)
}

/// A run loaded back from its archive folder.
#[derive(Debug, Clone)]
pub struct ArchivedExperiment {
    /// Archive folder.
    pub path: PathBuf,
    /// Decoded metadata file.
    pub metadata: ExperimentMetadata,
    /// Decoded data file; empty when it is missing.
    pub data: DataStore,
    /// Parameter values that were exported faithfully.
    pub parameters: BTreeMap<String, Value>,
}

impl ArchivedExperiment {
    /// Loads an archive; `path` may be the folder or any file inside it.
    pub fn load(path: &Path) -> Result<Self, ComexError> {
        let folder = if path.is_file() {
            path.parent().unwrap_or(path).to_path_buf()
        } else {
            path.to_path_buf()
        };
        let metadata = load_metadata(&folder)?;
        let data_file = folder.join(DATA_FILE_NAME);
        let data = match fs::read(&data_file) {
            Ok(bytes) => DataStore::from_value(from_json_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => DataStore::new(),
            Err(err) => return Err(archive_io("archive.read_data", &data_file, err)),
        };
        let parameters = metadata
            .parameters
            .iter()
            .filter(|(_, info)| info.usable.unwrap_or(false))
            .filter_map(|(name, info)| info.value.clone().map(|value| (name.clone(), value)))
            .collect();
        Ok(Self {
            path: folder,
            metadata,
            data,
            parameters,
        })
    }

    /// Whether the run recorded a failure.
    pub fn has_error(&self) -> bool {
        self.metadata.has_error
    }
}
