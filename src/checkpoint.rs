use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::formats::HarvestState;

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Loads and atomically saves the harvest state of one cache directory.
///
/// Assumes a single writer per directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when there is nothing to resume from.
    ///
    /// A checkpoint that cannot be read or fails to deserialize is reported
    /// and treated as missing so that the harvest can start fresh.
    pub fn load(&self) -> Result<Option<HarvestState>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %err,
                    "checkpoint is unreadable; starting from a fresh state"
                );
                return Ok(None);
            }
        };

        match serde_json::from_slice::<HarvestState>(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %err,
                    "checkpoint is corrupt; starting from a fresh state"
                );
                Ok(None)
            }
        }
    }

    /// Writes to a temp file next to the checkpoint and renames it into place,
    /// so readers only ever see the old or the new complete state.
    pub fn save(&self, state: &HarvestState) -> Result<(), CheckpointError> {
        let mut record = state.clone();
        record.last_updated = Some(chrono::Utc::now().to_rfc3339());

        let mut data = serde_json::to_vec_pretty(&record)?;
        data.push(b'\n');
        write_atomic(&self.path, &data).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Removes the checkpoint. Returns whether one existed.
    pub fn clear(&self) -> Result<bool, CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
