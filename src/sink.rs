use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::address::ContentKey;

#[derive(Debug, Error)]
#[error("write member artifact {path}")]
pub struct SinkError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Saved,
    AlreadyExists,
}

/// Writes one artifact per member, `<dir>/<content key>.<extension>`.
///
/// The artifact on disk is the durable proof that a member was saved.
#[derive(Debug, Clone)]
pub struct MemberSink {
    dir: PathBuf,
    extension: String,
}

impl MemberSink {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{}", self.extension))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.artifact_path(key).is_file()
    }

    pub fn sink(&self, key: &ContentKey, bytes: &[u8]) -> Result<SinkOutcome, SinkError> {
        let path = self.artifact_path(key.as_str());
        if path.is_file() {
            return Ok(SinkOutcome::AlreadyExists);
        }

        crate::checkpoint::write_atomic(&path, bytes).map_err(|source| SinkError {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(key = %key, path = %path.display(), "saved member");

        Ok(SinkOutcome::Saved)
    }
}
