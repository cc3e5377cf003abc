//! Turn-scoped audio files.
//!
//! An [`AudioAsset`] owns a temporary file that is removed when the asset is
//! dropped, whichever way the turn ends.

use std::io::Write;
use std::path::{Path, PathBuf};

use callbridge_core::error::{Stage, TurnError};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug)]
pub struct AudioAsset {
    file: NamedTempFile,
    mime: &'static str,
    len: usize,
}

impl AudioAsset {
    /// Write `bytes` to a fresh temp file under `dir`.
    pub async fn create(
        dir: &Path,
        bytes: Vec<u8>,
        suffix: &'static str,
        mime: &'static str,
    ) -> Result<Self, TurnError> {
        let dir: PathBuf = dir.to_path_buf();
        let len = bytes.len();

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("utterance-")
                .suffix(suffix)
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| TurnError::upstream(Stage::Materialize, e.to_string()))?
        .map_err(|e| TurnError::upstream(Stage::Materialize, e.to_string()))?;

        debug!(path = %file.path().display(), len, "Audio asset written");
        Ok(Self { file, mime, len })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file_name(&self) -> String {
        self.file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string())
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn read(&self) -> Result<Vec<u8>, TurnError> {
        tokio::fs::read(self.file.path())
            .await
            .map_err(|e| TurnError::upstream(Stage::Materialize, e.to_string()))
    }

    /// Delete the file now, surfacing any I/O error.
    pub fn close(self) -> std::io::Result<()> {
        self.file.close()
    }
}
