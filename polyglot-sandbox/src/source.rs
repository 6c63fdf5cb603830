//! Decodes submitted source and writes it where the isolated process sees it

use crate::error::{Result, SandboxError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};

/// Writes one file per submission into a shared runtime directory.
///
/// Files are named exactly as the caller supplied, so concurrent submissions
/// with the same filename overwrite each other; the last write wins.
#[derive(Debug, Clone)]
pub struct SourceMaterializer {
    runtime_dir: PathBuf,
}

impl SourceMaterializer {
    /// Create the runtime directory if needed and resolve it to an absolute path.
    pub fn new(runtime_dir: impl AsRef<Path>) -> Result<Self> {
        let runtime_dir = runtime_dir.as_ref();
        std::fs::create_dir_all(runtime_dir).map_err(|source| SandboxError::WriteFailed {
            path: runtime_dir.to_path_buf(),
            source,
        })?;
        let runtime_dir =
            std::fs::canonicalize(runtime_dir).map_err(|source| SandboxError::WriteFailed {
                path: runtime_dir.to_path_buf(),
                source,
            })?;
        Ok(Self { runtime_dir })
    }

    /// Absolute directory mounted into one-shot processes
    pub fn mount_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn decode(content: &str) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(content.trim())?)
    }

    /// Decode `content` and write it as `<runtime_dir>/<filename>`.
    pub async fn materialize(&self, filename: &str, content: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        let bytes = Self::decode(content)?;
        let path = self.runtime_dir.join(filename);

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| SandboxError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Source written");
        Ok(path)
    }
}

/// Reject names that would land outside the runtime directory.
fn validate_filename(filename: &str) -> Result<()> {
    let escapes = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0');
    if escapes {
        return Err(SandboxError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}
