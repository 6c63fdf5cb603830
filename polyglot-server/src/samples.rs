//! Example programs offered to clients

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use polyglot_sandbox::LanguageSpec;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CodeSamples {
    dir: PathBuf,
}

impl CodeSamples {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Base64 of the language's sample file.
    pub async fn encoded_sample(&self, spec: &LanguageSpec) -> Result<String> {
        let file = spec
            .sample_file
            .as_deref()
            .ok_or_else(|| anyhow!("Language '{}' has no code sample", spec.id))?;
        let path = self.dir.join(file);
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read code sample {}", path.display()))?;
        Ok(STANDARD.encode(content))
    }
}
