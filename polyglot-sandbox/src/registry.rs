//! Language registry: language id → image and command templates

use crate::error::{Result, SandboxError};
use polyglot_common::PublicLanguage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Everything needed to run code in one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSpec {
    /// Unique key, e.g. `python`
    pub id: String,

    /// Display name
    pub name: String,

    /// Isolation image the code runs in
    #[serde(rename = "imagename")]
    pub image: String,

    /// Compile step; `%BASENAME%` is replaced by the source basename
    #[serde(default)]
    pub compile: Option<String>,

    /// Run step; `%BASENAME%` is replaced by the source basename
    pub run: String,

    /// Interactive shell command, if the language has a REPL
    #[serde(default)]
    pub repl: Option<String>,

    /// Expected source file extension, without the dot
    pub extension: String,

    /// File under the samples directory holding example code
    #[serde(rename = "codeSampleFileName", default)]
    pub sample_file: Option<String>,
}

impl LanguageSpec {
    pub fn has_repl(&self) -> bool {
        self.repl.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageSpec>,
}

/// Read-only table of supported languages, in configuration order.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<LanguageSpec>,
}

impl LanguageRegistry {
    /// Build a registry, rejecting duplicate ids.
    pub fn from_specs(languages: Vec<LanguageSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for lang in &languages {
            if lang.id.is_empty() {
                return Err(SandboxError::Config("language with empty id".to_string()));
            }
            if !seen.insert(lang.id.as_str()) {
                return Err(SandboxError::Config(format!(
                    "duplicate language id '{}'",
                    lang.id
                )));
            }
        }
        Ok(Self { languages })
    }

    /// Parse a `{"languages": [...]}` document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: LanguagesFile = serde_json::from_str(content)
            .map_err(|e| SandboxError::Config(format!("failed to parse languages: {}", e)))?;
        Self::from_specs(file.languages)
    }

    /// Load the registry from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            count = registry.len(),
            "Loaded language registry"
        );
        Ok(registry)
    }

    pub fn lookup(&self, language_id: &str) -> Result<&LanguageSpec> {
        self.languages
            .iter()
            .find(|lang| lang.id == language_id)
            .ok_or_else(|| SandboxError::UnknownLanguage(language_id.to_string()))
    }

    /// Discovery listing; never exposes images or command templates.
    pub fn list_public(&self) -> Vec<PublicLanguage> {
        self.languages
            .iter()
            .map(|lang| PublicLanguage {
                id: lang.id.clone(),
                name: lang.name.clone(),
                extension: lang.extension.clone(),
                repl: lang.has_repl(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}
