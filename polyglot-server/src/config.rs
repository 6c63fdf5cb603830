//! Server configuration
//!
//! TOML file with per-field environment overrides; CLI flags are applied on
//! top by the binary.

use anyhow::{anyhow, Context, Result};
use polyglot_sandbox::DEFAULT_WORKDIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "polyglot.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_address: String,
    /// Language registry (JSON)
    pub languages_file: PathBuf,
    /// Where submitted source files are written
    pub runtime_dir: PathBuf,
    /// Example programs served by `/codesample`
    pub samples_dir: PathBuf,
    pub log_file: PathBuf,
    pub provider: ProviderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8889".to_string(),
            languages_file: PathBuf::from("config/languages.json"),
            runtime_dir: PathBuf::from("runtime"),
            samples_dir: PathBuf::from("codesamples"),
            log_file: PathBuf::from("polyglot.log"),
            provider: ProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Docker CLI
    Docker,
    /// Plain `sh -c` on this machine; no isolation
    Host,
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(ProviderKind::Docker),
            "host" => Ok(ProviderKind::Host),
            other => Err(anyhow!(
                "Invalid provider '{}'. Expected one of: docker, host",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub docker_binary: String,
    /// Mount point of the runtime directory inside one-shot processes
    pub workdir: String,
    /// Publish exposed ports of one-shot processes (`docker run -P`)
    pub publish_ports: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Docker,
            docker_binary: "docker".to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            publish_ports: true,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, else `polyglot.toml` if present, else defaults;
    /// environment overrides are applied in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `POLYGLOT_*` overrides read through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("POLYGLOT_BIND_ADDR") {
            self.bind_address = value;
        }
        if let Some(value) = lookup("POLYGLOT_LANGUAGES_FILE") {
            self.languages_file = PathBuf::from(value);
        }
        if let Some(value) = lookup("POLYGLOT_RUNTIME_DIR") {
            self.runtime_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("POLYGLOT_SAMPLES_DIR") {
            self.samples_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("POLYGLOT_PROVIDER") {
            self.provider.kind = value.parse().context("POLYGLOT_PROVIDER")?;
        }
        if let Some(value) = lookup("POLYGLOT_DOCKER_BINARY") {
            self.provider.docker_binary = value;
        }
        Ok(())
    }
}
