//! Configuration for the facevault service.
//!
//! Stored in ~/.facevault/config.yaml by default. Every field is optional.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use facevault_embed::EmbedConfig;
use facevault_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Default base configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".facevault";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Remote face detection + embedding service.
    #[default]
    Http,
    /// Deterministic content hash; no model required.
    Hash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl EmbedderConfig {
    pub fn embed_config(&self, dimension: usize) -> EmbedConfig {
        EmbedConfig::default()
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .with_api_key(&self.api_key)
            .with_dimension(dimension)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding profiles.redb and the index snapshot
    /// (default ~/.facevault/data).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// HTTP listen address, e.g. ":5000" or "127.0.0.1:5000".
    pub listen: String,

    /// Directory watched for new photos in `serve` and `watch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_dir: Option<PathBuf>,

    pub embedder: EmbedderConfig,

    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            listen: ":5000".to_string(),
            watch_dir: None,
            embedder: EmbedderConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Gets the default config directory.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR))
    }

    /// Gets the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Load from `path`, or the default path. A missing or empty file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("read config {}", path.display())),
        };
        Self::parse(&content).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(content)?;
        cfg.pipeline.validate()?;
        Ok(cfg)
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_dir()
                .map(|d| d.join("data"))
                .context("cannot determine home directory; set data_dir"),
        }
    }

    pub fn profiles_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("profiles.redb"))
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("index").join("snapshot.fvs"))
    }
}
