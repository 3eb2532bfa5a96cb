//! Driver configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkflow/chunkflow.toml`
//! - Windows: `%APPDATA%/chunkflow/chunkflow.toml`
//!
//! `--config <path>` overrides the location. A missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use chunkflow_transfer::{AssemblerConfig, DEFAULT_CHUNK_SIZE};

/// Driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root under which chunks of unfinished sessions are stored.
    #[serde(default = "default_incomplete_dir")]
    pub incomplete_dir: PathBuf,

    /// Root under which assembled files are written.
    #[serde(default = "default_complete_dir")]
    pub complete_dir: PathBuf,

    /// Size of each uploaded chunk in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub assembler: AssemblerConfig,
}

fn default_incomplete_dir() -> PathBuf {
    std::env::temp_dir().join("chunkflow").join("incomplete")
}

fn default_complete_dir() -> PathBuf {
    std::env::temp_dir().join("chunkflow").join("complete")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            incomplete_dir: default_incomplete_dir(),
            complete_dir: default_complete_dir(),
            chunk_size: default_chunk_size(),
            assembler: AssemblerConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the platform location when
    /// `path` is `None`.
    ///
    /// An explicit path must exist; a missing platform file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = config_path()?;
                if path.exists() {
                    Self::read(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkflow")
            .join("chunkflow.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkflow").join("chunkflow.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunkflow/chunkflow.toml"))
    }
}
