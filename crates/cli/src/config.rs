//! Persistent defaults for the `thinstack` command.
//!
//! Values are resolved in this order:
//! 1. Command line flags
//! 2. `~/.config/thinstack/config.toml`
//! 3. Built-in defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Model spec file (TOML or JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<PathBuf>,

    /// Safetensors files with composition, projection and embedding weights.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<PathBuf>>,

    /// Run on the first CUDA device instead of the CPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuda: Option<bool>,

    /// Log level used when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl CliConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("thinstack").join("config.toml"))
    }

    /// Loads the default file; a missing or unreadable file yields defaults.
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Io)
    }

    /// Overrides taken from `run` flags. `--cuda` and `--cpu` set the device
    /// explicitly; with neither, the stored choice is kept. An empty weight
    /// list leaves the stored paths alone.
    pub fn from_run_flags(
        spec: Option<PathBuf>,
        weights: &[PathBuf],
        cuda: bool,
        cpu: bool,
        log_level: Option<String>,
    ) -> Self {
        let device = match (cuda, cpu) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        Self {
            spec,
            weights: (!weights.is_empty()).then(|| weights.to_vec()),
            cuda: device,
            log_level,
        }
    }

    /// Overwrites every field that `other` sets.
    pub fn merge(&mut self, other: &CliConfig) {
        if other.spec.is_some() {
            self.spec = other.spec.clone();
        }
        if other.weights.is_some() {
            self.weights = other.weights.clone();
        }
        if other.cuda.is_some() {
            self.cuda = other.cuda;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "Parse error: {e}"),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {e}"),
            ConfigError::NoConfigDir => write!(f, "No config directory available"),
        }
    }
}

impl std::error::Error for ConfigError {}
