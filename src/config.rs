//! Reconstruction settings, loadable from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunks::DEFAULT_CHUNK_COUNT;
use crate::enums::DeviceKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// `"CPU"`, `"GPU"` or `"ANY"`.
    pub device: DeviceKind,
    /// Largest point-to-plane distance, in volume units, a frame may be
    /// sampled from.
    pub search_distance: f64,
    /// Starting number of frame-data buffers; raised when a chunk would
    /// exceed the device's binding size.
    pub chunk_count: usize,
    /// WGSL kernel to load instead of the built-in one.
    pub kernel_path: Option<PathBuf>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::Any,
            search_distance: 1.0,
            chunk_count: DEFAULT_CHUNK_COUNT,
            kernel_path: None,
        }
    }
}

impl ReconstructionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path.as_ref())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.search_distance.is_finite() || self.search_distance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "search_distance must be positive, got {}",
                self.search_distance
            )));
        }
        if self.chunk_count == 0 {
            return Err(ConfigError::Invalid("chunk_count must be at least 1".into()));
        }
        Ok(())
    }
}
