use serde::Deserialize;

use crate::error::{DevError, Result};
use crate::store::quantum::StoreGeometry;

/// Top-level configuration loaded from a TOML file.
///
/// Every field has a default, so an empty file (or no file at all) yields
/// a usable configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Quantum store device parameters.
    #[serde(default)]
    pub store: StoreConfig,
    /// Stream pipe device parameters.
    #[serde(default)]
    pub pipe: PipeConfig,
}

/// Parameters for the sparse quantum store devices.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Size of one quantum in bytes — the smallest allocation unit.
    #[serde(default = "default_quantum_size")]
    pub quantum_size: usize,
    /// Number of quantum slots per slab ("quantum set").
    #[serde(default = "default_qset_size")]
    pub qset_size: usize,
    /// Number of store devices to create.
    #[serde(default = "default_store_devices")]
    pub devices: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            quantum_size: default_quantum_size(),
            qset_size: default_qset_size(),
            devices: default_store_devices(),
        }
    }
}

impl StoreConfig {
    /// The effective geometry passed to each device at construction.
    pub fn geometry(&self) -> StoreGeometry {
        StoreGeometry {
            quantum_size: self.quantum_size,
            qset_size: self.qset_size,
        }
    }
}

/// Parameters for the circular stream pipe devices.
#[derive(Debug, Deserialize, Clone)]
pub struct PipeConfig {
    /// Physical buffer size in bytes. Usable payload is one byte less:
    /// one slot stays reserved to tell a full buffer from an empty one.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Number of pipe devices to create.
    #[serde(default = "default_pipe_devices")]
    pub devices: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            devices: default_pipe_devices(),
        }
    }
}

fn default_quantum_size() -> usize { 4000 }
fn default_qset_size() -> usize { 1000 }
fn default_store_devices() -> usize { 4 }
fn default_buffer_size() -> usize { 4000 }
fn default_pipe_devices() -> usize { 4 }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DevError::Config(format!("Cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DevError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.quantum_size == 0 {
            return Err(DevError::Config("quantum_size must be > 0".into()));
        }
        if self.store.qset_size == 0 {
            return Err(DevError::Config("qset_size must be > 0".into()));
        }
        if self.pipe.buffer_size < 2 {
            return Err(DevError::Config(
                "buffer_size must be >= 2 (one slot is reserved)".into(),
            ));
        }
        if self.store.devices == 0 || self.pipe.devices == 0 {
            return Err(DevError::Config("device counts must be > 0".into()));
        }
        Ok(())
    }
}
