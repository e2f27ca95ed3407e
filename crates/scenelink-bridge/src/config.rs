//! Configuration loading

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub broadcaster: BroadcasterConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub markers: MarkersConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Sampling period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Scene pixels per world meter
    #[serde(default = "default_scale")]
    pub pixels_per_meter: f64,
    /// Height of the published frame, in meters
    #[serde(default)]
    pub z_offset: f64,
    #[serde(default = "default_tf_topic")]
    pub topic: String,
}

impl BroadcasterConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            pixels_per_meter: default_scale(),
            z_offset: 0.0,
            topic: default_tf_topic(),
        }
    }
}

fn default_period_ms() -> u64 {
    100
}

fn default_scale() -> f64 {
    1.0
}

fn default_tf_topic() -> String {
    "tf".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_topic")]
    pub topic: String,
    /// Fixed snapshot width, 0 for the item's natural width
    #[serde(default)]
    pub width: u32,
    /// Fixed snapshot height, 0 for the item's natural height
    #[serde(default)]
    pub height: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            topic: default_image_topic(),
            width: 0,
            height: 0,
        }
    }
}

fn default_image_topic() -> String {
    "image".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkersConfig {
    #[serde(default = "default_markers_topic")]
    pub topic: String,
    #[serde(default = "default_scale")]
    pub pixels_per_meter: f64,
}

impl Default for MarkersConfig {
    fn default() -> Self {
        Self {
            topic: default_markers_topic(),
            pixels_per_meter: default_scale(),
        }
    }
}

fn default_markers_topic() -> String {
    "footprints".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-topic channel capacity of the in-process bus
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    scenelink_core::transport::DEFAULT_CAPACITY
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(BridgeConfig::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(&BridgeConfig::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
