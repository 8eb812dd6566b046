use serde::Deserialize;
use std::path::Path;

use crate::frame::{FrameError, FrameFormat};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Minimum summed luma delta inside one block for it to count as motion.
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u32,
    /// Edge length in pixels of the tracker's comparison blocks.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Capacity of each pipeline queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default)]
    pub start_index: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            delta_threshold: default_delta_threshold(),
            block_size: default_block_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { start_index: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.frame_format()?;
        if self.filter.block_size == 0 {
            return Err(ConfigError::Invalid("filter.block_size must be non-zero".into()));
        }
        if self.filter.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "filter.queue_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_format(&self) -> Result<FrameFormat, ConfigError> {
        Ok(FrameFormat::new(self.frame.width, self.frame.height)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid frame geometry: {0}")]
    Frame(#[from] FrameError),
}

// Default value functions
fn default_width() -> u32 {
    480
}
fn default_height() -> u32 {
    640
}
fn default_delta_threshold() -> u32 {
    32 * 69
}
fn default_block_size() -> u32 {
    8
}
fn default_queue_capacity() -> usize {
    100
}
fn default_log_level() -> String {
    "info".into()
}
