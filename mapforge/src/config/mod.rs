//! Import configuration.
//!
//! [`ImportConfig`] carries every knob of the pipeline. Defaults live in
//! [`defaults`]; the CLI can overlay an INI settings file via
//! [`ImportConfig::from_ini_file`] before applying flag overrides.

pub mod defaults;

use crate::layout::RESOURCE_CACHE_DIR;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// All knobs of the import core.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Root under which `tenants/` and the resource cache live.
    pub storage_root: PathBuf,
    /// Base URL for tileset resource fetches; `None` disables fetching.
    pub resource_base_url: Option<String>,
    /// Concurrent renderer tasks per segment.
    pub render_workers: usize,
    /// Bounded channel capacity between renderers and the consumer.
    pub channel_capacity: usize,
    /// Rows per batch flush.
    pub batch_size: usize,
    /// Largest segments imported per call.
    pub max_segments: usize,
    /// Entry bound of the in-memory texture cache.
    pub memory_cache_entries: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(defaults::DEFAULT_STORAGE_ROOT),
            resource_base_url: None,
            render_workers: defaults::DEFAULT_RENDER_WORKERS,
            channel_capacity: defaults::DEFAULT_CHANNEL_CAPACITY,
            batch_size: defaults::DEFAULT_BATCH_SIZE,
            max_segments: defaults::DEFAULT_MAX_SEGMENTS,
            memory_cache_entries: defaults::DEFAULT_MEMORY_CACHE_ENTRIES,
        }
    }
}

impl ImportConfig {
    /// The resource disk cache directory under the storage root.
    pub fn resource_cache_dir(&self) -> PathBuf {
        self.storage_root.join(RESOURCE_CACHE_DIR)
    }

    /// Load settings from an INI file over the defaults.
    ///
    /// Recognized sections and keys:
    ///
    /// ```ini
    /// [storage]
    /// root = /srv/maps
    ///
    /// [network]
    /// resource_base_url = https://render.example.com/res
    ///
    /// [pipeline]
    /// render_workers = 4
    /// channel_capacity = 20
    /// batch_size = 500
    /// max_segments = 3
    /// ```
    ///
    /// Unknown sections or keys warn and are otherwise ignored, so configs
    /// stay forward-compatible.
    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(io) => ConfigError::Io(io),
            ini::Error::Parse(p) => ConfigError::Parse(p.to_string()),
        })?;

        let mut config = Self::default();
        for (section, properties) in ini.iter() {
            match section {
                Some("storage") => {
                    for (key, value) in properties.iter() {
                        match key {
                            "root" => config.storage_root = PathBuf::from(value),
                            other => warn_unknown("storage", other),
                        }
                    }
                }
                Some("network") => {
                    for (key, value) in properties.iter() {
                        match key {
                            "resource_base_url" => {
                                config.resource_base_url = Some(value.to_string())
                            }
                            other => warn_unknown("network", other),
                        }
                    }
                }
                Some("pipeline") => {
                    for (key, value) in properties.iter() {
                        match key {
                            "render_workers" => {
                                config.render_workers =
                                    defaults::clamp_render_workers(parse_usize(key, value)?)
                            }
                            "channel_capacity" => {
                                config.channel_capacity = parse_usize(key, value)?
                            }
                            "batch_size" => config.batch_size = parse_usize(key, value)?,
                            "max_segments" => config.max_segments = parse_usize(key, value)?,
                            other => warn_unknown("pipeline", other),
                        }
                    }
                }
                Some(other) => warn!(section = other, "unknown config section"),
                None => {}
            }
        }
        Ok(config)
    }
}

fn warn_unknown(section: &str, key: &str) {
    warn!(section = section, key = key, "unknown config key");
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
