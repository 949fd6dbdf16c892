//! User settings
//!
//! Stored as JSON in the user's config directory. Every field has a default,
//! so a partial or missing file still yields a usable configuration.
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::art::store::DEFAULT_BUDGET_BYTES;
use crate::art::ServiceSettings;
use crate::ui::viewport::{CoordinatorSettings, DEFAULT_REQUESTS_PER_TICK};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// All tunables for the grid and its thumbnail cache
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Memory budget for decoded thumbnails, in bytes
    pub memory_budget_bytes: usize,
    /// Number of background decode threads
    pub worker_threads: usize,
    /// Queued requests beyond which prefetch work is shed
    pub queue_depth: usize,
    /// Edge of a grid cell's thumbnail, in logical pixels
    pub thumbnail_size: u32,
    /// Requests handed to the loader per timer tick
    pub requests_per_tick: usize,
    /// Rows above and below the viewport to prefetch
    pub prefetch_rows: usize,
    /// Drip-feed timer period
    pub tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_BUDGET_BYTES,
            worker_threads: 2,
            queue_depth: 256,
            thumbnail_size: 160,
            requests_per_tick: DEFAULT_REQUESTS_PER_TICK,
            prefetch_rows: 1,
            tick_interval_ms: 30,
        }
    }
}

impl Config {
    /// `~/.config/album-grid/config.json` on Linux
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("album-grid");
        path.push("config.json");
        Some(path)
    }

    /// Load from `path`; a missing file gives the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Config = Self::from_json(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Clamp values that would stall or disable the loader
    pub fn sanitized(mut self) -> Self {
        self.worker_threads = self.worker_threads.clamp(1, 16);
        self.queue_depth = self.queue_depth.max(1);
        self.thumbnail_size = self.thumbnail_size.clamp(32, 1024);
        self.requests_per_tick = self.requests_per_tick.max(1);
        self.tick_interval_ms = self.tick_interval_ms.max(5);
        self
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            budget_bytes: self.memory_budget_bytes,
            worker_threads: self.worker_threads,
            queue_depth: self.queue_depth,
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            requests_per_tick: self.requests_per_tick,
            prefetch_rows: self.prefetch_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = Config::from_json(r#"{ "thumbnail_size": 200 }"#).unwrap();
        assert_eq!(config.thumbnail_size, 200);
        assert_eq!(config.memory_budget_bytes, 100 * 1024 * 1024);
        assert_eq!(config.requests_per_tick, 5);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            worker_threads: 4,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_sanitized_clamps_zeroes() {
        let config = Config {
            worker_threads: 0,
            requests_per_tick: 0,
            thumbnail_size: 1,
            ..Config::default()
        }
        .sanitized();
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.requests_per_tick, 1);
        assert_eq!(config.thumbnail_size, 32);
    }
}
