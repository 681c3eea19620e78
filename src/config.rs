//! Application configuration - JSON file with every engine knob

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use mirror_dl::config as defaults;
use mirror_dl::EngineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory when no path is given
pub const CONFIG_FILE: &str = "config.json";

/// Limits below this many KB/s are treated as unlimited
pub const MIN_RATE_LIMIT_KB: u64 = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overrides the base URL stored in the index
    pub base_url: Option<String>,
    /// 0 = unlimited
    pub rate_limit_kb: u64,
    pub workers: usize,
    pub request_capacity: usize,
    pub response_capacity: usize,
    pub update_capacity: usize,
    pub initial_batch: usize,
    pub retry_limit: u32,
    pub retry_delay_ms: u64,
    pub progress_interval_ms: u64,
    pub active_slots: usize,
    pub speed_window: usize,
    pub speed_min_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            rate_limit_kb: 0,
            workers: defaults::DEFAULT_WORKERS,
            request_capacity: defaults::REQUEST_CAPACITY,
            response_capacity: defaults::RESPONSE_CAPACITY,
            update_capacity: defaults::UPDATE_CAPACITY,
            initial_batch: defaults::INITIAL_BATCH,
            retry_limit: defaults::RETRY_LIMIT,
            retry_delay_ms: defaults::RETRY_DELAY.as_millis() as u64,
            progress_interval_ms: defaults::PROGRESS_INTERVAL.as_millis() as u64,
            active_slots: defaults::ACTIVE_SLOTS,
            speed_window: defaults::SPEED_WINDOW,
            speed_min_interval_ms: defaults::SPEED_MIN_INTERVAL.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Explicit path first, then `config.json` in the working directory, then defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(&local);
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("config_loaded: {}", path.display());
        Ok(config)
    }

    /// Global cap in bytes per second
    pub fn rate_limit_bytes(&self) -> u64 {
        normalize_rate_limit_kb(self.rate_limit_kb) * 1024
    }

    pub fn engine_config(&self, install_root: &Path) -> EngineConfig {
        let mut config = EngineConfig::new(install_root, self.base_url.clone().unwrap_or_default());
        config.rate_limit = self.rate_limit_bytes();
        config.workers = self.workers.max(1);
        config.request_capacity = self.request_capacity.max(1);
        config.response_capacity = self.response_capacity.max(1);
        config.update_capacity = self.update_capacity.max(1);
        config.initial_batch = self.initial_batch.max(1);
        config.retry_limit = self.retry_limit;
        config.retry_delay = Duration::from_millis(self.retry_delay_ms);
        config.progress_interval = Duration::from_millis(self.progress_interval_ms.max(1));
        config.active_slots = self.active_slots.max(1);
        config.speed_window = self.speed_window.max(1);
        config.speed_min_interval = Duration::from_millis(self.speed_min_interval_ms);
        config
    }
}

/// Anything under [`MIN_RATE_LIMIT_KB`] means unlimited
pub fn normalize_rate_limit_kb(kb: u64) -> u64 {
    if kb < MIN_RATE_LIMIT_KB {
        0
    } else {
        kb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn small_rate_limits_are_unlimited() {
        assert_eq!(normalize_rate_limit_kb(0), 0);
        assert_eq!(normalize_rate_limit_kb(199), 0);
        assert_eq!(normalize_rate_limit_kb(200), 200);

        let config = AppConfig {
            rate_limit_kb: 800,
            ..AppConfig::default()
        };
        assert_eq!(config.rate_limit_bytes(), 800 * 1024);
        assert_eq!(config.engine_config(Path::new("/m")).per_worker_rate(), Some(200 * 1024));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rate_limit_kb": 500, "retry_limit": 3}}"#).unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.rate_limit_kb, 500);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.workers, 4);
        assert_eq!(config.request_capacity, 10);

        let engine = config.engine_config(Path::new("/m"));
        assert_eq!(engine.retry_limit, 3);
        assert_eq!(engine.retry_delay, Duration::from_secs(1));
        assert_eq!(engine.progress_interval, Duration::from_millis(500));
    }

    #[test]
    fn zero_initial_batch_still_seeds_one_item() {
        let config = AppConfig {
            initial_batch: 0,
            workers: 0,
            ..AppConfig::default()
        };
        let engine = config.engine_config(Path::new("/m"));
        assert_eq!(engine.initial_batch, 1);
        assert_eq!(engine.workers, 1);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_json_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
