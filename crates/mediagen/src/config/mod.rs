pub mod env;
pub mod loader;
pub mod schema;

pub use env::{apply_env_overrides, apply_process_env};
pub use loader::{load_config, load_config_from_str};
pub use schema::{
    Config, DerivativeConfig, LogFormat, LoggingConfig, ProviderEndpoint, ProvidersConfig,
    RetryConfig, ServerConfig, StorageConfig, WorkerConfig,
};

use std::path::PathBuf;
use std::time::Duration;

use crate::derivative::DerivativeSettings;
use crate::retry::RetrySchedule;

impl Config {
    /// Configured database path, or the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

impl RetryConfig {
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule::new(
            self.max_retries,
            self.delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        )
    }
}

impl DerivativeConfig {
    pub fn settings(&self) -> DerivativeSettings {
        DerivativeSettings {
            thumbnail_width: self.thumbnail_width,
            preview_width: self.preview_width,
            thumbnail_quality: self.thumbnail_quality,
            preview_quality: self.preview_quality,
            compress_quality: self.compress_quality,
            compress_threshold_bytes: self.compress_threshold_bytes,
            max_dimension: self.max_dimension,
        }
    }
}
