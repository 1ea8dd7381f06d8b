//! Environment overrides applied on top of the file configuration.
//!
//! The lookup is injected so tests never touch the process environment.

use std::str::FromStr;

use crate::config::loader::validate_config;
use crate::config::schema::Config;
use crate::error::ConfigError;

pub const ENV_BATCH_SIZE: &str = "MEDIAGEN_BATCH_SIZE";
pub const ENV_PARALLELISM: &str = "MEDIAGEN_PARALLELISM";
pub const ENV_JOBS_PER_RUN: &str = "MEDIAGEN_JOBS_PER_RUN";
pub const ENV_TIME_BUDGET_MS: &str = "MEDIAGEN_TIME_BUDGET_MS";
pub const ENV_IMAGE_MODEL: &str = "MEDIAGEN_IMAGE_MODEL";
pub const ENV_VIDEO_MODEL: &str = "MEDIAGEN_VIDEO_MODEL";
pub const ENV_DATABASE_PATH: &str = "MEDIAGEN_DATABASE_PATH";
pub const ENV_BIND: &str = "MEDIAGEN_BIND";

/// Applies overrides from `lookup` and re-validates the result.
/// Blank values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(ENV_BATCH_SIZE) {
        config.worker.batch_size = parse_positive(ENV_BATCH_SIZE, &v)?;
    }
    if let Some(v) = get(ENV_PARALLELISM) {
        config.worker.parallelism = parse_positive(ENV_PARALLELISM, &v)?;
    }
    if let Some(v) = get(ENV_JOBS_PER_RUN) {
        config.worker.jobs_per_run = parse_positive(ENV_JOBS_PER_RUN, &v)?;
    }
    if let Some(v) = get(ENV_TIME_BUDGET_MS) {
        config.worker.time_budget_ms = parse_positive(ENV_TIME_BUDGET_MS, &v)?;
    }
    if let Some(v) = get(ENV_IMAGE_MODEL) {
        config.providers.image.model = v.trim().to_string();
    }
    if let Some(v) = get(ENV_VIDEO_MODEL) {
        config.providers.video.model = v.trim().to_string();
    }
    if let Some(v) = get(ENV_DATABASE_PATH) {
        config.database_path = Some(v.trim().to_string());
    }
    if let Some(v) = get(ENV_BIND) {
        config.server.bind = v.trim().to_string();
    }

    validate_config(config)
}

/// [`apply_env_overrides`] against the process environment.
pub fn apply_process_env(config: &mut Config) -> Result<(), ConfigError> {
    apply_env_overrides(config, |name| std::env::var(name).ok())
}

fn parse_positive<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed = value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    if parsed <= T::default() {
        return Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
