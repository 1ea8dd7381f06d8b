use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::worker::TerminalPolicy;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Also run after env
/// overrides, which bypass the schema.
pub(crate) fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let worker = &config.worker;
    for (name, value) in [
        ("worker.batch_size", worker.batch_size),
        ("worker.parallelism", worker.parallelism),
        ("worker.jobs_per_run", worker.jobs_per_run),
        ("server.dispatch_queue", config.server.dispatch_queue),
    ] {
        if value == 0 {
            return Err(invalid(format!("{} must be at least 1", name)));
        }
    }
    if worker.time_budget_ms == 0 {
        return Err(invalid("worker.time_budget_ms must be positive".into()));
    }
    if worker.persist_attempts == 0 {
        return Err(invalid("worker.persist_attempts must be at least 1".into()));
    }
    if worker.max_variations == 0 {
        return Err(invalid("worker.max_variations must be at least 1".into()));
    }
    if let TerminalPolicy::MinSuccessRatio { ratio } = worker.terminal_policy {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid(format!(
                "worker.terminal_policy ratio must be in (0, 1], got {}",
                ratio
            )));
        }
    }
    if worker.cost_per_image < 0.0 || worker.cost_per_video < 0.0 {
        return Err(invalid("worker cost estimates must not be negative".into()));
    }

    let retry = &config.providers.retry;
    if retry.max_retries > 0 && retry.delays_ms.is_empty() {
        return Err(invalid(
            "providers.retry.delays_ms must not be empty when max_retries > 0".into(),
        ));
    }

    for (name, endpoint) in [
        ("image", &config.providers.image),
        ("video", &config.providers.video),
    ] {
        if endpoint.model.trim().is_empty() {
            return Err(invalid(format!("providers.{}.model must not be empty", name)));
        }
        if url::Url::parse(&endpoint.base_url).is_err() {
            return Err(invalid(format!(
                "providers.{}.base_url is not a valid URL: {}",
                name, endpoint.base_url
            )));
        }
    }

    if url::Url::parse(&config.storage.public_base_url).is_err() {
        return Err(invalid(format!(
            "storage.public_base_url is not a valid URL: {}",
            config.storage.public_base_url
        )));
    }
    if config.storage.key_prefix.trim_matches('/').is_empty() {
        return Err(invalid("storage.key_prefix must not be empty".into()));
    }

    let d = &config.derivatives;
    if d.thumbnail_width == 0 || d.preview_width == 0 || d.max_dimension == 0 {
        return Err(invalid("derivative dimensions must be positive".into()));
    }

    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.worker.batch_size, 4);
        assert_eq!(config.worker.jobs_per_run, 3);
        assert_eq!(config.worker.time_budget_ms, 240_000);
        assert_eq!(config.providers.retry.max_retries, 3);
        assert_eq!(config.providers.retry.delays_ms, vec![2_000, 5_000, 10_000]);
        assert_eq!(config.storage.signed_url_ttl_secs, 21_600);
        assert_eq!(config.derivatives.thumbnail_width, 480);
        assert_eq!(config.derivatives.preview_width, 1600);
        assert_eq!(config.worker.terminal_policy, TerminalPolicy::AnySuccess);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!((2..=8).contains(&config.worker.parallelism));
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/mediagen/jobs.db",
            "storage": {
                "root": "/var/lib/mediagen/objects",
                "public_base_url": "https://media.example.com",
                "key_prefix": "renders"
            },
            "worker": {
                "batch_size": 2,
                "parallelism": 2,
                "terminal_policy": { "kind": "min_success_ratio", "ratio": 0.5 }
            },
            "providers": {
                "image": { "model": "image-model-x" },
                "video": { "model": "video-model-y", "poll_interval_ms": 2000 },
                "retry": { "max_retries": 1, "delays_ms": [100] }
            },
            "logging": { "level": "debug", "format": "json" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database_path.as_deref(), Some("/var/lib/mediagen/jobs.db"));
        assert_eq!(config.storage.key_prefix, "renders");
        assert_eq!(config.worker.batch_size, 2);
        assert_eq!(
            config.worker.terminal_policy,
            TerminalPolicy::MinSuccessRatio { ratio: 0.5 }
        );
        assert_eq!(config.providers.image.model, "image-model-x");
        assert_eq!(config.providers.video.poll_interval_ms, 2000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_schema_rejects_unknown_fields() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workers": 4 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_zero_batch_size() {
        let result = load_config_from_str(r#"{ "version": "1.0", "worker": { "batch_size": 0 } }"#);
        match result {
            Err(ConfigError::SchemaValidation { errors }) => {
                assert!(errors.contains("/worker/batch_size"), "errors: {}", errors);
            }
            other => panic!("expected schema error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_ratio_out_of_range() {
        let mut config = Config::default();
        config.worker.terminal_policy = TerminalPolicy::MinSuccessRatio { ratio: 1.5 };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_empty_retry_delays_rejected() {
        let mut config = Config::default();
        config.providers.retry.delays_ms.clear();
        assert!(validate_config(&config).is_err());

        config.providers.retry.max_retries = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut config = Config::default();
        config.storage.public_base_url = "not a url".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_config_from_str("{ version: 1.0"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/mediagen.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
