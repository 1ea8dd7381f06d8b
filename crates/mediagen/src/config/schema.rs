use serde::{Deserialize, Serialize};

use crate::worker::TerminalPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.mediagen/data/mediagen.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub derivatives: DerivativeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Base URL the `/files` route is reachable under.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    /// Prefix for generated objects: `{prefix}/{job_id}/...`.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub signing_secret_file: Option<String>,
    #[serde(default = "default_signing_secret_env")]
    pub signing_secret_env_var: Option<String>,
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_signed_url_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_key_prefix() -> String {
    "generated".to_string()
}

fn default_signing_secret_env() -> Option<String> {
    Some("MEDIAGEN_SIGNING_SECRET".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            key_prefix: default_key_prefix(),
            signing_secret: None,
            signing_secret_file: None,
            signing_secret_env_var: default_signing_secret_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Due jobs processed per trigger when no job id is given.
    #[serde(default = "default_jobs_per_run")]
    pub jobs_per_run: usize,
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,
    /// Added to the time budget to form the claim lease.
    #[serde(default = "default_lease_grace_ms")]
    pub lease_grace_ms: u64,
    /// Attempts at storing a successful unit before it counts as failed.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    #[serde(default = "default_persist_retry_delay_ms")]
    pub persist_retry_delay_ms: u64,
    #[serde(default = "default_max_variations")]
    pub max_variations: u32,
    #[serde(default)]
    pub terminal_policy: TerminalPolicy,
    #[serde(default = "default_cost_per_image")]
    pub cost_per_image: f64,
    #[serde(default = "default_cost_per_video")]
    pub cost_per_video: f64,
}

fn default_batch_size() -> usize {
    4
}

fn default_parallelism() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn default_jobs_per_run() -> usize {
    3
}

fn default_time_budget_ms() -> u64 {
    240_000
}

fn default_lease_grace_ms() -> u64 {
    60_000
}

fn default_persist_attempts() -> u32 {
    3
}

fn default_persist_retry_delay_ms() -> u64 {
    500
}

fn default_max_variations() -> u32 {
    8
}

fn default_cost_per_image() -> f64 {
    0.04
}

fn default_cost_per_video() -> f64 {
    0.50
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallelism: default_parallelism(),
            jobs_per_run: default_jobs_per_run(),
            time_budget_ms: default_time_budget_ms(),
            lease_grace_ms: default_lease_grace_ms(),
            persist_attempts: default_persist_attempts(),
            persist_retry_delay_ms: default_persist_retry_delay_ms(),
            max_variations: default_max_variations(),
            terminal_policy: TerminalPolicy::default(),
            cost_per_image: default_cost_per_image(),
            cost_per_video: default_cost_per_video(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_image_endpoint")]
    pub image: ProviderEndpoint,
    #[serde(default = "default_video_endpoint")]
    pub video: ProviderEndpoint,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Connection settings for one provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Long-running operations only.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Long-running operations only.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("MEDIAGEN_PROVIDER_API_KEY".to_string())
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_max_wait_secs() -> u64 {
    600
}

fn endpoint(model: &str) -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: default_base_url(),
        model: model.to_string(),
        api_key: None,
        api_key_file: None,
        api_key_env_var: default_api_key_env(),
        request_timeout_secs: default_request_timeout_secs(),
        poll_interval_ms: default_poll_interval_ms(),
        max_wait_secs: default_max_wait_secs(),
    }
}

fn default_image_endpoint() -> ProviderEndpoint {
    endpoint("gemini-2.5-flash-image")
}

fn default_video_endpoint() -> ProviderEndpoint {
    endpoint("veo-3.0-generate-001")
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        default_image_endpoint()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delays_ms")]
    pub delays_ms: Vec<u64>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delays_ms() -> Vec<u64> {
    vec![2_000, 5_000, 10_000]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delays_ms: default_delays_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativeConfig {
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_preview_width")]
    pub preview_width: u32,
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
    #[serde(default = "default_preview_quality")]
    pub preview_quality: u8,
    #[serde(default = "default_compress_quality")]
    pub compress_quality: u8,
    #[serde(default = "default_compress_threshold_bytes")]
    pub compress_threshold_bytes: usize,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

fn default_thumbnail_width() -> u32 {
    480
}

fn default_preview_width() -> u32 {
    1600
}

fn default_thumbnail_quality() -> u8 {
    75
}

fn default_preview_quality() -> u8 {
    82
}

fn default_compress_quality() -> u8 {
    90
}

fn default_compress_threshold_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_max_dimension() -> u32 {
    4096
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            thumbnail_width: default_thumbnail_width(),
            preview_width: default_preview_width(),
            thumbnail_quality: default_thumbnail_quality(),
            preview_quality: default_preview_quality(),
            compress_quality: default_compress_quality(),
            compress_threshold_bytes: default_compress_threshold_bytes(),
            max_dimension: default_max_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub worker_secret: Option<String>,
    #[serde(default)]
    pub worker_secret_file: Option<String>,
    #[serde(default = "default_worker_secret_env")]
    pub worker_secret_env_var: Option<String>,
    /// Header set by a trusted scheduler, e.g. `x-cloudscheduler`.
    #[serde(default)]
    pub scheduler_header: Option<String>,
    /// Required value of `scheduler_header`. Any value when unset.
    #[serde(default)]
    pub scheduler_header_value: Option<String>,
    /// Capacity of the follow-up dispatch queue.
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_worker_secret_env() -> Option<String> {
    Some("MEDIAGEN_WORKER_SECRET".to_string())
}

fn default_dispatch_queue() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            worker_secret: None,
            worker_secret_file: None,
            worker_secret_env_var: default_worker_secret_env(),
            scheduler_header: None,
            scheduler_header_value: None,
            dispatch_queue: default_dispatch_queue(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            storage: StorageConfig::default(),
            worker: WorkerConfig::default(),
            providers: ProvidersConfig {
                image: default_image_endpoint(),
                video: default_video_endpoint(),
                retry: RetryConfig::default(),
            },
            derivatives: DerivativeConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
