pub mod config;
pub mod db;
pub mod derivative;
pub mod error;
pub mod model;
pub mod provider;
pub mod repository;
pub mod retry;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use config::{apply_env_overrides, load_config, load_config_from_str, Config};
pub use derivative::{AssetBuilder, CompressionResult, Derivative};
pub use error::{AssetError, ConfigError, MediagenError, Result, StorageError};
pub use model::{GeneratedUnit, GenerationJob, JobCounters, JobStatus, MediaType, UnitParameters};
pub use provider::{ErrorKind, GenerationProvider, ProviderClient, ProviderError, ProviderRequest};
pub use repository::{Claim, JobRepository, RetryReset, SqliteJobRepository, UnitRecord};
pub use retry::RetrySchedule;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use storage::{LocalObjectStore, SignedUrl, StorageGateway, UrlSigner};
pub use worker::{
    JobDispatcher, JobOutcome, JobWorker, OutcomeKind, RunOptions, TerminalPolicy, WorkerError,
    WorkerSettings,
};
