use std::sync::Arc;
use std::time::Duration;

use mediagen::config::Config;
use mediagen::provider::{HttpImageProvider, HttpVideoProvider};
use mediagen::repository::open_sqlite;
use mediagen::{
    resolve_secret, AssetBuilder, JobDispatcher, JobWorker, LocalObjectStore, ProviderClient,
    RunOptions, UrlSigner, WorkerSettings,
};
use tracing::{info, warn};

use crate::auth::AuthConfig;
use crate::error::ServerError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<JobWorker>,
    pub dispatcher: Arc<JobDispatcher>,
    pub signer: Arc<UrlSigner>,
    pub auth: Arc<AuthConfig>,
    /// Defaults for trigger requests; query parameters override them.
    pub run_options: RunOptions,
    pub jobs_per_run: usize,
    pub signed_url_ttl: Duration,
}

impl AppState {
    /// Wires the concrete adapters described by `config`. Starts the
    /// dispatcher, so this must run inside the tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let db_path = config.database_path();
        let repo = open_sqlite(db_path.as_deref())?;
        info!(path = ?db_path, "job database opened");

        let signing_secret = resolve_secret(
            config.storage.signing_secret.as_deref(),
            config.storage.signing_secret_file.as_deref(),
            config.storage.signing_secret_env_var.as_deref(),
        )?;
        let signer = UrlSigner::new(signing_secret, &config.storage.public_base_url)?;
        let store = LocalObjectStore::new(&config.storage.root, signer.clone());
        info!(root = %config.storage.root, "local object store ready");

        let image = &config.providers.image;
        let image_key = resolve_secret(
            image.api_key.as_deref(),
            image.api_key_file.as_deref(),
            image.api_key_env_var.as_deref(),
        )?;
        let image_provider = HttpImageProvider::new(
            image.base_url.clone(),
            image_key,
            Duration::from_secs(image.request_timeout_secs),
        )?;

        let video = &config.providers.video;
        let video_key = resolve_secret(
            video.api_key.as_deref(),
            video.api_key_file.as_deref(),
            video.api_key_env_var.as_deref(),
        )?;
        let video_provider = HttpVideoProvider::new(
            video.base_url.clone(),
            video_key,
            Duration::from_secs(video.request_timeout_secs),
            Duration::from_millis(video.poll_interval_ms),
            Duration::from_secs(video.max_wait_secs),
        )?;

        let provider = ProviderClient::new(
            Arc::new(image_provider),
            Arc::new(video_provider),
            config.providers.retry.schedule(),
        );

        let worker = Arc::new(JobWorker::new(
            Arc::new(repo),
            Arc::new(store),
            provider,
            AssetBuilder::new(config.derivatives.settings()),
            WorkerSettings::from_config(config),
        ));

        let auth = AuthConfig::from_config(&config.server)?;
        if !auth.is_configured() {
            warn!("no worker secret or scheduler header configured; trigger routes will reject every request");
        }

        let dispatcher = Arc::new(JobDispatcher::spawn(
            Arc::clone(&worker),
            config.server.dispatch_queue,
        ));

        Ok(Self {
            worker,
            dispatcher,
            signer: Arc::new(signer),
            auth: Arc::new(auth),
            run_options: RunOptions::from_config(config),
            jobs_per_run: config.worker.jobs_per_run,
            signed_url_ttl: Duration::from_secs(config.storage.signed_url_ttl_secs),
        })
    }
}
