//! Test harness wiring a `JobWorker` over real adapters.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tempfile::TempDir;

use chrono::{DateTime, Utc};

use mediagen::db::{Database, DatabaseError};
use mediagen::derivative::DerivativeSettings;
use mediagen::model::{GeneratedUnit, GenerationJob, JobCounters, JobStatus};
use mediagen::provider::{ProviderArtifact, ProviderRequest, ReferenceImage};
use mediagen::storage::SignedUrl;
use mediagen::worker::{ProgressEvent, ProgressReporter};
use mediagen::{
    AssetBuilder, Claim, ErrorKind, GenerationProvider, JobRepository, JobWorker,
    LocalObjectStore, ProviderClient, ProviderError, RetryReset, RetrySchedule,
    SqliteJobRepository, StorageError, StorageGateway, UnitRecord, UrlSigner, WorkerSettings,
};

use super::builders::png;

/// What the scripted provider does for one variation index.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Fails on every attempt.
    Fail(ErrorKind),
    /// Fails the first `n` attempts, then succeeds.
    FailTimes(ErrorKind, u32),
    /// Sleeps before succeeding.
    Slow(Duration),
}

/// Provider whose result is scripted per variation index. Unscripted
/// indices succeed with a small PNG (or fake MP4 bytes for video).
pub struct ScriptedProvider {
    name: &'static str,
    video: bool,
    default: Mutex<Behavior>,
    script: Mutex<HashMap<u32, Behavior>>,
    calls: Mutex<HashMap<u32, u32>>,
    total: AtomicU32,
    last_references: Mutex<Vec<ReferenceImage>>,
}

impl ScriptedProvider {
    pub fn image() -> Self {
        Self::new("scripted-image", false)
    }

    pub fn video() -> Self {
        Self::new("scripted-video", true)
    }

    fn new(name: &'static str, video: bool) -> Self {
        Self {
            name,
            video,
            default: Mutex::new(Behavior::Succeed),
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            total: AtomicU32::new(0),
            last_references: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, index: u32, behavior: Behavior) {
        self.script.lock().unwrap().insert(index, behavior);
    }

    pub fn set_default(&self, behavior: Behavior) {
        *self.default.lock().unwrap() = behavior;
    }

    pub fn clear_script(&self) {
        self.script.lock().unwrap().clear();
        *self.default.lock().unwrap() = Behavior::Succeed;
    }

    pub fn calls_for(&self, index: u32) -> u32 {
        self.calls.lock().unwrap().get(&index).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn last_references(&self) -> Vec<ReferenceImage> {
        self.last_references.lock().unwrap().clone()
    }

    fn artifact(&self) -> ProviderArtifact {
        if self.video {
            ProviderArtifact {
                bytes: b"\x00\x00\x00\x18ftypmp42 fake video".to_vec(),
                mime_type: "video/mp4".to_string(),
            }
        } else {
            ProviderArtifact {
                bytes: png(800, 600),
                mime_type: "image/png".to_string(),
            }
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderArtifact, ProviderError> {
        let index = request.variation_index;
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(index).or_insert(0);
            *n += 1;
            *n
        };
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.last_references.lock().unwrap() = request.references.clone();

        let behavior = self
            .script
            .lock()
            .unwrap()
            .get(&index)
            .cloned()
            .unwrap_or_else(|| self.default.lock().unwrap().clone());

        match behavior {
            Behavior::Succeed => Ok(self.artifact()),
            Behavior::Fail(kind) => Err(ProviderError::new(kind, format!("scripted failure #{}", index))),
            Behavior::FailTimes(kind, n) if attempt <= n => {
                Err(ProviderError::new(kind, format!("scripted failure #{} attempt {}", index, attempt)))
            }
            Behavior::FailTimes(..) => Ok(self.artifact()),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.artifact())
            }
        }
    }
}

/// Object store wrapper that can be told to reject uploads.
pub struct FlakyStore {
    inner: LocalObjectStore,
    fail_uploads: AtomicBool,
    upload_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: LocalObjectStore) -> Self {
        Self {
            inner,
            fail_uploads: AtomicBool::new(false),
            upload_attempts: AtomicU32::new(0),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn upload_attempts(&self) -> u32 {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> &Path {
        self.inner.root()
    }
}

#[async_trait]
impl StorageGateway for FlakyStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        // Let the original through so a failed unit leaves something to clean up.
        if self.fail_uploads.load(Ordering::SeqCst) && !path.ends_with(".png") {
            return Err(StorageError::Unavailable("scripted outage".to_string()));
        }
        self.inner.upload(path, bytes, content_type).await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.download(path).await
    }

    async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
        self.inner.delete(paths).await
    }

    async fn signed_urls(&self, paths: &[String], ttl: Duration) -> Result<Vec<SignedUrl>, StorageError> {
        self.inner.signed_urls(paths, ttl).await
    }
}

/// How `FlakyRepository::record_unit_success` misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFault {
    None,
    /// Every call errors without touching the database.
    AlwaysFail,
    /// The first call commits, then reports an error anyway.
    CommitThenFail,
    /// Like `CommitThenFail`, but later calls answer `Exhausted` without
    /// looking at the stored unit.
    CommitThenExhausted,
}

/// Repository wrapper that injects persistence faults around unit writes.
pub struct FlakyRepository {
    inner: Arc<SqliteJobRepository>,
    fault: Mutex<RecordFault>,
    fail_list_units: AtomicBool,
    record_calls: AtomicU32,
}

impl FlakyRepository {
    pub fn new(inner: Arc<SqliteJobRepository>) -> Self {
        Self {
            inner,
            fault: Mutex::new(RecordFault::None),
            fail_list_units: AtomicBool::new(false),
            record_calls: AtomicU32::new(0),
        }
    }

    pub fn set_fault(&self, fault: RecordFault) {
        *self.fault.lock().unwrap() = fault;
    }

    pub fn fail_list_units(&self, fail: bool) {
        self.fail_list_units.store(fail, Ordering::SeqCst);
    }

    pub fn record_calls(&self) -> u32 {
        self.record_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRepository for FlakyRepository {
    async fn insert_job(&self, job: &GenerationJob) -> Result<(), DatabaseError> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<GenerationJob>, DatabaseError> {
        self.inner.get_job(job_id).await
    }

    async fn list_due_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<GenerationJob>, DatabaseError> {
        self.inner.list_due_jobs(limit, now).await
    }

    async fn claim_job(&self, claim: &Claim, lease_until: DateTime<Utc>) -> Result<bool, DatabaseError> {
        self.inner.claim_job(claim, lease_until).await
    }

    async fn existing_variation_indices(&self, job_id: &str) -> Result<Vec<u32>, DatabaseError> {
        self.inner.existing_variation_indices(job_id).await
    }

    async fn record_unit_success(
        &self,
        claim: &Claim,
        unit: &GeneratedUnit,
    ) -> Result<UnitRecord, DatabaseError> {
        let call = self.record_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fault = *self.fault.lock().unwrap();
        match fault {
            RecordFault::None => self.inner.record_unit_success(claim, unit).await,
            RecordFault::AlwaysFail => Err(DatabaseError::Unavailable("scripted outage".to_string())),
            RecordFault::CommitThenFail | RecordFault::CommitThenExhausted if call == 1 => {
                self.inner.record_unit_success(claim, unit).await?;
                Err(DatabaseError::Task("acknowledgement lost".to_string()))
            }
            RecordFault::CommitThenExhausted => Ok(UnitRecord::Exhausted),
            RecordFault::CommitThenFail => self.inner.record_unit_success(claim, unit).await,
        }
    }

    async fn record_unit_failure(&self, claim: &Claim, message: &str) -> Result<UnitRecord, DatabaseError> {
        self.inner.record_unit_failure(claim, message).await
    }

    async fn checkpoint(
        &self,
        claim: &Claim,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<JobCounters>, DatabaseError> {
        self.inner.checkpoint(claim, lease_until).await
    }

    async fn finalize_job(&self, claim: &Claim, status: JobStatus) -> Result<bool, DatabaseError> {
        self.inner.finalize_job(claim, status).await
    }

    async fn fail_job(&self, claim: &Claim, message: &str) -> Result<bool, DatabaseError> {
        self.inner.fail_job(claim, message).await
    }

    async fn release_claim(&self, claim: &Claim) -> Result<bool, DatabaseError> {
        self.inner.release_claim(claim).await
    }

    async fn reset_for_retry(&self, job_id: &str) -> Result<RetryReset, DatabaseError> {
        self.inner.reset_for_retry(job_id).await
    }

    async fn list_units(&self, job_id: &str) -> Result<Vec<GeneratedUnit>, DatabaseError> {
        if self.fail_list_units.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("scripted read failure".to_string()));
        }
        self.inner.list_units(job_id).await
    }
}

/// Records every progress event and checks the counter invariant on each.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
    violations: AtomicU32,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn count(&self, pred: impl Fn(&ProgressEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        let counters = match &event {
            ProgressEvent::Claimed { counters, .. }
            | ProgressEvent::UnitSucceeded { counters, .. }
            | ProgressEvent::Checkpoint { counters, .. }
            | ProgressEvent::Yielded { counters, .. }
            | ProgressEvent::Finalized { counters, .. } => Some(*counters),
            ProgressEvent::UnitFailed { counters, .. } => *counters,
        };
        if counters.is_some_and(|c| !c.is_consistent()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.events.lock().unwrap().push(event);
    }
}

/// A worker over an in-memory SQLite repository and a temp-dir object
/// store, with scripted providers.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub repo: Arc<SqliteJobRepository>,
    /// What the worker talks to; wraps `repo`.
    pub faults: Arc<FlakyRepository>,
    pub store: Arc<FlakyStore>,
    pub image: Arc<ScriptedProvider>,
    pub video: Arc<ScriptedProvider>,
    pub progress: Arc<RecordingProgress>,
    pub settings: WorkerSettings,
    pub retry: RetrySchedule,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let repo = SqliteJobRepository::new(Database::open_in_memory().expect("open database"));
        let signer = UrlSigner::new(
            SecretString::from("harness-signing-key".to_string()),
            "http://127.0.0.1:8080",
        )
        .expect("signer");
        let store = LocalObjectStore::new(temp_dir.path().join("objects"), signer);

        let settings = WorkerSettings {
            persist_attempts: 2,
            persist_retry_delay: Duration::ZERO,
            ..WorkerSettings::default()
        };

        let repo = Arc::new(repo);

        Self {
            temp_dir,
            faults: Arc::new(FlakyRepository::new(repo.clone())),
            repo,
            store: Arc::new(FlakyStore::new(store)),
            image: Arc::new(ScriptedProvider::image()),
            video: Arc::new(ScriptedProvider::video()),
            progress: Arc::new(RecordingProgress::default()),
            settings,
            retry: RetrySchedule::fixed(2, Duration::from_millis(1)),
        }
    }

    pub fn with_settings(mut self, f: impl FnOnce(&mut WorkerSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a fresh worker sharing this harness's adapters.
    pub fn worker(&self) -> JobWorker {
        let provider = ProviderClient::new(
            self.image.clone(),
            self.video.clone(),
            self.retry.clone(),
        );
        JobWorker::new(
            self.faults.clone(),
            self.store.clone(),
            provider,
            AssetBuilder::new(DerivativeSettings::default()),
            self.settings.clone(),
        )
        .with_progress(self.progress.clone())
    }

    pub async fn insert(&self, job: &GenerationJob) {
        self.repo.insert_job(job).await.expect("insert job");
    }

    pub async fn job(&self, id: &str) -> GenerationJob {
        self.repo.get_job(id).await.expect("get job").expect("job exists")
    }

    pub async fn units(&self, id: &str) -> Vec<GeneratedUnit> {
        self.repo.list_units(id).await.expect("list units")
    }

    pub async fn indices(&self, id: &str) -> Vec<u32> {
        let mut indices: Vec<u32> = self.units(id).await.iter().map(|u| u.variation_index).collect();
        indices.sort_unstable();
        indices
    }

    pub fn objects_root(&self) -> PathBuf {
        self.store.root().to_path_buf()
    }

    /// Relative paths of every file under the object root.
    pub fn stored_files(&self) -> Vec<String> {
        let root = self.objects_root();
        let mut files = Vec::new();
        collect_files(&root, &root, &mut files);
        files.sort();
        files
    }

    /// Uploads a fixture directly into the object store.
    pub async fn put_object(&self, path: &str, bytes: Vec<u8>, content_type: &str) {
        self.store
            .upload(path, bytes, content_type)
            .await
            .expect("upload fixture");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}
