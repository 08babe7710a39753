//! Job Controller - admission, lifecycle and teardown of conversion jobs
//!
//! ```text
//!   submit ──▶ Admitted ──(work area lock)──▶ backup ──▶ Running ──poll──┐
//!                 │                                                      │
//!                 └──────────── cancel flag / result / fault ◀───────────┘
//!                                         │
//!                                         ▼
//!                  teardown (exactly once): restore, clean, delete input,
//!                  count on success, leave registry, publish outcome
//! ```
//!
//! Admission is synchronous. Membership and quota are checked under the
//! registry lock, the input file is inspected without it, and membership is
//! checked again in the same critical section that inserts the job, so two
//! submissions of one user can never both pass. Everything after admission
//! runs on a driver task. The driver never blocks: backups and the converter
//! itself run on the blocking pool, and the driver polls the converter's
//! result channel and the job's cancel flag at a fixed interval.
//!
//! A job cancelled mid-conversion ends at once, but the work area stays
//! locked until the converter returns. That tail runs on the blocking pool
//! and is tracked; [`JobController::shutdown`] waits for it.

use crate::executor::Converter;
use crate::job::{artifact_stem, Job, JobId, UserId};
use crate::options::{CaptionOptions, ConversionOptions};
use crate::outcome::{JobOutcome, OutcomeKind, OutputArtifact};
use crate::quota::QuotaStore;
use crate::runner::{panic_message, ConversionResult, ConversionRunner};
use crate::state::{JobProgress, JobState, JobStatus};
use crate::workarea::{Snapshot, WorkAreaGuard};
use chrono::Utc;
use dcc_foundation::{truncate_detail, BotConfig, ConverterConfig, Error, QuotaCheck, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Detail reported for faults inside the orchestrator itself
const INTERNAL_ERROR: &str = "Internal error";

/// Configuration for the job controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Largest accepted input, in bytes
    pub max_input_bytes: u64,

    /// Accepted input extensions, with leading dot
    pub allowed_extensions: Vec<String>,

    /// Interval of the result/cancel polling loop
    pub poll_interval: Duration,

    /// Run at most one job at a time against the work area
    pub serialize_work_area: bool,

    pub downloads_dir: PathBuf,

    pub output_dir: PathBuf,

    /// Scratch area cleaned after every job
    pub tmp_dir: PathBuf,

    pub converter: ConverterConfig,
}

impl ControllerConfig {
    /// Take settings from a bot config. Paths are used as given, so resolve
    /// the config against the service root first.
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            max_input_bytes: config.max_input_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
            poll_interval: config.poll_interval(),
            serialize_work_area: config.serialize_work_area,
            downloads_dir: config.paths.downloads.clone(),
            output_dir: config.paths.output.clone(),
            tmp_dir: config.paths.tmp.clone(),
            converter: config.converter.clone(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_bot_config(&BotConfig::default())
    }
}

/// Handle returned by [`JobController::submit`]
pub struct JobHandle {
    job_id: JobId,
    user_id: UserId,
    status: watch::Receiver<JobStatus>,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Current status, without waiting
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Wait for the next status change. `None` once no further updates will
    /// arrive.
    pub async fn changed(&mut self) -> Option<JobStatus> {
        self.status.changed().await.ok()?;
        Some(self.status.borrow_and_update().clone())
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> JobOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome {
                job_id: self.job_id,
                user_id: self.user_id,
                kind: OutcomeKind::Failed(INTERNAL_ERROR.to_string()),
                warnings: Vec::new(),
            },
        }
    }
}

/// Job Controller - the single owner of in-flight jobs
#[derive(Clone)]
pub struct JobController {
    /// Active jobs; membership is the single-flight gate
    jobs: Arc<Mutex<HashMap<UserId, Job>>>,

    quota: Arc<QuotaStore>,

    work_area: WorkAreaGuard,

    runner: ConversionRunner,

    /// Held from backup until restore when work-area serialization is on
    work_lock: Option<Arc<tokio::sync::Mutex<()>>>,

    /// Restores waiting on converters of cancelled jobs
    reapers: Arc<Mutex<Vec<JoinHandle<()>>>>,

    config: Arc<ControllerConfig>,
}

impl JobController {
    pub fn new(
        config: ControllerConfig,
        quota: Arc<QuotaStore>,
        work_area: WorkAreaGuard,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let work_lock = config
            .serialize_work_area
            .then(|| Arc::new(tokio::sync::Mutex::new(())));

        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            quota,
            work_area,
            runner: ConversionRunner::new(converter),
            work_lock,
            reapers: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(config),
        }
    }

    /// Wire a controller from a resolved bot config, loading the quota file
    pub fn from_bot_config(config: &BotConfig, converter: Arc<dyn Converter>) -> Self {
        let quota = Arc::new(QuotaStore::open(
            &config.paths.quota_file,
            config.quota.clone(),
        ));
        let work_area = WorkAreaGuard::new(&config.paths.work_dir, &config.paths.backups);
        Self::new(
            ControllerConfig::from_bot_config(config),
            quota,
            work_area,
            converter,
        )
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn quota(&self) -> &Arc<QuotaStore> {
        &self.quota
    }

    pub fn work_area(&self) -> &WorkAreaGuard {
        &self.work_area
    }

    /// Fresh location under the downloads directory for an incoming file.
    /// The extension of `original` is kept so admission can judge it.
    pub fn staging_path(&self, user_id: &UserId, original: &Path) -> PathBuf {
        let mut path = self
            .config
            .downloads_dir
            .join(artifact_stem(user_id, JobId::new(), Utc::now()));
        if let Some(extension) = original.extension() {
            path.set_extension(extension);
        }
        path
    }

    /// Admit a conversion and start it.
    ///
    /// Checks run in order: an active job for the user (`AlreadyRunning`),
    /// the quota (`QuotaExceeded`), then the input file and caption
    /// (`InvalidInput`). The file is inspected outside the registry lock; a
    /// job of the same user admitted in the meantime still wins. A rejected
    /// submission creates no job and leaves the input alone; an admitted job
    /// owns the input and deletes it at teardown.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        user_id: impl Into<UserId>,
        input_path: impl Into<PathBuf>,
        caption: &str,
    ) -> Result<JobHandle> {
        let user_id = user_id.into();
        let input_path = input_path.into();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("submit requires a Tokio runtime".to_string()))?;

        self.check_admission(&self.jobs.lock(), &user_id)?;

        self.validate_input(&input_path)?;
        let options = CaptionOptions::parse(caption);
        options.validate()?;

        let job_id = JobId::new();
        let created_at = Utc::now();
        let output_path = self.config.output_dir.join(format!(
            "{}_converted.apk",
            artifact_stem(&user_id, job_id, created_at)
        ));
        let job = Job::with_id(
            job_id,
            created_at,
            user_id.clone(),
            input_path,
            output_path,
            options,
        );
        let conversion =
            ConversionOptions::resolve(&job.options, &job.output_path, &self.config.converter);

        {
            let mut jobs = self.jobs.lock();
            self.check_admission(&jobs, &user_id)?;
            jobs.insert(user_id.clone(), job.clone());
        }

        let (status_tx, status_rx) = watch::channel(JobStatus::Pending(JobProgress::Queued));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        info!(
            "Admitted job {} for user {} ({})",
            job.id,
            user_id,
            job.input_path.display()
        );

        let handle = JobHandle {
            job_id: job.id,
            user_id,
            status: status_rx,
            outcome: outcome_rx,
        };

        let run = JobRun {
            controller: self.clone(),
            job,
            conversion,
            snapshot: None,
            work_lock: None,
            pending: None,
            status_tx,
            outcome_tx: Some(outcome_tx),
            finished: false,
        };
        runtime.spawn(drive(run));

        Ok(handle)
    }

    /// Current status of a submitted job
    pub fn poll(&self, handle: &JobHandle) -> JobStatus {
        handle.status()
    }

    /// Request cancellation of the user's active job. Returns immediately;
    /// the job is torn down at its next poll.
    pub fn cancel(&self, user_id: &UserId) -> Result<()> {
        let jobs = self.jobs.lock();
        match jobs.get(user_id) {
            Some(job) => {
                job.cancelled.cancel();
                info!("Cancellation requested for job {} of user {}", job.id, user_id);
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "no conversion in progress for user {}",
                user_id
            ))),
        }
    }

    pub fn remaining(&self, user_id: &UserId) -> QuotaCheck {
        self.quota.remaining(user_id)
    }

    /// Snapshot of the user's active job
    pub fn get(&self, user_id: &UserId) -> Option<Job> {
        self.jobs.lock().get(user_id).cloned()
    }

    pub fn is_active(&self, user_id: &UserId) -> bool {
        self.jobs.lock().contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Wait until every converter left running by a cancelled job has
    /// returned and its work area has been restored. Call before exiting.
    pub async fn shutdown(&self) {
        loop {
            let reapers = std::mem::take(&mut *self.reapers.lock());
            if reapers.is_empty() {
                return;
            }
            info!("Waiting for {} cancelled conversion(s) to stop", reapers.len());
            for reaper in reapers {
                if let Err(e) = reaper.await {
                    error!("Work area release task failed: {}", e);
                }
            }
        }
    }

    fn track_reaper(&self, reaper: JoinHandle<()>) {
        let mut reapers = self.reapers.lock();
        reapers.retain(|r| !r.is_finished());
        reapers.push(reaper);
    }

    /// Single-flight and quota checks, in that order
    fn check_admission(&self, jobs: &HashMap<UserId, Job>, user_id: &UserId) -> Result<()> {
        if jobs.contains_key(user_id) {
            info!("Rejected submission from {}: already processing", user_id);
            return Err(Error::AlreadyRunning(user_id.to_string()));
        }

        if !self.quota.remaining(user_id).allowed {
            let limit = self.quota.limit_for(user_id).unwrap_or_default();
            info!("Rejected submission from {}: limit of {} reached", user_id, limit);
            return Err(Error::quota_exceeded(user_id.as_str(), limit));
        }

        Ok(())
    }

    fn validate_input(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e));
        let accepted = extension.as_deref().is_some_and(|ext| {
            self.config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        });
        if !accepted {
            return Err(Error::InvalidInput("Please send an APK file!".to_string()));
        }

        let metadata = fs::metadata(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if metadata.len() > self.config.max_input_bytes {
            return Err(Error::InvalidInput(format!(
                "File too large! Maximum size is {}MB",
                self.config.max_input_bytes / (1024 * 1024)
            )));
        }

        Ok(())
    }

    fn update_state(&self, job: &Job) {
        let mut jobs = self.jobs.lock();
        if let Some(active) = jobs.get_mut(&job.user_id).filter(|j| j.id == job.id) {
            active.state = job.state.clone();
            active.started_at = job.started_at;
        }
    }
}

/// How the driver left a job
enum Ending {
    Converted(PathBuf),
    Failed(String),
    Cancelled,
}

/// Everything one job owns between admission and teardown.
///
/// [`JobRun::finish`] is the teardown. It runs once, either from the driver
/// or from `Drop` if the driver task is torn down before reaching it.
struct JobRun {
    controller: JobController,
    job: Job,
    conversion: ConversionOptions,
    snapshot: Option<Snapshot>,
    work_lock: Option<OwnedMutexGuard<()>>,
    /// Converter result still outstanding
    pending: Option<oneshot::Receiver<ConversionResult>>,
    status_tx: watch::Sender<JobStatus>,
    outcome_tx: Option<oneshot::Sender<JobOutcome>>,
    finished: bool,
}

async fn drive(mut run: JobRun) {
    let result = AssertUnwindSafe(run.execute()).catch_unwind().await;
    let ending = match result {
        Ok(Ok(ending)) => ending,
        Ok(Err(Error::Cancelled)) => Ending::Cancelled,
        Ok(Err(e)) => {
            warn!("Job {} failed: {}", run.job.id, e);
            Ending::Failed(failure_detail(&e))
        }
        Err(payload) => {
            error!(
                "Job {} faulted: {}",
                run.job.id,
                panic_message(payload.as_ref())
            );
            Ending::Failed(INTERNAL_ERROR.to_string())
        }
    };
    run.finish(ending);
}

/// Detail shown to the submitter, at most 200 characters
fn failure_detail(error: &Error) -> String {
    match error {
        Error::Conversion(detail) => truncate_detail(detail),
        Error::Internal(_) => INTERNAL_ERROR.to_string(),
        other => truncate_detail(&other.to_string()),
    }
}

impl JobRun {
    async fn execute(&mut self) -> Result<Ending> {
        self.acquire_work_area().await?;
        self.check_cancelled()?;

        self.publish(JobProgress::BackingUp);
        let work_area = self.controller.work_area.clone();
        let snapshot = tokio::task::spawn_blocking(move || work_area.backup())
            .await
            .map_err(|e| Error::Internal(format!("backup task failed: {}", e)))??;
        self.snapshot = Some(snapshot);
        self.check_cancelled()?;

        self.job.start();
        self.controller.update_state(&self.job);
        self.publish(JobProgress::Converting);
        info!(
            "Job {} converting with {}",
            self.job.id,
            self.controller.runner.converter_name()
        );

        self.pending = Some(
            self.controller
                .runner
                .spawn(self.job.input_path.clone(), self.conversion.clone()),
        );

        let mut ticker = tokio::time::interval(self.controller.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // cancellation wins over a result that is already waiting
            if self.job.is_cancelled() {
                info!("Job {} cancelled while converting", self.job.id);
                return Ok(Ending::Cancelled);
            }

            let Some(pending) = self.pending.as_mut() else {
                return Err(Error::Internal("result channel missing".to_string()));
            };
            match pending.try_recv() {
                Ok(result) => {
                    self.pending = None;
                    self.publish(JobProgress::Finishing);
                    return match result {
                        ConversionResult::Ok(path) => Ok(Ending::Converted(path)),
                        ConversionResult::Failed(detail) => Err(Error::Conversion(detail)),
                    };
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    self.pending = None;
                    return Err(Error::Internal(
                        "converter worker exited without a result".to_string(),
                    ));
                }
            }
        }
    }

    /// Wait for exclusive use of the work area. The job stays cancellable
    /// while it waits.
    async fn acquire_work_area(&mut self) -> Result<()> {
        let Some(lock) = self.controller.work_lock.clone() else {
            return Ok(());
        };

        if let Ok(guard) = Arc::clone(&lock).try_lock_owned() {
            self.work_lock = Some(guard);
            return Ok(());
        }

        debug!("Job {} queued for the work area", self.job.id);
        let acquire = lock.lock_owned();
        tokio::pin!(acquire);
        let mut ticker = tokio::time::interval(self.controller.config.poll_interval);

        loop {
            tokio::select! {
                guard = &mut acquire => {
                    self.work_lock = Some(guard);
                    return Ok(());
                }
                _ = ticker.tick() => self.check_cancelled()?,
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.job.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn publish(&self, progress: JobProgress) {
        debug!("Job {}: {:?}", self.job.id, progress);
        self.status_tx.send_replace(JobStatus::Pending(progress));
    }

    fn finish(&mut self, ending: Ending) {
        if self.finished {
            return;
        }
        self.finished = true;

        let controller = self.controller.clone();
        let user_id = self.job.user_id.clone();
        let mut warnings = Vec::new();

        let mut release = WorkAreaRelease {
            work_area: controller.work_area.clone(),
            snapshot: self.snapshot.take(),
            work_lock: self.work_lock.take(),
            tmp_dir: controller.config.tmp_dir.clone(),
            released: false,
        };

        match (self.pending.take(), tokio::runtime::Handle::try_current()) {
            (Some(pending), Ok(runtime)) => {
                // the converter is still running against the work area: keep
                // it locked, and restore once the late result is in. Runtime
                // shutdown waits for blocking tasks, so this is never cut short.
                let output = self.job.output_path.clone();
                let job_id = self.job.id;
                let reaper = runtime.spawn_blocking(move || {
                    let _ = pending.blocking_recv();
                    debug!("Discarding late result of job {}", job_id);
                    remove_file_logged(&output);
                    release.release();
                });
                controller.track_reaper(reaper);
            }
            _ => warnings.extend(release.release()),
        }

        remove_file_logged(&self.job.input_path);

        let (state, status, kind) = match ending {
            Ending::Converted(path) => {
                let count = match controller.quota.increment(&user_id) {
                    Ok(count) => count,
                    Err(e) => {
                        warn!("Conversion count for {} not saved: {}", user_id, e);
                        warnings.push(format!("Conversion count was not saved: {}", e));
                        controller.quota.get_count(&user_id)
                    }
                };
                let limit = controller.quota.limit_for(&user_id);
                info!(
                    "Job {} succeeded for {} ({} conversions)",
                    self.job.id, user_id, count
                );
                (
                    JobState::Succeeded(path.clone()),
                    JobStatus::Succeeded(path.clone()),
                    OutcomeKind::Succeeded {
                        artifact: OutputArtifact::new(path),
                        count,
                        limit,
                    },
                )
            }
            Ending::Failed(detail) => {
                remove_file_logged(&self.job.output_path);
                info!("Job {} failed for {}: {}", self.job.id, user_id, detail);
                (
                    JobState::Failed(detail.clone()),
                    JobStatus::Failed(detail.clone()),
                    OutcomeKind::Failed(detail),
                )
            }
            Ending::Cancelled => {
                remove_file_logged(&self.job.output_path);
                info!("Job {} cancelled for {}", self.job.id, user_id);
                (JobState::Cancelled, JobStatus::Cancelled, OutcomeKind::Cancelled)
            }
        };

        {
            let mut jobs = controller.jobs.lock();
            if jobs.get(&user_id).is_some_and(|j| j.id == self.job.id) {
                jobs.remove(&user_id);
            }
        }

        self.job.state = state;
        self.status_tx.send_replace(status);

        let outcome = JobOutcome {
            job_id: self.job.id,
            user_id,
            kind,
            warnings,
        };
        if let Some(tx) = self.outcome_tx.take() {
            if tx.send(outcome).is_err() {
                debug!("Outcome of job {} was not collected", self.job.id);
            }
        }
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Job {} dropped before teardown", self.job.id);
            self.finish(Ending::Failed(INTERNAL_ERROR.to_string()));
        }
    }
}

/// Restore + clean + unlock, once. Runs on drop if never called.
struct WorkAreaRelease {
    work_area: WorkAreaGuard,
    snapshot: Option<Snapshot>,
    work_lock: Option<OwnedMutexGuard<()>>,
    tmp_dir: PathBuf,
    released: bool,
}

impl WorkAreaRelease {
    /// Returns a warning when the restore failed
    fn release(&mut self) -> Option<String> {
        if self.released {
            return None;
        }
        self.released = true;

        let warning = match self.snapshot.as_mut() {
            Some(snapshot) => self.work_area.restore(snapshot).err().map(|e| {
                warn!("{}", e);
                e.to_string()
            }),
            None => None,
        };
        self.work_area.clean(&self.tmp_dir);
        self.work_lock.take();
        warning
    }
}

impl Drop for WorkAreaRelease {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
    }
}
