//! Job definition and types

use crate::options::CaptionOptions;
use crate::state::JobState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Opaque submitter identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Shared cancellation flag. Set by `cancel`, read by the polling loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One admitted conversion
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,

    pub user_id: UserId,

    /// Artifact as received; removed at teardown
    pub input_path: PathBuf,

    /// Where the converter writes its result
    pub output_path: PathBuf,

    pub options: CaptionOptions,

    pub state: JobState,

    pub cancelled: CancelFlag,

    pub created_at: DateTime<Utc>,

    /// When the converter was dispatched
    pub started_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        user_id: UserId,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        options: CaptionOptions,
    ) -> Self {
        Self::with_id(
            JobId::new(),
            Utc::now(),
            user_id,
            input_path,
            output_path,
            options,
        )
    }

    /// Job with an id and admission time chosen by the caller, for when the
    /// output name is derived from them
    pub fn with_id(
        id: JobId,
        created_at: DateTime<Utc>,
        user_id: UserId,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        options: CaptionOptions,
    ) -> Self {
        Self {
            id,
            user_id,
            input_path: input_path.into(),
            output_path: output_path.into(),
            options,
            state: JobState::Admitted,
            cancelled: CancelFlag::new(),
            created_at,
            started_at: None,
        }
    }

    /// Mark job as running
    pub fn start(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Time since the converter was dispatched
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        Some((Utc::now() - start).to_std().unwrap_or_default())
    }
}

/// Per-job file names: `<user>_<YYYYmmdd_HHMMSS>`, made unique with the job id
/// so two submissions in the same second never collide.
pub fn artifact_stem(user_id: &UserId, job_id: JobId, at: DateTime<Utc>) -> String {
    let safe_user: String = user_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}_{}", safe_user, at.format("%Y%m%d_%H%M%S"), job_id)
}
