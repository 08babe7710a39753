//! Job state machine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Possible states of a job.
///
/// `Admitted -> Running -> {Succeeded, Failed, Cancelled}`. A job leaves the
/// registry as soon as it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Passed admission, waiting for the work area
    Admitted,

    /// Work area backed up, converter dispatched
    Running,

    /// Converter produced an output artifact
    Succeeded(PathBuf),

    /// Conversion or orchestration failed
    Failed(String),

    /// Cancelled before the converter reported back
    Cancelled,
}

impl JobState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded(_) | JobState::Failed(_) | JobState::Cancelled
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded(_))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobState::Admitted => "Admitted",
            JobState::Running => "Running",
            JobState::Succeeded(_) => "Succeeded",
            JobState::Failed(_) => "Failed",
            JobState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Progress of a pending job, as reported to the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobProgress {
    /// Waiting for another job to release the work area
    Queued,
    BackingUp,
    Converting,
    /// Converter finished, restoring the work area
    Finishing,
}

impl JobProgress {
    pub fn message(&self) -> &'static str {
        match self {
            JobProgress::Queued => "⏳ Waiting for the work area...",
            JobProgress::BackingUp => "💾 Backing up work area...",
            JobProgress::Converting => "🔄 Converting APK...",
            JobProgress::Finishing => "🧹 Finishing up...",
        }
    }
}

/// Pollable status of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending(JobProgress),
    Succeeded(PathBuf),
    Failed(String),
    Cancelled,
}

impl JobStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Pending(_))
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}
