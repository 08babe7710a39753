//! Job outcome - the single terminal report of a job

use crate::job::{JobId, UserId};
use dcc_foundation::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Converted file awaiting delivery.
///
/// The file is deleted when the artifact is dropped, unless it was moved out
/// with [`OutputArtifact::persist_to`] or released with
/// [`OutputArtifact::into_path`].
#[derive(Debug)]
pub struct OutputArtifact {
    path: PathBuf,
    armed: bool,
}

impl OutputArtifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to `dest`, replacing anything there
    pub fn persist_to(mut self, dest: impl AsRef<Path>) -> Result<PathBuf> {
        let dest = dest.as_ref();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if fs::rename(&self.path, dest).is_err() {
            fs::copy(&self.path, dest).map_err(|e| {
                Error::Storage(format!(
                    "cannot deliver {} to {}: {}",
                    self.path.display(),
                    dest.display(),
                    e
                ))
            })?;
            // the armed drop removes the source
            return Ok(dest.to_path_buf());
        }

        self.armed = false;
        Ok(dest.to_path_buf())
    }

    /// Keep the file where it is; the caller owns it from now on
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for OutputArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed delivered output {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot remove output {}: {}", self.path.display(), e),
        }
    }
}

/// How the job ended
#[derive(Debug)]
pub enum OutcomeKind {
    Succeeded {
        artifact: OutputArtifact,
        /// Conversions after this one
        count: u32,
        /// `None` for the owner
        limit: Option<u32>,
    },
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub user_id: UserId,
    pub kind: OutcomeKind,
    /// Non-fatal problems during teardown, e.g. a failed restore
    pub warnings: Vec<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, OutcomeKind::Cancelled)
    }

    pub fn artifact(&self) -> Option<&OutputArtifact> {
        match &self.kind {
            OutcomeKind::Succeeded { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    /// Take the artifact out of a successful outcome
    pub fn into_artifact(self) -> Option<OutputArtifact> {
        match self.kind {
            OutcomeKind::Succeeded { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    /// Human-readable report for the submitter
    pub fn message(&self) -> String {
        let mut message = match &self.kind {
            OutcomeKind::Succeeded { count, limit, .. } => {
                let limit = limit.map_or_else(|| "∞".to_string(), |l| l.to_string());
                format!(
                    "✅ Conversion successful!\n📊 Total conversions: {}/{}",
                    count, limit
                )
            }
            OutcomeKind::Failed(detail) => format!("❌ Conversion failed!\nError: {}", detail),
            OutcomeKind::Cancelled => "❌ Conversion cancelled!".to_string(),
        };

        for warning in &self.warnings {
            message.push_str("\n⚠️ ");
            message.push_str(warning);
        }
        message
    }
}
