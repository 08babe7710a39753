//! # dcc-task
//!
//! Conversion job orchestration for dccbot.
//! Admits one job per user, enforces quotas, runs the blocking converter off
//! the async control context and guards the shared work area around it.
//!
//! ## Features
//!
//! - Admission control (single flight per user, quota, input validation)
//! - Persistent per-user conversion counters
//! - Backup/restore bracket around the converter's work area
//! - Cooperative cancellation with discard of late results
//! - **Exactly-once teardown on success, failure, cancellation and faults**

pub mod controller;
pub mod executor;
pub mod job;
pub mod options;
pub mod outcome;
pub mod quota;
pub mod runner;
pub mod state;
pub mod workarea;

// Orchestration
pub use controller::{ControllerConfig, JobController, JobHandle};
pub use job::{artifact_stem, CancelFlag, Job, JobId, UserId};
pub use outcome::{JobOutcome, OutcomeKind, OutputArtifact};
pub use state::{JobProgress, JobState, JobStatus};

// Conversion
pub use executor::{Converter, DccConverter};
pub use options::{CaptionOptions, ConversionOptions};
pub use runner::{ConversionResult, ConversionRunner};

// Persistent state
pub use quota::QuotaStore;
pub use workarea::{Snapshot, WorkAreaGuard};
