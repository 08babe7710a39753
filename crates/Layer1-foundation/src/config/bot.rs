//! Bot Config - runtime settings for the conversion service
//!
//! Stored as `.dccbot/config.json` under the service root. Every field has a
//! default, so a missing or partial file is fine.

use crate::config::limits::QuotaLimits;
use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside the project store
pub const BOT_CONFIG_FILE: &str = "config.json";

/// Maximum accepted artifact size (100 MiB)
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 100 * 1024 * 1024;

// ============================================================================
// Bot Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub quota: QuotaLimits,

    /// Maximum accepted input size in bytes
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Accepted input extensions, with leading dot
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Interval of the completion/cancellation polling loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hold a process-wide lock on the work area for a job's whole
    /// backup/run/restore bracket, so jobs of different users do not overlap
    #[serde(default = "default_true")]
    pub serialize_work_area: bool,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub converter: ConverterConfig,
}

fn default_version() -> u32 {
    1
}

fn default_max_input_bytes() -> u64 {
    DEFAULT_MAX_INPUT_BYTES
}

fn default_extensions() -> Vec<String> {
    vec![".apk".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            quota: QuotaLimits::default(),
            max_input_bytes: default_max_input_bytes(),
            allowed_extensions: default_extensions(),
            poll_interval_ms: default_poll_interval_ms(),
            serialize_work_area: true,
            paths: PathsConfig::default(),
            converter: ConverterConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load `<root>/.dccbot/config.json`, defaults when absent
    pub fn load(root: &Path) -> Result<Self> {
        let store = JsonStore::project(root);
        Ok(store
            .load_optional::<BotConfig>(BOT_CONFIG_FILE)?
            .unwrap_or_default())
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        JsonStore::project(root).save(BOT_CONFIG_FILE, self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.quota.owner_id = Some(owner_id.into());
        self
    }

    /// Resolve every relative path against `root`
    pub fn resolved(mut self, root: &Path) -> Self {
        self.paths = self.paths.resolve(root);
        self.converter = self.converter.resolve(root);
        self
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Directory layout of the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    /// Incoming artifacts
    #[serde(default = "default_downloads")]
    pub downloads: PathBuf,

    /// Converted artifacts awaiting delivery
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Shared directory the converter mutates as a side effect
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Scratch area cleaned after every job
    #[serde(default = "default_tmp")]
    pub tmp: PathBuf,

    /// Work-area snapshots
    #[serde(default = "default_backups")]
    pub backups: PathBuf,

    /// External tool binaries
    #[serde(default = "default_tools")]
    pub tools: PathBuf,

    /// Per-user conversion counters
    #[serde(default = "default_quota_file")]
    pub quota_file: PathBuf,
}

fn default_downloads() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_output() -> PathBuf {
    PathBuf::from("output")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("project").join("jni")
}

fn default_tmp() -> PathBuf {
    PathBuf::from(".tmp")
}

fn default_backups() -> PathBuf {
    PathBuf::from(".backups")
}

fn default_tools() -> PathBuf {
    PathBuf::from("tools")
}

fn default_quota_file() -> PathBuf {
    PathBuf::from("user_db.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            downloads: default_downloads(),
            output: default_output(),
            work_dir: default_work_dir(),
            tmp: default_tmp(),
            backups: default_backups(),
            tools: default_tools(),
            quota_file: default_quota_file(),
        }
    }
}

impl PathsConfig {
    /// All paths rooted at `root`; absolute entries are kept
    pub fn resolve(&self, root: &Path) -> Self {
        Self {
            downloads: root.join(&self.downloads),
            output: root.join(&self.output),
            work_dir: root.join(&self.work_dir),
            tmp: root.join(&self.tmp),
            backups: root.join(&self.backups),
            tools: root.join(&self.tools),
            quota_file: root.join(&self.quota_file),
        }
    }

    /// Directories the service expects to exist at startup
    pub fn required_dirs(&self) -> Vec<&Path> {
        vec![
            self.tmp.as_path(),
            self.downloads.as_path(),
            self.output.as_path(),
            self.work_dir.parent().unwrap_or(self.work_dir.as_path()),
            self.tools.as_path(),
        ]
    }
}

// ============================================================================
// Converter
// ============================================================================

/// How to invoke the external conversion tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterConfig {
    /// Program to execute
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the per-job arguments
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory of the tool; the work area lives below it
    #[serde(default = "default_cwd")]
    pub working_dir: PathBuf,

    #[serde(default = "default_custom_loader")]
    pub default_custom_loader: String,

    /// Filter file used when a job names none, or names a missing one
    #[serde(default = "default_filter_file")]
    pub default_filter_file: PathBuf,

    #[serde(default = "default_source_archive")]
    pub source_archive: PathBuf,

    /// Keep the generated project in this directory instead of a temp one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["dcc.py".to_string()]
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

fn default_custom_loader() -> String {
    "dcc.Dex2c.vaibhavsatpute".to_string()
}

fn default_filter_file() -> PathBuf {
    PathBuf::from("filter.txt")
}

fn default_source_archive() -> PathBuf {
    PathBuf::from("project-source.zip")
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: default_cwd(),
            default_custom_loader: default_custom_loader(),
            default_filter_file: default_filter_file(),
            source_archive: default_source_archive(),
            project_dir: None,
        }
    }
}

impl ConverterConfig {
    fn resolve(mut self, root: &Path) -> Self {
        self.working_dir = root.join(&self.working_dir);
        self.default_filter_file = root.join(&self.default_filter_file);
        self.source_archive = root.join(&self.source_archive);
        self.project_dir = self.project_dir.map(|p| root.join(p));
        self
    }
}
