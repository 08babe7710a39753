//! Work Area Guard - backup/restore bracket around the shared directory
//!
//! The converter reads and writes a fixed directory as a side effect (not
//! through its arguments). Every job copies that directory aside before the
//! converter runs and puts the copy back afterwards, whatever the outcome.
//!
//! ```text
//!   work_dir ──backup()──▶ backups/<name>-<stamp>-<id>
//!      ▲                              │
//!      └──────────restore()───────────┘   (rename, copy as fallback)
//! ```

use chrono::{DateTime, Utc};
use dcc_foundation::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle to one backup of the work area. Consumed by a successful
/// [`WorkAreaGuard::restore`]; later restores are no-ops.
#[derive(Debug)]
pub struct Snapshot {
    id: Uuid,
    path: PathBuf,
    created_at: DateTime<Utc>,
    consumed: bool,
}

impl Snapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot-{}", &self.id.simple().to_string()[..8])
    }
}

/// Guards the shared work directory
#[derive(Debug, Clone)]
pub struct WorkAreaGuard {
    work_dir: PathBuf,
    backup_root: PathBuf,
}

impl WorkAreaGuard {
    pub fn new(work_dir: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Copy the work area to a fresh, timestamped snapshot directory.
    ///
    /// The work area itself is never modified here, so a failed backup leaves
    /// nothing to restore. A partially written snapshot is removed.
    pub fn backup(&self) -> Result<Snapshot> {
        if !self.work_dir.is_dir() {
            return Err(Error::Backup(format!(
                "work area {} does not exist",
                self.work_dir.display()
            )));
        }

        fs::create_dir_all(&self.backup_root).map_err(|e| {
            Error::Backup(format!(
                "cannot create {}: {}",
                self.backup_root.display(),
                e
            ))
        })?;

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let name = self
            .work_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "work".to_string());
        let path = self.backup_root.join(format!(
            "{}-{}-{}",
            name,
            created_at.format("%Y%m%d_%H%M%S"),
            &id.simple().to_string()[..8]
        ));

        if let Err(e) = copy_dir_all(&self.work_dir, &path) {
            let _ = fs::remove_dir_all(&path);
            return Err(Error::Backup(format!(
                "copy {} -> {}: {}",
                self.work_dir.display(),
                path.display(),
                e
            )));
        }

        let snapshot = Snapshot {
            id,
            path,
            created_at,
            consumed: false,
        };
        info!("Backed up {} to {}", self.work_dir.display(), snapshot);
        Ok(snapshot)
    }

    /// Replace the work area with the snapshot contents.
    ///
    /// Idempotent: a consumed snapshot is skipped. The snapshot is only
    /// discarded once the work area holds its contents, so a failed restore
    /// can be retried from the same handle.
    pub fn restore(&self, snapshot: &mut Snapshot) -> Result<()> {
        if snapshot.consumed {
            debug!("{} already restored", snapshot);
            return Ok(());
        }

        if !snapshot.path.is_dir() {
            snapshot.consumed = true;
            return Err(Error::Restore(format!(
                "{} is missing at {}",
                snapshot,
                snapshot.path.display()
            )));
        }

        remove_path(&self.work_dir).map_err(|e| {
            Error::Restore(format!("cannot clear {}: {}", self.work_dir.display(), e))
        })?;

        if let Some(parent) = self.work_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Restore(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        if fs::rename(&snapshot.path, &self.work_dir).is_err() {
            // rename fails across filesystems; copy and drop the snapshot after
            copy_dir_all(&snapshot.path, &self.work_dir).map_err(|e| {
                Error::Restore(format!(
                    "copy {} -> {}: {}",
                    snapshot.path.display(),
                    self.work_dir.display(),
                    e
                ))
            })?;
            if let Err(e) = fs::remove_dir_all(&snapshot.path) {
                warn!("Restored, but could not remove {}: {}", snapshot, e);
            }
        }

        snapshot.consumed = true;
        info!("Restored {} from {}", self.work_dir.display(), snapshot);
        Ok(())
    }

    /// Best-effort removal of everything inside a scratch directory. The
    /// directory itself is kept. Failures are logged.
    pub fn clean(&self, area: &Path) {
        let entries = match fs::read_dir(area) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Cannot list {}: {}", area.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if let Err(e) = remove_path(&path) {
                warn!("Cannot remove {}: {}", path.display(), e);
            }
        }
        debug!("Cleaned {}", area.display());
    }

    /// Snapshots left behind by jobs that never reached teardown
    pub fn stale_snapshots(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.backup_root) else {
            return Vec::new();
        };
        let mut stale: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        stale.sort();
        stale
    }
}

/// Remove a file or directory tree; missing paths are fine
fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursive copy; symlinks are recreated, not followed
fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_all(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}
