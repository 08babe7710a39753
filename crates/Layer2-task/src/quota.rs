//! Quota Store - persistent per-user conversion counters
//!
//! Counters live in memory and are written out as one JSON object
//! (`{"<user>": <count>}`) after every change. Loading never fails: a missing
//! or unreadable file starts the store empty.

use crate::job::UserId;
use dcc_foundation::{JsonStore, QuotaCheck, QuotaLimits, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct QuotaStore {
    store: JsonStore,
    filename: String,
    limits: QuotaLimits,
    counts: RwLock<HashMap<String, u32>>,
    /// Serializes increment + persist across users
    write_lock: Mutex<()>,
}

impl QuotaStore {
    /// Create an empty store backed by `path`. Call [`QuotaStore::load`] to
    /// read persisted counters.
    pub fn new(path: impl AsRef<Path>, limits: QuotaLimits) -> Self {
        let path = path.as_ref();
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "user_db.json".to_string());

        Self {
            store: JsonStore::new(dir),
            filename,
            limits,
            counts: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Create and load in one step
    pub fn open(path: impl AsRef<Path>, limits: QuotaLimits) -> Self {
        let store = Self::new(path, limits);
        store.load();
        store
    }

    pub fn path(&self) -> PathBuf {
        self.store.file_path(&self.filename)
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Populate counters from disk; resets to empty on any failure
    pub fn load(&self) {
        let loaded = match self.store.load_optional::<HashMap<String, u32>>(&self.filename) {
            Ok(Some(counts)) => counts,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Quota file unreadable, starting empty: {}", e);
                HashMap::new()
            }
        };

        debug!("Loaded quota counters for {} users", loaded.len());
        *self.counts.write() = loaded;
    }

    pub fn get_count(&self, user_id: &UserId) -> u32 {
        self.counts
            .read()
            .get(user_id.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Whether the user may start another conversion, and how many remain
    pub fn remaining(&self, user_id: &UserId) -> QuotaCheck {
        self.limits
            .check(user_id.as_str(), self.get_count(user_id))
    }

    /// Limit applying to the user, `None` for the owner
    pub fn limit_for(&self, user_id: &UserId) -> Option<u32> {
        self.limits.limit_for(user_id.as_str())
    }

    /// Count one successful conversion and persist all counters.
    ///
    /// The in-memory count is updated even if persisting fails.
    pub fn increment(&self, user_id: &UserId) -> Result<u32> {
        let _guard = self.write_lock.lock();

        let (count, snapshot) = {
            let mut counts = self.counts.write();
            let entry = counts.entry(user_id.as_str().to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            (*entry, counts.clone())
        };

        self.store.save(&self.filename, &snapshot)?;
        debug!("User {} conversion count is now {}", user_id, count);
        Ok(count)
    }

    /// Administrative reset of one user's counter
    pub fn reset(&self, user_id: &UserId) -> Result<()> {
        let _guard = self.write_lock.lock();

        let snapshot = {
            let mut counts = self.counts.write();
            counts.remove(user_id.as_str());
            counts.clone()
        };

        self.store.save(&self.filename, &snapshot)?;
        info!("Reset conversion count for user {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcc_foundation::Allowance;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_store(temp: &TempDir) -> QuotaStore {
        QuotaStore::open(
            temp.path().join("user_db.json"),
            QuotaLimits::default().with_owner("owner"),
        )
    }

    #[test]
    fn test_unseen_user_is_zero() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        assert_eq!(store.get_count(&UserId::from("nobody")), 0);

        let check = store.remaining(&UserId::from("nobody"));
        assert!(check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(5));
    }

    #[test]
    fn test_increment_persists() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let user = UserId::from("7");

        assert_eq!(store.increment(&user).unwrap(), 1);
        assert_eq!(store.increment(&user).unwrap(), 2);

        let reopened = test_store(&temp);
        assert_eq!(reopened.get_count(&user), 2);

        let raw = std::fs::read_to_string(temp.path().join("user_db.json")).unwrap();
        let parsed: HashMap<String, u32> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.get("7"), Some(&2));
    }

    #[test]
    fn test_limit_reached() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let user = UserId::from("7");

        for _ in 0..5 {
            store.increment(&user).unwrap();
        }
        let check = store.remaining(&user);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(0));
    }

    #[test]
    fn test_owner_bypasses_limit() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let owner = UserId::from("owner");

        for _ in 0..10 {
            store.increment(&owner).unwrap();
        }
        let check = store.remaining(&owner);
        assert!(check.allowed);
        assert!(check.remaining.is_unlimited());
        assert_eq!(store.limit_for(&owner), None);
    }

    #[test]
    fn test_corrupt_file_fails_open() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("user_db.json"), "][ garbage").unwrap();

        let store = test_store(&temp);
        assert_eq!(store.get_count(&UserId::from("7")), 0);

        // and the next increment rewrites a valid file
        store.increment(&UserId::from("7")).unwrap();
        assert_eq!(test_store(&temp).get_count(&UserId::from("7")), 1);
    }

    #[test]
    fn test_reset() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let user = UserId::from("7");

        store.increment(&user).unwrap();
        store.reset(&user).unwrap();
        assert_eq!(store.get_count(&user), 0);
        assert_eq!(test_store(&temp).get_count(&user), 0);
    }

    #[test]
    fn test_concurrent_increments_across_users() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(test_store(&temp));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let user = UserId::from(format!("user-{}", i % 4));
                    store.increment(&user).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = test_store(&temp);
        for i in 0..4 {
            assert_eq!(reopened.get_count(&UserId::from(format!("user-{}", i))), 2);
        }
    }
}
