//! Startup (and periodic) sweep that enforces the retention window and
//! restores the record/blob one-to-one invariant after a crash. Both passes
//! are idempotent, and a failure on one item never aborts the rest.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use chrono::{Duration, Utc};

use crate::cache::ContentCache;
use crate::error::{best_effort_remove, Result};
use crate::store::ContentStore;

pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Outcome of one reconciliation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Non-pinned records removed by the age sweep.
    pub expired: usize,
    /// Blob files removed because no live record references them.
    pub orphan_blobs: usize,
    /// Records removed because their blob file is gone.
    pub dangling_records: usize,
}

impl SweepStats {
    fn is_clean(&self) -> bool {
        *self == SweepStats::default()
    }
}

pub struct RetentionReconciler {
    retention: Duration,
}

impl RetentionReconciler {
    pub fn new(retention: Duration) -> Self {
        RetentionReconciler { retention }
    }

    /// Age sweep followed by orphan reconciliation. Every record deletion
    /// also drops the matching cache entry.
    pub fn run(&self, store: &ContentStore, cache: &mut ContentCache) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        self.sweep_expired(store, cache, &mut stats)?;
        self.reconcile_blobs(store, cache, &mut stats)?;

        if stats.is_clean() {
            log::debug!("reconciliation found nothing to do");
        } else {
            log::info!(
                "reconciliation removed {} expired entries, {} orphan blobs, {} dangling records",
                stats.expired,
                stats.orphan_blobs,
                stats.dangling_records
            );
        }
        Ok(stats)
    }

    fn sweep_expired(
        &self,
        store: &ContentStore,
        cache: &mut ContentCache,
        stats: &mut SweepStats,
    ) -> Result<()> {
        let cutoff = (Utc::now() - self.retention).timestamp();
        for id in store.expired_unpinned(cutoff)? {
            match store.delete(id) {
                Ok(()) => {
                    cache.invalidate(id);
                    stats.expired += 1;
                }
                Err(e) => log::warn!("failed to expire entry {}: {}", id, e),
            }
        }
        Ok(())
    }

    fn reconcile_blobs(
        &self,
        store: &ContentStore,
        cache: &mut ContentCache,
        stats: &mut SweepStats,
    ) -> Result<()> {
        // A crash between blob write and record insert leaves a blob no
        // record references; drop it.
        let referenced: HashSet<PathBuf> = store.live_blob_paths()?.into_iter().collect();
        match fs::read_dir(store.blob_dir()) {
            Ok(dir) => {
                for entry in dir.flatten() {
                    let path = entry.path();
                    if !path.is_file() || referenced.contains(&path) {
                        continue;
                    }
                    log::debug!("removing orphan blob {}", path.display());
                    if best_effort_remove("remove orphan blob", &path) {
                        stats.orphan_blobs += 1;
                    }
                }
            }
            Err(e) => log::warn!(
                "cannot scan blob directory {}: {}",
                store.blob_dir().display(),
                e
            ),
        }

        // The inverse inconsistency: a record whose blob was removed
        // out-of-band can never be loaded again; drop it.
        for (id, path) in store.file_backed_entries()? {
            let missing = match &path {
                Some(path) => !path.exists(),
                None => true,
            };
            if !missing {
                continue;
            }
            match store.delete(id) {
                Ok(()) => {
                    cache.invalidate(id);
                    stats.dangling_records += 1;
                }
                Err(e) => log::warn!("failed to drop dangling entry {}: {}", id, e),
            }
        }
        Ok(())
    }
}

impl Default for RetentionReconciler {
    fn default() -> Self {
        RetentionReconciler::new(Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::error::VaultError;
    use crate::types::ClipKind;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(
            &dir.path().join("clips.db"),
            &dir.path().join("blobs"),
        )
        .unwrap();
        (dir, store)
    }

    fn backdate_hours(store: &ContentStore, id: i64, hours: i64) {
        let ts = (Utc::now() - Duration::hours(hours)).timestamp();
        store.set_created_at(id, ts).unwrap();
    }

    #[test]
    fn age_sweep_spares_pinned_records() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);

        let pinned = store.store(b"old but pinned", ClipKind::Text).unwrap();
        let unpinned = store.store(b"old and unpinned", ClipKind::Text).unwrap();
        store.set_pinned(pinned.id, true).unwrap();
        backdate_hours(&store, pinned.id, 48);
        backdate_hours(&store, unpinned.id, 48);

        let stats = RetentionReconciler::default().run(&store, &mut cache).unwrap();
        assert_eq!(stats.expired, 1);
        assert!(store.entry(pinned.id).is_ok());
        assert!(matches!(
            store.entry(unpinned.id),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn age_sweep_keeps_recent_records() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);
        let fresh = store.store(b"just captured", ClipKind::Text).unwrap();

        let stats = RetentionReconciler::default().run(&store, &mut cache).unwrap();
        assert_eq!(stats, SweepStats::default());
        assert!(store.entry(fresh.id).is_ok());
    }

    #[test]
    fn age_sweep_removes_the_blob_with_the_record() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);
        let entry = store
            .store(&vec![1u8; 2 * 1024 * 1024], ClipKind::FileList)
            .unwrap();
        let blob = entry.blob_path.clone().unwrap();
        backdate_hours(&store, entry.id, 48);

        RetentionReconciler::default().run(&store, &mut cache).unwrap();
        assert!(!std::path::Path::new(&blob).exists());
    }

    #[test]
    fn sweep_invalidates_cached_bytes_for_expired_entries() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);
        let entry = store.store(b"expiring", ClipKind::Text).unwrap();
        cache.put(entry.id, b"expiring".to_vec());
        backdate_hours(&store, entry.id, 48);

        RetentionReconciler::default().run(&store, &mut cache).unwrap();
        assert_eq!(cache.get(entry.id), None);
    }

    #[test]
    fn orphan_blob_is_removed_in_one_pass() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);
        let kept = store
            .store(&vec![2u8; 2 * 1024 * 1024], ClipKind::FileList)
            .unwrap();

        // Simulates a crash between blob write and record insert.
        let orphan = store.blob_dir().join("000000000000-000000-deadbeef.blob");
        fs::write(&orphan, b"stranded").unwrap();

        let stats = RetentionReconciler::default().run(&store, &mut cache).unwrap();
        assert_eq!(stats.orphan_blobs, 1);
        assert!(!orphan.exists());
        // The referenced blob survives.
        assert!(std::path::Path::new(kept.blob_path.as_deref().unwrap()).exists());
    }

    #[test]
    fn dangling_record_is_removed_in_one_pass() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);
        let entry = store
            .store(&vec![3u8; 2 * 1024 * 1024], ClipKind::FileList)
            .unwrap();
        fs::remove_file(entry.blob_path.as_deref().unwrap()).unwrap();

        let stats = RetentionReconciler::default().run(&store, &mut cache).unwrap();
        assert_eq!(stats.dangling_records, 1);
        assert!(matches!(
            store.entry(entry.id),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let (_dir, mut store) = open_store();
        let mut cache = ContentCache::new(4);
        let entry = store
            .store(&vec![4u8; 2 * 1024 * 1024], ClipKind::FileList)
            .unwrap();
        fs::remove_file(entry.blob_path.as_deref().unwrap()).unwrap();
        fs::write(store.blob_dir().join("111111111111-000001-cafecafe.blob"), b"x").unwrap();

        let reconciler = RetentionReconciler::default();
        let first = reconciler.run(&store, &mut cache).unwrap();
        assert_eq!(first.dangling_records, 1);
        assert_eq!(first.orphan_blobs, 1);

        let second = reconciler.run(&store, &mut cache).unwrap();
        assert_eq!(second, SweepStats::default());
    }
}
