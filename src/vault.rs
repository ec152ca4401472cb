//! The engine facade the capture listener and UI layer drive. All
//! mutations funnel through `&mut self`, which is what makes the
//! single-writer model of the engine hold: a retention sweep and a store
//! can never interleave on the same record.

use std::path::PathBuf;

use chrono::Duration;

use crate::cache::{ContentCache, DEFAULT_CACHE_CAPACITY};
use crate::error::Result;
use crate::history::{HistoryIndex, DEFAULT_HISTORY_WINDOW};
use crate::retention::{RetentionReconciler, SweepStats, DEFAULT_RETENTION_HOURS};
use crate::store::{ContentStore, DEFAULT_IMAGE_QUALITY};
use crate::types::{ClipKind, HistoryEntry};

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory holding the record store and the blob subdirectory.
    pub data_dir: PathBuf,
    pub cache_capacity: usize,
    pub image_quality: u8,
    pub retention: Duration,
    pub history_window: usize,
}

impl VaultConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        VaultConfig {
            data_dir: data_dir.into(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            image_quality: DEFAULT_IMAGE_QUALITY,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

pub struct ClipVault {
    store: ContentStore,
    cache: ContentCache,
    history: HistoryIndex,
    reconciler: RetentionReconciler,
}

impl ClipVault {
    /// Opens (creating if needed) the vault under `config.data_dir`, runs
    /// one reconciliation pass and loads the history window.
    pub fn open(config: VaultConfig) -> Result<Self> {
        let db_path = config.data_dir.join("clipvault.db");
        let blob_dir = config.data_dir.join("blobs");

        let mut store = ContentStore::open(&db_path, &blob_dir)?;
        store.set_image_quality(config.image_quality);

        let mut cache = ContentCache::new(config.cache_capacity);
        let reconciler = RetentionReconciler::new(config.retention);
        reconciler.run(&store, &mut cache)?;

        let mut history = HistoryIndex::new(config.history_window);
        history.refresh(&store)?;

        log::info!("clip vault ready at {}", config.data_dir.display());
        Ok(ClipVault {
            store,
            cache,
            history,
            reconciler,
        })
    }

    /// Entry point for a capture event from the clipboard listener. Every
    /// event appends; identical consecutive captures are not deduplicated.
    pub fn capture(&mut self, payload: &[u8], kind: ClipKind) -> Result<HistoryEntry> {
        let entry = self.store.store(payload, kind)?;
        self.history.refresh(&self.store)?;
        Ok(HistoryEntry::from(&entry))
    }

    /// Resolves raw bytes for a paste request, through the cache.
    pub fn paste(&mut self, id: i64) -> Result<(Vec<u8>, ClipKind)> {
        let entry = self.store.entry(id)?;
        if let Some(bytes) = self.cache.get(id) {
            log::debug!("paste {} served from cache", id);
            return Ok((bytes, entry.kind));
        }
        let bytes = self.store.load(id)?;
        self.cache.put(id, bytes.clone());
        Ok((bytes, entry.kind))
    }

    pub fn pin(&mut self, id: i64) -> Result<()> {
        self.store.set_pinned(id, true)?;
        self.history.refresh(&self.store)
    }

    pub fn unpin(&mut self, id: i64) -> Result<()> {
        self.store.set_pinned(id, false)?;
        self.history.refresh(&self.store)
    }

    pub fn delete(&mut self, id: i64) -> Result<()> {
        self.store.delete(id)?;
        self.cache.invalidate(id);
        self.history.refresh(&self.store)
    }

    /// Removes every non-pinned entry. Returns how many were removed.
    pub fn clear_unpinned(&mut self) -> Result<usize> {
        let ids = self.store.clear_unpinned()?;
        for id in &ids {
            self.cache.invalidate(*id);
        }
        self.history.refresh(&self.store)?;
        Ok(ids.len())
    }

    /// Case-insensitive substring search over the loaded history window.
    pub fn search(&self, needle: &str) -> Vec<HistoryEntry> {
        self.history.search(needle)
    }

    pub fn recent(&self) -> &[HistoryEntry] {
        self.history.recent()
    }

    pub fn pinned(&self) -> &[HistoryEntry] {
        self.history.pinned()
    }

    /// Live-tunable cache bound; lowering it evicts immediately.
    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache.set_capacity(capacity);
    }

    /// Live-tunable recompression quality, clamped to [50, 100].
    pub fn set_image_quality(&mut self, quality: u8) {
        self.store.set_image_quality(quality);
    }

    /// Runs the retention sweep and orphan reconciliation now.
    pub fn reconcile(&mut self) -> Result<SweepStats> {
        let stats = self.reconciler.run(&self.store, &mut self.cache)?;
        self.history.refresh(&self.store)?;
        Ok(stats)
    }
}
