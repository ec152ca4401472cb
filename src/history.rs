//! Read-side projection of the record store: the window of recent entries
//! and the pinned set, previews only. Holds no authority; the owning layer
//! refreshes it after every mutation, and interactive search filters the
//! already-loaded window without touching the store.

use crate::error::Result;
use crate::store::ContentStore;
use crate::types::HistoryEntry;

pub const DEFAULT_HISTORY_WINDOW: usize = 50;

#[derive(Debug)]
pub struct HistoryIndex {
    window: Vec<HistoryEntry>,
    pinned: Vec<HistoryEntry>,
    limit: usize,
}

impl HistoryIndex {
    pub fn new(limit: usize) -> Self {
        HistoryIndex {
            window: Vec::new(),
            pinned: Vec::new(),
            limit,
        }
    }

    /// Rebuilds both views from the record store.
    pub fn refresh(&mut self, store: &ContentStore) -> Result<()> {
        self.window = store.recent_entries(self.limit)?;
        self.pinned = store.pinned_entries()?;
        Ok(())
    }

    /// Newest first, at most the configured window size.
    pub fn recent(&self) -> &[HistoryEntry] {
        &self.window
    }

    pub fn pinned(&self) -> &[HistoryEntry] {
        &self.pinned
    }

    /// Case-insensitive substring match over the previews of the loaded
    /// window.
    pub fn search(&self, needle: &str) -> Vec<HistoryEntry> {
        let needle = needle.to_lowercase();
        self.window
            .iter()
            .filter(|entry| entry.preview.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

impl Default for HistoryIndex {
    fn default() -> Self {
        HistoryIndex::new(DEFAULT_HISTORY_WINDOW)
    }
}
