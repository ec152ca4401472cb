//! clipvault: a persistent clipboard history engine.
//!
//! Captured snapshots (text, images, file lists) survive restarts. Each
//! payload is stored at one of three tiers chosen by size: inline in its
//! metadata record, in a standalone blob file, or in a blob file read back
//! through a memory map. Reads go through a bounded LRU cache, and a
//! retention reconciler expires old unpinned entries and self-heals
//! record/blob inconsistencies left by crashes.
//!
//! The clipboard listener and the tray UI live outside this crate; they
//! drive the engine through [`ClipVault`].

mod cache;
mod error;
mod history;
mod retention;
mod schema;
mod store;
mod types;
mod vault;

pub use cache::{ContentCache, DEFAULT_CACHE_CAPACITY};
pub use error::{Result, VaultError};
pub use history::{HistoryIndex, DEFAULT_HISTORY_WINDOW};
pub use retention::{RetentionReconciler, SweepStats, DEFAULT_RETENTION_HOURS};
pub use store::{ContentStore, DEFAULT_IMAGE_QUALITY, INLINE_MAX_BYTES, MMAP_MIN_BYTES};
pub use types::{ClipEntry, ClipKind, HistoryEntry, StorageTier};
pub use vault::{ClipVault, VaultConfig};
