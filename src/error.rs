use std::io;
use std::path::Path;

/// Errors surfaced by the storage engine. Read-path failures with a safe
/// local recovery (missing blob, failed recompression) never reach this
/// type; they degrade to `NotFound` or fall back silently.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("entry {0} not found")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Shared sink for cleanup-path file removals. Deleting a blob must never
/// fail the operation that triggered it; an already-gone file is not even
/// worth a log line. Returns whether the file was actually removed.
pub(crate) fn best_effort_remove(op: &str, path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("{} failed for {}: {}", op, path.display(), e);
            false
        }
    }
}
