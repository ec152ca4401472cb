use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// What a captured payload is, from the clipboard's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    Text,
    Image,
    FileList,
}

impl ClipKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ClipKind::Text => "text",
            ClipKind::Image => "image",
            ClipKind::FileList => "files",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<ClipKind> {
        match s {
            "text" => Some(ClipKind::Text),
            "image" => Some(ClipKind::Image),
            "files" => Some(ClipKind::FileList),
            _ => None,
        }
    }
}

/// How a payload is physically persisted. Chosen once at insertion from the
/// stored size and never changed for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Payload lives in the record itself.
    Inline,
    /// Payload lives in a blob file, read back with a buffered read.
    FileBacked,
    /// Payload lives in a blob file, read back through a memory map.
    MemoryMapped,
}

impl StorageTier {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            StorageTier::Inline => "inline",
            StorageTier::FileBacked => "file",
            StorageTier::MemoryMapped => "mmap",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<StorageTier> {
        match s {
            "inline" => Some(StorageTier::Inline),
            "file" => Some(StorageTier::FileBacked),
            "mmap" => Some(StorageTier::MemoryMapped),
            _ => None,
        }
    }
}

impl ToSql for ClipKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ClipKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        ClipKind::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for StorageTier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for StorageTier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        StorageTier::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// Persisted metadata for one stored clip. The inline payload itself is not
/// carried here; content is always fetched through `ContentStore::load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEntry {
    pub id: i64,
    pub kind: ClipKind,
    pub tier: StorageTier,
    /// Path of the backing blob file for the non-inline tiers.
    pub blob_path: Option<String>,
    pub preview: String,
    /// Byte length of the stored (possibly recompressed) payload.
    pub size: u64,
    /// Epoch seconds, set once at insertion.
    pub created_at: i64,
    pub pinned: bool,
}

/// Lightweight projection handed to the history list and search. Carries
/// previews only, never payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub preview: String,
    pub kind: ClipKind,
    pub pinned: bool,
}

impl From<&ClipEntry> for HistoryEntry {
    fn from(entry: &ClipEntry) -> Self {
        HistoryEntry {
            id: entry.id,
            preview: entry.preview.clone(),
            kind: entry.kind,
            pinned: entry.pinned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_tier_round_trip_their_sql_text() {
        for kind in [ClipKind::Text, ClipKind::Image, ClipKind::FileList] {
            assert_eq!(ClipKind::parse(kind.as_str()), Some(kind));
        }
        for tier in [
            StorageTier::Inline,
            StorageTier::FileBacked,
            StorageTier::MemoryMapped,
        ] {
            assert_eq!(StorageTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(ClipKind::parse("bitmap"), None);
        assert_eq!(StorageTier::parse(""), None);
    }
}
