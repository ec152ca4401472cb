//! Content persistence. Classifies a captured payload, optionally
//! recompresses images, picks a storage tier from the final size and writes
//! the record plus (for the file tiers) a uniquely named blob file under the
//! data directory. Reads reverse the tier decision.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};
use memmap2::Mmap;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::error::{best_effort_remove, Result, VaultError};
use crate::schema;
use crate::types::{ClipEntry, ClipKind, HistoryEntry, StorageTier};

/// Payloads strictly below this stay inline in the record.
pub const INLINE_MAX_BYTES: usize = 1_048_576;
/// Payloads at or above this are read back through a memory map.
pub const MMAP_MIN_BYTES: usize = 10_485_760;
/// Images at or below this are not worth a recompression attempt.
const RECOMPRESS_MIN_BYTES: usize = 1024;

pub const DEFAULT_IMAGE_QUALITY: u8 = 85;
const MIN_IMAGE_QUALITY: u8 = 50;
const MAX_IMAGE_QUALITY: u8 = 100;

const PREVIEW_TEXT_CHARS: usize = 100;
const PREVIEW_FILE_CHARS: usize = 30;

pub struct ContentStore {
    conn: Connection,
    blob_dir: PathBuf,
    image_quality: u8,
    /// Process-lifetime counter folded into blob filenames so that two
    /// captures in the same millisecond never collide.
    seq: u64,
}

impl ContentStore {
    pub fn open(db_path: &Path, blob_dir: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(blob_dir)?;

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        schema::ensure_schema(&conn)?;

        log::info!(
            "content store opened, db: {}, blobs: {}",
            db_path.display(),
            blob_dir.display()
        );

        Ok(ContentStore {
            conn,
            blob_dir: blob_dir.to_path_buf(),
            image_quality: DEFAULT_IMAGE_QUALITY,
            seq: 0,
        })
    }

    /// Quality used for image recompression, clamped to [50, 100].
    pub fn set_image_quality(&mut self, quality: u8) {
        self.image_quality = quality.clamp(MIN_IMAGE_QUALITY, MAX_IMAGE_QUALITY);
    }

    pub fn image_quality(&self) -> u8 {
        self.image_quality
    }

    pub(crate) fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    /// Persists one captured payload and returns its metadata record.
    pub fn store(&mut self, payload: &[u8], kind: ClipKind) -> Result<ClipEntry> {
        let mut stored: Cow<'_, [u8]> = Cow::Borrowed(payload);
        let mut recompressed = false;

        if kind == ClipKind::Image && payload.len() > RECOMPRESS_MIN_BYTES {
            // Recompression is an optimization, never a requirement: any
            // failure, and any result that is not strictly smaller, keeps
            // the original bytes.
            match reencode_image(payload, self.image_quality) {
                Some(re) if re.len() < payload.len() => {
                    log::debug!("image recompressed {} -> {} bytes", payload.len(), re.len());
                    stored = Cow::Owned(re);
                    recompressed = true;
                }
                Some(re) => {
                    log::debug!(
                        "recompressed image not smaller ({} >= {}), keeping original",
                        re.len(),
                        payload.len()
                    );
                }
                None => log::debug!("image recompression failed, keeping original"),
            }
        }

        let size = stored.len();
        let preview = build_preview(kind, &stored, recompressed);
        let tier = tier_for(size);

        // Blob first, row second. A crash in between leaves an orphan blob
        // file, which the retention reconciler removes on next startup.
        let blob_path = match tier {
            StorageTier::Inline => None,
            StorageTier::FileBacked | StorageTier::MemoryMapped => {
                Some(self.write_blob(&stored)?)
            }
        };
        let content: Option<&[u8]> = match tier {
            StorageTier::Inline => Some(&stored),
            _ => None,
        };

        let created_at = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO clips (kind, tier, content, blob_path, preview, size, created_at, pinned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![kind, tier, content, blob_path, preview, size as i64, created_at],
        )?;
        let id = self.conn.last_insert_rowid();

        log::info!(
            "stored entry {} ({:?}, {:?}, {} bytes)",
            id,
            kind,
            tier,
            size
        );

        Ok(ClipEntry {
            id,
            kind,
            tier,
            blob_path,
            preview,
            size: size as u64,
            created_at,
            pinned: false,
        })
    }

    /// Reconstructs the raw payload for an entry. A record whose backing
    /// bytes are gone is data loss for that record only: it is dropped from
    /// the store and the load reports not-found.
    pub fn load(&self, id: i64) -> Result<Vec<u8>> {
        let row = self
            .conn
            .query_row(
                "SELECT tier, content, blob_path FROM clips WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, StorageTier>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((tier, content, blob_path)) = row else {
            return Err(VaultError::NotFound(id));
        };

        match tier {
            StorageTier::Inline => match content {
                Some(bytes) => Ok(bytes),
                None => self.discard_lost(id, "inline payload missing"),
            },
            StorageTier::FileBacked | StorageTier::MemoryMapped => {
                let Some(path) = blob_path else {
                    return self.discard_lost(id, "no blob path recorded");
                };
                let read = match tier {
                    StorageTier::FileBacked => fs::read(&path),
                    _ => map_blob(Path::new(&path)),
                };
                match read {
                    Ok(bytes) => Ok(bytes),
                    Err(e) => self.discard_lost(id, &format!("blob unreadable: {e}")),
                }
            }
        }
    }

    /// Drops a record whose payload can no longer be produced.
    fn discard_lost(&self, id: i64, reason: &str) -> Result<Vec<u8>> {
        log::warn!("entry {} lost ({}), dropping record", id, reason);
        let _ = self
            .conn
            .execute("DELETE FROM clips WHERE id = ?1", params![id]);
        Err(VaultError::NotFound(id))
    }

    pub fn entry(&self, id: i64) -> Result<ClipEntry> {
        self.conn
            .query_row(
                "SELECT id, kind, tier, blob_path, preview, size, created_at, pinned
                 FROM clips WHERE id = ?1",
                params![id],
                map_entry,
            )
            .optional()?
            .ok_or(VaultError::NotFound(id))
    }

    pub fn set_pinned(&self, id: i64, pinned: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE clips SET pinned = ?2 WHERE id = ?1",
            params![id, pinned],
        )?;
        if changed == 0 {
            return Err(VaultError::NotFound(id));
        }
        Ok(())
    }

    /// Removes one record and its backing blob. The blob removal is
    /// best-effort; the record removal is not.
    pub fn delete(&self, id: i64) -> Result<()> {
        let entry = self.entry(id)?;
        if let Some(path) = &entry.blob_path {
            best_effort_remove("remove blob", Path::new(path));
        }
        self.conn
            .execute("DELETE FROM clips WHERE id = ?1", params![id])?;
        log::info!("deleted entry {}", id);
        Ok(())
    }

    /// Deletes every non-pinned record and its blob. Returns the deleted
    /// ids so the caller can invalidate its cache.
    pub fn clear_unpinned(&self) -> Result<Vec<i64>> {
        let victims: Vec<(i64, Option<String>)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, blob_path FROM clips WHERE pinned = 0")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        for (_, path) in &victims {
            if let Some(path) = path {
                best_effort_remove("remove blob", Path::new(path));
            }
        }
        self.conn
            .execute("DELETE FROM clips WHERE pinned = 0", [])?;

        let ids: Vec<i64> = victims.into_iter().map(|(id, _)| id).collect();
        log::info!("cleared {} unpinned entries", ids.len());
        Ok(ids)
    }

    pub fn recent_entries(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, preview, kind, pinned FROM clips ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_history)?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    pub fn pinned_entries(&self) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, preview, kind, pinned FROM clips WHERE pinned = 1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], map_history)?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Non-pinned records older than the cutoff, for the age sweep. Pinned
    /// records are exempt no matter how old.
    pub(crate) fn expired_unpinned(&self, cutoff: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM clips WHERE pinned = 0 AND created_at < ?1")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Every blob path referenced by a live record.
    pub(crate) fn live_blob_paths(&self) -> Result<Vec<PathBuf>> {
        let mut stmt = self
            .conn
            .prepare("SELECT blob_path FROM clips WHERE blob_path IS NOT NULL")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for path in rows {
            paths.push(PathBuf::from(path?));
        }
        Ok(paths)
    }

    /// Records that claim a backing blob, for the dangling-locator pass.
    pub(crate) fn file_backed_entries(&self) -> Result<Vec<(i64, Option<PathBuf>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, blob_path FROM clips WHERE tier <> 'inline'")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (id, path) = row?;
            entries.push((id, path.map(PathBuf::from)));
        }
        Ok(entries)
    }

    fn write_blob(&mut self, payload: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        let digest = hex::encode(hasher.finalize());

        self.seq += 1;
        let name = format!(
            "{}-{:06}-{}.blob",
            Utc::now().timestamp_millis(),
            self.seq,
            &digest[..12]
        );
        let path = self.blob_dir.join(name);
        fs::write(&path, payload)?;
        log::debug!("wrote blob {} ({} bytes)", path.display(), payload.len());
        Ok(path.to_string_lossy().into_owned())
    }

    #[cfg(test)]
    pub(crate) fn set_created_at(&self, id: i64, created_at: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE clips SET created_at = ?2 WHERE id = ?1",
            params![id, created_at],
        )?;
        Ok(())
    }
}

fn tier_for(size: usize) -> StorageTier {
    if size < INLINE_MAX_BYTES {
        StorageTier::Inline
    } else if size < MMAP_MIN_BYTES {
        StorageTier::FileBacked
    } else {
        StorageTier::MemoryMapped
    }
}

fn map_blob(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    // The blob is exclusively owned by its record and never rewritten after
    // insertion; the mapping is dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap.to_vec())
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<ClipEntry> {
    Ok(ClipEntry {
        id: row.get(0)?,
        kind: row.get(1)?,
        tier: row.get(2)?,
        blob_path: row.get(3)?,
        preview: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        created_at: row.get(6)?,
        pinned: row.get(7)?,
    })
}

fn map_history(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        preview: row.get(1)?,
        kind: row.get(2)?,
        pinned: row.get(3)?,
    })
}

fn build_preview(kind: ClipKind, payload: &[u8], recompressed: bool) -> String {
    match kind {
        ClipKind::Text => {
            let text = String::from_utf8_lossy(payload);
            truncate_chars(&text, PREVIEW_TEXT_CHARS)
        }
        ClipKind::FileList => {
            let text = String::from_utf8_lossy(payload);
            let first = text.lines().next().unwrap_or("");
            format!("File: {}", truncate_chars(first, PREVIEW_FILE_CHARS))
        }
        ClipKind::Image => {
            let kb = payload.len() / 1024;
            if recompressed {
                format!("Image ({} KB) (compressed)", kb)
            } else {
                format!("Image ({} KB)", kb)
            }
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Decodes, flattens any alpha channel against a white background (the
/// re-encoded output has no transparency to express) and re-encodes as JPEG
/// at the given quality. Returns `None` when the payload does not decode or
/// the encoder fails; size acceptance is the caller's decision.
fn reencode_image(payload: &[u8], quality: u8) -> Option<Vec<u8>> {
    let decoded = image::load_from_memory(payload).ok()?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut flat = RgbImage::new(width, height);
    for (x, y, px) in rgba.enumerate_pixels() {
        let a = px[3] as u16;
        let blend = |c: u8| ((c as u16 * a + 255 * (255 - a)) / 255) as u8;
        flat.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(flat.as_raw(), width, height, ExtendedColorType::Rgb8)
        .ok()?;
    Some(out)
}
