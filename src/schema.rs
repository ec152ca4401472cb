//! Record store schema. Migration is purely additive: the table is created
//! with the current column set, and older on-disk stores are upgraded by
//! diffing `PRAGMA table_info` against the required columns and adding
//! whatever is missing. No version table, no rollback.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::Result;

const CREATE_CLIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clips (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL DEFAULT 'text',
  tier TEXT NOT NULL DEFAULT 'inline',
  content BLOB,
  blob_path TEXT,
  preview TEXT NOT NULL DEFAULT '',
  size INTEGER NOT NULL DEFAULT 0,
  created_at INTEGER NOT NULL DEFAULT 0,
  pinned INTEGER NOT NULL DEFAULT 0
);
"#;

const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_clips_created_at ON clips(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_clips_pinned ON clips(pinned);
"#;

/// Columns every row must expose, with the defaults applied when a column
/// is retrofitted onto an older store. `id` is not listed; a store without
/// its primary key is not a store this crate ever wrote.
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("kind", "TEXT NOT NULL DEFAULT 'text'"),
    ("tier", "TEXT NOT NULL DEFAULT 'inline'"),
    ("content", "BLOB"),
    ("blob_path", "TEXT"),
    ("preview", "TEXT NOT NULL DEFAULT ''"),
    ("size", "INTEGER NOT NULL DEFAULT 0"),
    ("created_at", "INTEGER NOT NULL DEFAULT 0"),
    ("pinned", "INTEGER NOT NULL DEFAULT 0"),
];

/// Idempotent; called on every open. Existing rows keep their other fields
/// untouched when columns are added.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_CLIPS_TABLE)?;

    let present = table_columns(conn, "clips")?;
    for (name, decl) in REQUIRED_COLUMNS {
        if present.contains(*name) {
            continue;
        }
        add_column(conn, name, decl)?;
    }

    // Indexes last: idx_clips_created_at needs the column the loop above
    // may just have added.
    conn.execute_batch(CREATE_INDEXES)?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for name in names {
        columns.insert(name?);
    }
    Ok(columns)
}

fn add_column(conn: &Connection, name: &str, decl: &str) -> Result<()> {
    match conn.execute(&format!("ALTER TABLE clips ADD COLUMN {name} {decl}"), []) {
        Ok(_) => {
            log::info!("added missing column {} to clips", name);
            Ok(())
        }
        // A prior crashed run (or another introspection pass) got there
        // first. That is success, not failure.
        Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_set(conn: &Connection) -> HashSet<String> {
        table_columns(conn, "clips").unwrap()
    }

    #[test]
    fn fresh_store_gets_full_schema() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let columns = column_set(&conn);
        for (name, _) in REQUIRED_COLUMNS {
            assert!(columns.contains(*name), "missing column {name}");
        }
        assert!(columns.contains("id"));
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
    }

    #[test]
    fn legacy_store_is_upgraded_without_losing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        // An early build persisted only the payload and its kind.
        conn.execute_batch(
            "CREATE TABLE clips (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               kind TEXT NOT NULL,
               content BLOB
             );",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO clips (kind, content) VALUES ('text', X'68690A')",
            [],
        )
        .unwrap();

        ensure_schema(&conn).unwrap();

        let columns = column_set(&conn);
        for (name, _) in REQUIRED_COLUMNS {
            assert!(columns.contains(*name), "missing column {name}");
        }

        // The old row is intact and picked up the retrofit defaults.
        let (kind, content, tier, pinned): (String, Vec<u8>, String, bool) = conn
            .query_row(
                "SELECT kind, content, tier, pinned FROM clips WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(kind, "text");
        assert_eq!(content, b"hi\n");
        assert_eq!(tier, "inline");
        assert!(!pinned);
    }

    #[test]
    fn adding_an_existing_column_is_success() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        add_column(&conn, "pinned", "INTEGER NOT NULL DEFAULT 0").unwrap();
    }
}
