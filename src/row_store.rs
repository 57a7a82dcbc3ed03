//! Row-store access.
//!
//! The row store is the source of truth the per-artist indexes are built
//! from. It is read-only from the lookup's point of view. Two backends are
//! provided: an in-memory store for tests and small catalogs, and a SQLite
//! store over the `mapping` table produced by the catalog export.

use rusqlite::{Connection, OpenFlags};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{ArtistEntry, MappingRow};

/// Read access to catalog rows. Each shard worker owns its own handle.
pub trait RowStore: Send {
    /// All rows credited to one artist; empty when the artist is unknown.
    fn rows_for_artist(&self, artist_credit_id: i64) -> Result<Vec<MappingRow>>;

    /// Row count per artist, the input for shard planning.
    fn artist_histogram(&self) -> Result<FxHashMap<i64, u64>>;

    /// One entry per distinct artist credit, ordered by id.
    fn artists(&self) -> Result<Vec<ArtistEntry>>;

    /// Every row, ordered by artist credit id.
    fn all_rows(&self) -> Result<Vec<MappingRow>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Rows grouped by artist, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryRowStore {
    rows: Arc<FxHashMap<i64, Vec<MappingRow>>>,
}

impl MemoryRowStore {
    pub fn new(rows: impl IntoIterator<Item = MappingRow>) -> Self {
        let mut grouped: FxHashMap<i64, Vec<MappingRow>> = FxHashMap::default();
        for row in rows {
            grouped.entry(row.artist_credit_id).or_default().push(row);
        }
        Self { rows: Arc::new(grouped) }
    }
}

impl RowStore for MemoryRowStore {
    fn rows_for_artist(&self, artist_credit_id: i64) -> Result<Vec<MappingRow>> {
        Ok(self.rows.get(&artist_credit_id).cloned().unwrap_or_default())
    }

    fn artist_histogram(&self) -> Result<FxHashMap<i64, u64>> {
        Ok(self.rows.iter().map(|(id, rows)| (*id, rows.len() as u64)).collect())
    }

    fn artists(&self) -> Result<Vec<ArtistEntry>> {
        let mut artists: Vec<ArtistEntry> = self
            .rows
            .iter()
            .filter_map(|(id, rows)| {
                rows.first().map(|row| ArtistEntry {
                    artist_credit_id: *id,
                    name: row.artist_credit_name.clone(),
                    sort_name: row.artist_credit_sortname.clone(),
                })
            })
            .collect();
        artists.sort_by_key(|a| a.artist_credit_id);
        Ok(artists)
    }

    fn all_rows(&self) -> Result<Vec<MappingRow>> {
        let mut ids: Vec<i64> = self.rows.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .flat_map(|id| self.rows[&id].iter().cloned())
            .collect())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

const ROW_COLUMNS: &str = "artist_credit_id, artist_credit_name, artist_credit_sortname,
     recording_id, recording_name, release_id, release_name, score";

/// Read-only view over a `mapping` table:
///
/// ```sql
/// CREATE TABLE mapping (
///     artist_credit_id       INTEGER NOT NULL,
///     artist_credit_name     TEXT NOT NULL,
///     artist_credit_sortname TEXT,
///     recording_id           INTEGER NOT NULL,
///     recording_name         TEXT NOT NULL,
///     release_id             INTEGER NOT NULL,
///     release_name           TEXT NOT NULL,
///     score                  INTEGER NOT NULL
/// );
/// CREATE INDEX mapping_artist_credit_id ON mapping (artist_credit_id);
/// ```
pub struct SqliteRowStore {
    conn: Connection,
}

impl SqliteRowStore {
    /// Open an existing catalog read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(Self { conn })
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<MappingRow> {
        Ok(MappingRow {
            artist_credit_id: row.get(0)?,
            artist_credit_name: row.get(1)?,
            artist_credit_sortname: row.get(2)?,
            recording_id: row.get(3)?,
            recording_name: row.get(4)?,
            release_id: row.get(5)?,
            release_name: row.get(6)?,
            score: row.get(7)?,
        })
    }
}

impl RowStore for SqliteRowStore {
    fn rows_for_artist(&self, artist_credit_id: i64) -> Result<Vec<MappingRow>> {
        let sql = format!("SELECT {} FROM mapping WHERE artist_credit_id = ?1", ROW_COLUMNS);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([artist_credit_id], Self::read_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn artist_histogram(&self) -> Result<FxHashMap<i64, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT artist_credit_id, COUNT(*) FROM mapping GROUP BY artist_credit_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<FxHashMap<_, _>>>()?)
    }

    fn artists(&self) -> Result<Vec<ArtistEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist_credit_id, MIN(artist_credit_name), MIN(artist_credit_sortname)
             FROM mapping
             GROUP BY artist_credit_id
             ORDER BY artist_credit_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ArtistEntry {
                artist_credit_id: row.get(0)?,
                name: row.get(1)?,
                sort_name: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn all_rows(&self) -> Result<Vec<MappingRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM mapping ORDER BY artist_credit_id", ROW_COLUMNS))?;
        let rows = stmt.query_map([], Self::read_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rusqlite::params;

    pub(crate) fn row(
        artist: i64,
        name: &str,
        recording: (i64, &str),
        release: (i64, &str),
        score: i64,
    ) -> MappingRow {
        MappingRow {
            artist_credit_id: artist,
            artist_credit_name: name.to_string(),
            artist_credit_sortname: None,
            recording_id: recording.0,
            recording_name: recording.1.to_string(),
            release_id: release.0,
            release_name: release.1.to_string(),
            score,
        }
    }

    fn sample_rows() -> Vec<MappingRow> {
        vec![
            row(2, "Blur", (20, "Song 2"), (200, "Blur"), 1),
            row(1, "The Beatles", (10, "Let It Be"), (100, "Let It Be"), 1),
            row(1, "The Beatles", (11, "Get Back"), (100, "Let It Be"), 2),
        ]
    }

    fn write_catalog(path: &Path, rows: &[MappingRow]) {
        let mut conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE mapping (
                artist_credit_id INTEGER NOT NULL,
                artist_credit_name TEXT NOT NULL,
                artist_credit_sortname TEXT,
                recording_id INTEGER NOT NULL,
                recording_name TEXT NOT NULL,
                release_id INTEGER NOT NULL,
                release_name TEXT NOT NULL,
                score INTEGER NOT NULL
            );",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        {
            let mut stmt = tx
                .prepare("INSERT INTO mapping VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)")
                .unwrap();
            for r in rows {
                stmt.execute(params![
                    r.artist_credit_id,
                    r.artist_credit_name,
                    r.artist_credit_sortname,
                    r.recording_id,
                    r.recording_name,
                    r.release_id,
                    r.release_name,
                    r.score,
                ])
                .unwrap();
            }
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryRowStore::new(sample_rows());
        assert_eq!(store.rows_for_artist(1).unwrap().len(), 2);
        assert!(store.rows_for_artist(99).unwrap().is_empty());
        assert_eq!(store.artist_histogram().unwrap().get(&1), Some(&2));

        let artists = store.artists().unwrap();
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].name, "The Beatles");

        let all = store.all_rows().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].artist_credit_id <= w[1].artist_credit_id));
    }

    #[test]
    fn test_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.db");
        write_catalog(&path, &sample_rows());

        let store = SqliteRowStore::open(&path).unwrap();
        let beatles = store.rows_for_artist(1).unwrap();
        assert_eq!(beatles.len(), 2);
        assert!(beatles.iter().all(|r| r.artist_credit_name == "The Beatles"));
        assert!(store.rows_for_artist(99).unwrap().is_empty());

        let hist = store.artist_histogram().unwrap();
        assert_eq!(hist.get(&1), Some(&2));
        assert_eq!(hist.get(&2), Some(&1));

        let artists = store.artists().unwrap();
        assert_eq!(artists.iter().map(|a| a.artist_credit_id).collect::<Vec<_>>(), vec![1, 2]);

        let all = store.all_rows().unwrap();
        assert_eq!(all.first().map(|r| r.artist_credit_id), Some(1));
        assert_eq!(all.last().map(|r| r.artist_credit_id), Some(2));
    }

    #[test]
    fn test_sqlite_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteRowStore::open(&dir.path().join("missing.db")).is_err());
    }
}
