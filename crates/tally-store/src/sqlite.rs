//! SQLite backend using rusqlite.
//!
//! All namespaces share one `view_counts` table keyed by
//! `(item_id, replica_id)`; `replica_namespaces` records which replica ids
//! have been materialized. WAL mode by default.
//!
//! ```no_run
//! use tally_core::ReplicaId;
//! use tally_store::{EntryStore, SqliteStore};
//!
//! let store = SqliteStore::open("replica-1.db").unwrap();
//! store.upsert(1, &ReplicaId::new("replica-1"), 3).unwrap();
//! ```

use crate::entry::{Entry, StoreStats};
use crate::error::{Result, StoreError};
use crate::traits::EntryStore;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use tally_core::{ItemId, ReplicaId};
use tracing::debug;

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Wal,
    Delete,
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// SQLite-backed [`EntryStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: SqliteConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        debug!(path = %path.as_ref().display(), "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS replica_namespaces (
                replica_id  TEXT PRIMARY KEY,
                created_at  INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TABLE IF NOT EXISTS view_counts (
                item_id     INTEGER NOT NULL,
                replica_id  TEXT NOT NULL REFERENCES replica_namespaces(replica_id),
                count       INTEGER NOT NULL CHECK (count >= 0),
                PRIMARY KEY (item_id, replica_id)
            );

            CREATE INDEX IF NOT EXISTS idx_view_counts_replica
                ON view_counts(replica_id, item_id);",
        )?;
        Ok(())
    }

    fn to_sql_count(count: u64) -> Result<i64> {
        i64::try_from(count).map_err(|_| StoreError::CountOverflow(count))
    }

    fn from_sql_count(count: i64) -> Result<u64> {
        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }

    fn insert_namespace(conn: &Connection, replica_id: &ReplicaId) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO replica_namespaces (replica_id) VALUES (?1)",
            params![replica_id.as_str()],
        )?;
        Ok(inserted > 0)
    }
}

impl EntryStore for SqliteStore {
    fn ensure_namespace(&self, replica_id: &ReplicaId) -> Result<bool> {
        let conn = self.conn.lock();
        Self::insert_namespace(&conn, replica_id)
    }

    fn has_namespace(&self, replica_id: &ReplicaId) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM replica_namespaces WHERE replica_id = ?1",
                params![replica_id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn namespaces(&self) -> Result<Vec<ReplicaId>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT replica_id FROM replica_namespaces ORDER BY replica_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(ReplicaId::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn get(&self, item_id: ItemId, replica_id: &ReplicaId) -> Result<Option<Entry>> {
        let conn = self.conn.lock();
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM view_counts WHERE item_id = ?1 AND replica_id = ?2",
                params![item_id, replica_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match count {
            Some(c) => Ok(Some(Entry::new(
                item_id,
                replica_id.clone(),
                Self::from_sql_count(c)?,
            ))),
            None => Ok(None),
        }
    }

    fn get_all(&self, item_id: ItemId, replica_ids: &[ReplicaId]) -> Result<Vec<Entry>> {
        if replica_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..replica_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT replica_id, count FROM view_counts
             WHERE item_id = ?1 AND replica_id IN ({placeholders})
             ORDER BY replica_id"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(replica_ids.len() + 1);
        values.push(item_id.into());
        values.extend(replica_ids.iter().map(|r| r.as_str().to_string().into()));

        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(replica, count)| -> Result<Entry> {
                Ok(Entry::new(
                    item_id,
                    ReplicaId::from(replica),
                    Self::from_sql_count(count)?,
                ))
            })
            .collect()
    }

    fn upsert(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<()> {
        let count = Self::to_sql_count(count)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::insert_namespace(&tx, replica_id)?;
        tx.execute(
            "INSERT INTO view_counts (item_id, replica_id, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(item_id, replica_id) DO UPDATE SET count = excluded.count",
            params![item_id, replica_id.as_str(), count],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn merge_max(&self, item_id: ItemId, replica_id: &ReplicaId, count: u64) -> Result<bool> {
        if count == 0 {
            return Ok(false);
        }
        let count = Self::to_sql_count(count)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::insert_namespace(&tx, replica_id)?;
        let changed = tx.execute(
            "INSERT INTO view_counts (item_id, replica_id, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(item_id, replica_id) DO UPDATE SET count = excluded.count
             WHERE excluded.count > view_counts.count",
            params![item_id, replica_id.as_str(), count],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn item_ids(&self) -> Result<Vec<ItemId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT item_id FROM view_counts ORDER BY item_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, ItemId>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let (namespaces, items, entries): (i64, i64, i64) = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM replica_namespaces),
                (SELECT COUNT(DISTINCT item_id) FROM view_counts),
                (SELECT COUNT(*) FROM view_counts)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(StoreStats {
            namespaces: namespaces as usize,
            items: items as usize,
            entries: entries as usize,
        })
    }
}
