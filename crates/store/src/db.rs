use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use duckdb::Connection;
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::query::RecordCounts;

use crate::schema::SCHEMA_SQL;

/// DuckDB-backed storage engine.
///
/// All writes go through one connection guarded by a mutex. Reads open their
/// own connection to the same database and see committed data only.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    read_source: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| TelemorphError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TelemorphError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| TelemorphError::Store(format!("failed to set pragmas: {e}")))?;
        Self::from_connection(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TelemorphError::Store(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, db_path: String) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TelemorphError::Store(format!("failed to initialize schema: {e}")))?;
        let read_source = conn
            .try_clone()
            .map_err(|e| TelemorphError::Store(format!("failed to open read connection: {e}")))?;
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            read_source: Arc::new(Mutex::new(read_source)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| TelemorphError::Store("writer connection mutex poisoned".to_string()))
    }

    /// A fresh connection for one read; never contends with the writer lock.
    pub(crate) fn reader(&self) -> Result<Connection> {
        let source = self
            .read_source
            .lock()
            .map_err(|_| TelemorphError::Store("read connection mutex poisoned".to_string()))?;
        source
            .try_clone()
            .map_err(|e| TelemorphError::Store(format!("failed to open read connection: {e}")))
    }

    pub fn counts(&self) -> Result<RecordCounts> {
        let conn = self.reader()?;
        Ok(RecordCounts {
            metrics: scalar_usize(&conn, "SELECT COUNT(*) FROM metrics")?,
            traces: scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?,
            logs: scalar_usize(&conn, "SELECT COUNT(*) FROM logs")?,
        })
    }
}

pub(crate) fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v.max(0) as usize)
        .map_err(|e| TelemorphError::Store(format!("query failed: {e}")))
}
