//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use paperrank_core::error::PaperrankError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not
/// Sync. Every repository in the workspace shares one `Arc<Database>`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, PaperrankError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| PaperrankError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| PaperrankError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing and dry runs).
    pub fn in_memory() -> Result<Self, PaperrankError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PaperrankError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| PaperrankError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, PaperrankError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, PaperrankError>
    where
        F: FnOnce(&Connection) -> Result<T, PaperrankError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PaperrankError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// Commits when the closure returns `Ok`; any error rolls back every
    /// statement the closure issued.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, PaperrankError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, PaperrankError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| PaperrankError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| PaperrankError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| PaperrankError::Storage(format!("Failed to commit: {}", e)))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error into the storage variant.
pub(crate) fn storage_err(e: rusqlite::Error) -> PaperrankError {
    PaperrankError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_papers(conn: &Connection) -> Result<i64, PaperrankError> {
        conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))
            .map_err(storage_err)
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        let count = db.with_conn(count_papers).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("papers.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(db.with_conn(count_papers).unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_commits() {
        let db = Database::in_memory().unwrap();
        db.with_transaction(|tx| {
            tx.execute("INSERT INTO papers (id, title) VALUES (1, 'a')", [])
                .map_err(storage_err)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.with_conn(count_papers).unwrap(), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), PaperrankError> = db.with_transaction(|tx| {
            tx.execute("INSERT INTO papers (id, title) VALUES (1, 'a')", [])
                .map_err(storage_err)?;
            Err(PaperrankError::Storage("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.with_conn(count_papers).unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        let enabled: i64 = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                    .map_err(storage_err)
            })
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
