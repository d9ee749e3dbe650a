//! Column store backed by the local SQLite database.
//!
//! Tables and families are registered in `column_tables` and
//! `column_families`; cells live in `column_cells`. Every row write runs in
//! its own transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use paperrank_core::error::PaperrankError;
use paperrank_storage::Database;

use super::{family_of, ColumnRow, ColumnSink};
use crate::error::SinkError;

pub struct SqliteColumnStore {
    db: Arc<Database>,
}

impl SqliteColumnStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Number of rows stored in a table.
    pub fn row_count(&self, table: &str) -> Result<u64, SinkError> {
        let count = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(DISTINCT row_key) FROM column_cells WHERE table_name = ?1",
                [table],
                |row| row.get::<_, i64>(0),
            )
            .map_err(sql_err)
        })?;
        Ok(count as u64)
    }
}

fn sql_err(e: rusqlite::Error) -> PaperrankError {
    PaperrankError::Storage(format!("column store: {}", e))
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, PaperrankError> {
    conn.query_row(
        "SELECT 1 FROM column_tables WHERE name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(sql_err)
}

fn families(conn: &Connection, table: &str) -> Result<Vec<String>, PaperrankError> {
    let mut stmt = conn
        .prepare("SELECT family FROM column_families WHERE table_name = ?1")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([table], |row| row.get(0))
        .map_err(sql_err)?;
    rows.collect::<Result<Vec<String>, _>>().map_err(sql_err)
}

impl ColumnSink for SqliteColumnStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn ensure_table(&self, table: &str, wanted: &[&str]) -> Result<bool, SinkError> {
        let created = self.db.with_transaction(|tx| {
            if table_exists(tx, table)? {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO column_tables (name, created_at) VALUES (?1, ?2)",
                rusqlite::params![table, Utc::now().timestamp_millis()],
            )
            .map_err(sql_err)?;
            for family in wanted {
                tx.execute(
                    "INSERT OR IGNORE INTO column_families (table_name, family) VALUES (?1, ?2)",
                    [table, *family],
                )
                .map_err(sql_err)?;
            }
            Ok(true)
        })?;

        if created {
            info!(table, families = ?wanted, "Created column table");
        }
        Ok(created)
    }

    fn put_row(&self, table: &str, row: &ColumnRow) -> Result<(), SinkError> {
        self.db.with_transaction(|tx| {
            if !table_exists(tx, table)? {
                return Err(PaperrankError::Sink(format!("Table not found: {}", table)));
            }
            let known = families(tx, table)?;
            if let Some(column) = row
                .cells
                .keys()
                .find(|c| !known.iter().any(|f| f == family_of(c)))
            {
                return Err(PaperrankError::Sink(format!(
                    "Unknown column family '{}' in table {}",
                    family_of(column),
                    table
                )));
            }

            tx.execute(
                "DELETE FROM column_cells WHERE table_name = ?1 AND row_key = ?2",
                [table, row.key.as_str()],
            )
            .map_err(sql_err)?;

            let mut insert = tx
                .prepare(
                    "INSERT INTO column_cells (table_name, row_key, column_name, value)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(sql_err)?;
            for (column, value) in &row.cells {
                insert
                    .execute([table, row.key.as_str(), column.as_str(), value.as_str()])
                    .map_err(sql_err)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn get_row(&self, table: &str, row_key: &str) -> Result<Option<ColumnRow>, SinkError> {
        let cells = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT column_name, value FROM column_cells
                     WHERE table_name = ?1 AND row_key = ?2",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([table, row_key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(sql_err)?;
            rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(sql_err)
        })?;

        if cells.is_empty() {
            return Ok(None);
        }
        Ok(Some(ColumnRow {
            key: row_key.to_string(),
            cells,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteColumnStore {
        SqliteColumnStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn row(key: &str, title: &str) -> ColumnRow {
        let mut row = ColumnRow::new(key);
        row.put("meta", "source_title", title);
        row.put("similar", "rank_01_paper_id", "2");
        row
    }

    #[test]
    fn test_schema_on_first_use() {
        let s = store();
        assert!(s.ensure_table("sims", &["meta", "similar"]).unwrap());
        assert!(!s.ensure_table("sims", &["meta", "similar"]).unwrap());
    }

    #[test]
    fn test_put_and_get_row() {
        let s = store();
        s.ensure_table("sims", &["meta", "similar"]).unwrap();
        s.put_row("sims", &row("paper_00000001", "First")).unwrap();

        let back = s.get_row("sims", "paper_00000001").unwrap().unwrap();
        assert_eq!(back, row("paper_00000001", "First"));
        assert!(s.get_row("sims", "paper_00000002").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_all_cells() {
        let s = store();
        s.ensure_table("sims", &["meta", "similar"]).unwrap();
        let mut wide = row("k", "old");
        wide.put("similar", "rank_02_paper_id", "3");
        s.put_row("sims", &wide).unwrap();
        s.put_row("sims", &row("k", "new")).unwrap();

        let back = s.get_row("sims", "k").unwrap().unwrap();
        assert_eq!(back.cells.len(), 2);
        assert_eq!(back.get("meta:source_title"), Some("new"));
        assert_eq!(s.row_count("sims").unwrap(), 1);
    }

    #[test]
    fn test_rejected_row_leaves_previous_intact() {
        let s = store();
        s.ensure_table("sims", &["meta", "similar"]).unwrap();
        s.put_row("sims", &row("k", "kept")).unwrap();

        let mut bad = row("k", "replacement");
        bad.put("other", "x", "y");
        assert!(s.put_row("sims", &bad).is_err());

        let back = s.get_row("sims", "k").unwrap().unwrap();
        assert_eq!(back.get("meta:source_title"), Some("kept"));
    }

    #[test]
    fn test_put_into_missing_table_fails() {
        let s = store();
        assert!(s.put_row("nope", &row("k", "t")).is_err());
    }
}
