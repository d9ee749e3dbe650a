//! Column-oriented sinks for ranked results.
//!
//! A sink stores rows of `family:qualifier` cells under a row key. Each
//! `put_row` replaces the row: columns absent from the new row are gone
//! afterwards. The memory and SQLite sinks swap the row atomically; the
//! HBase sink writes the new cells first, then deletes the stale ones.

pub mod hbase;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use crate::error::SinkError;

pub use hbase::HBaseRestSink;
pub use memory::MemorySink;
pub use sqlite::SqliteColumnStore;

/// One row of cells keyed by full column name (`family:qualifier`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnRow {
    pub key: String,
    pub cells: BTreeMap<String, String>,
}

impl ColumnRow {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn put(&mut self, family: &str, qualifier: &str, value: impl Into<String>) {
        self.cells
            .insert(format!("{}:{}", family, qualifier), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    /// Column families referenced by this row.
    pub fn families(&self) -> Vec<&str> {
        let mut families: Vec<&str> = self.cells.keys().map(|c| family_of(c)).collect();
        families.dedup();
        families
    }
}

/// Family part of a `family:qualifier` column name.
pub fn family_of(column: &str) -> &str {
    column.split_once(':').map(|(f, _)| f).unwrap_or(column)
}

/// Destination for ranked rows.
pub trait ColumnSink: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Create `table` with `families` if absent.
    ///
    /// Returns `true` when the table was created by this call.
    fn ensure_table(&self, table: &str, families: &[&str]) -> Result<bool, SinkError>;

    /// Write a row, replacing any previous row with the same key.
    fn put_row(&self, table: &str, row: &ColumnRow) -> Result<(), SinkError>;

    fn get_row(&self, table: &str, row_key: &str) -> Result<Option<ColumnRow>, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_families_are_deduplicated() {
        let mut row = ColumnRow::new("paper_00000001");
        row.put("meta", "source_title", "A");
        row.put("similar", "rank_01_score", "0.5");
        row.put("meta", "model", "m");
        assert_eq!(row.families(), vec!["meta", "similar"]);
        assert_eq!(row.get("meta:model"), Some("m"));
    }

    #[test]
    fn test_family_of_without_separator() {
        assert_eq!(family_of("meta:x"), "meta");
        assert_eq!(family_of("bare"), "bare");
    }
}
