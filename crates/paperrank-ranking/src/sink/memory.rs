//! In-process sink for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use super::{family_of, ColumnRow, ColumnSink};
use crate::error::SinkError;

#[derive(Debug, Default)]
struct MemoryTable {
    families: BTreeSet<String>,
    rows: BTreeMap<String, ColumnRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    failing_keys: HashSet<String>,
    tables_created: usize,
}

/// A sink holding rows in memory.
///
/// Specific row keys can be made to fail, to exercise per-row error
/// handling in the writer.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future write of `row_key` fail.
    pub fn fail_on(&self, row_key: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_keys.insert(row_key.to_string());
        }
    }

    /// Number of tables this sink has created.
    pub fn tables_created(&self) -> usize {
        self.state.lock().map(|s| s.tables_created).unwrap_or(0)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).map(|t| t.rows.len()))
            .unwrap_or(0)
    }

    /// All row keys of a table in key order.
    pub fn row_keys(&self, table: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).map(|t| t.rows.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, SinkError> {
        self.state
            .lock()
            .map_err(|e| SinkError::WriteFailed(format!("sink lock poisoned: {}", e)))
    }
}

impl ColumnSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn ensure_table(&self, table: &str, families: &[&str]) -> Result<bool, SinkError> {
        let mut state = self.lock()?;
        if state.tables.contains_key(table) {
            return Ok(false);
        }
        let entry = MemoryTable {
            families: families.iter().map(|f| f.to_string()).collect(),
            rows: BTreeMap::new(),
        };
        state.tables.insert(table.to_string(), entry);
        state.tables_created += 1;
        Ok(true)
    }

    fn put_row(&self, table: &str, row: &ColumnRow) -> Result<(), SinkError> {
        let mut state = self.lock()?;
        if state.failing_keys.contains(&row.key) {
            return Err(SinkError::WriteFailed(format!("injected failure for {}", row.key)));
        }
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SinkError::MissingTable(table.to_string()))?;

        if let Some(column) = row
            .cells
            .keys()
            .find(|c| !target.families.contains(family_of(c)))
        {
            return Err(SinkError::UnknownFamily {
                table: table.to_string(),
                family: family_of(column).to_string(),
            });
        }

        target.rows.insert(row.key.clone(), row.clone());
        Ok(())
    }

    fn get_row(&self, table: &str, row_key: &str) -> Result<Option<ColumnRow>, SinkError> {
        let state = self.lock()?;
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.rows.get(row_key).cloned()))
    }
}
