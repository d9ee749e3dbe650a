//! HBase REST gateway sink.
//!
//! Uses the Stargate JSON protocol: row keys, column names, and values are
//! base64 encoded. All calls block; the ranking cycle runs on a blocking
//! thread, never on the async runtime.
//!
//! A gateway PUT merges cells into the stored row, so `put_row` deletes
//! the columns the new row no longer carries after writing it.

use std::sync::Mutex;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{ColumnRow, ColumnSink};
use crate::error::SinkError;

#[derive(Debug, Serialize, Deserialize)]
struct CellSet {
    #[serde(rename = "Row")]
    rows: Vec<RowSet>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RowSet {
    key: String,
    #[serde(rename = "Cell")]
    cells: Vec<Cell>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Cell {
    column: String,
    #[serde(rename = "$")]
    value: String,
}

pub struct HBaseRestSink {
    base_url: String,
    timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl HBaseRestSink {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.strip_suffix('/').unwrap_or(base_url).to_string(),
            timeout,
            client: Mutex::new(None),
        }
    }

    /// Shared client, built on first use from a blocking context.
    fn client(&self) -> Result<Client, SinkError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|e| SinkError::WriteFailed(format!("client lock poisoned: {}", e)))?;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .default_headers(json_headers())
            .build()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn json_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn encode(s: &str) -> String {
    STANDARD.encode(s.as_bytes())
}

fn decode(s: &str) -> Result<String, SinkError> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| SinkError::WriteFailed(format!("invalid base64 from gateway: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| SinkError::WriteFailed(format!("non-UTF-8 cell from gateway: {}", e)))
}

fn rejected(response: Response) -> SinkError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    SinkError::Rejected { status, body }
}

/// Columns of `previous` that `next` does not write.
fn stale_columns<'a>(previous: &'a ColumnRow, next: &ColumnRow) -> Vec<&'a str> {
    previous
        .cells
        .keys()
        .filter(|column| !next.cells.contains_key(*column))
        .map(String::as_str)
        .collect()
}

/// Wire form of a row.
fn cell_set(row: &ColumnRow) -> CellSet {
    CellSet {
        rows: vec![RowSet {
            key: encode(&row.key),
            cells: row
                .cells
                .iter()
                .map(|(column, value)| Cell {
                    column: encode(column),
                    value: encode(value),
                })
                .collect(),
        }],
    }
}

impl ColumnSink for HBaseRestSink {
    fn name(&self) -> &str {
        "hbase"
    }

    fn ensure_table(&self, table: &str, families: &[&str]) -> Result<bool, SinkError> {
        let client = self.client()?;
        let schema_url = self.url(&format!("{}/schema", table));

        let probe = client.get(&schema_url).send()?;
        if probe.status() == StatusCode::OK {
            debug!(table, "Column table already exists");
            return Ok(false);
        }

        let schema = json!({
            "name": table,
            "ColumnSchema": families.iter().map(|f| json!({ "name": f })).collect::<Vec<_>>(),
        });
        let response = client.put(&schema_url).json(&schema).send()?;
        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Err(rejected(response));
        }

        info!(table, families = ?families, "Created HBase table");
        Ok(true)
    }

    fn put_row(&self, table: &str, row: &ColumnRow) -> Result<(), SinkError> {
        let previous = self.get_row(table, &row.key)?;
        let client = self.client()?;

        let response = client
            .put(self.url(&format!("{}/{}", table, row.key)))
            .json(&cell_set(row))
            .send()?;
        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Err(rejected(response));
        }

        let Some(previous) = previous else {
            return Ok(());
        };
        let stale = stale_columns(&previous, row);
        for column in &stale {
            let response = client
                .delete(self.url(&format!("{}/{}/{}", table, row.key, column)))
                .send()?;
            if !matches!(response.status(), StatusCode::OK | StatusCode::NOT_FOUND) {
                return Err(rejected(response));
            }
        }
        if !stale.is_empty() {
            debug!(table, row = %row.key, removed = stale.len(), "Dropped stale columns");
        }
        Ok(())
    }

    fn get_row(&self, table: &str, row_key: &str) -> Result<Option<ColumnRow>, SinkError> {
        let response = self
            .client()?
            .get(self.url(&format!("{}/{}", table, row_key)))
            .send()?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::OK => {}
            _ => return Err(rejected(response)),
        }

        let body: CellSet = response.json()?;
        let mut row = ColumnRow::new(row_key);
        for wire in body.rows {
            for cell in wire.cells {
                row.cells.insert(decode(&cell.column)?, decode(&cell.value)?);
            }
        }
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_set_encodes_everything() {
        let mut row = ColumnRow::new("paper_00000042");
        row.put("meta", "source_title", "Graph Networks");

        let wire = serde_json::to_value(cell_set(&row)).unwrap();
        let first = &wire["Row"][0];
        assert_eq!(first["key"], encode("paper_00000042"));
        assert_eq!(first["Cell"][0]["column"], encode("meta:source_title"));
        assert_eq!(decode(first["Cell"][0]["$"].as_str().unwrap()).unwrap(), "Graph Networks");
    }

    #[test]
    fn test_stale_columns_after_shrinking_ranking() {
        let mut previous = ColumnRow::new("paper_00000007");
        previous.put("meta", "total_similarities", "3");
        for rank in ["01", "02", "03"] {
            previous.put("similar", &format!("rank_{}_paper_id", rank), "1");
            previous.put("similar", &format!("rank_{}_score", rank), "0.5");
        }

        let mut next = ColumnRow::new("paper_00000007");
        next.put("meta", "total_similarities", "1");
        next.put("similar", "rank_01_paper_id", "9");
        next.put("similar", "rank_01_score", "0.9");

        assert_eq!(
            stale_columns(&previous, &next),
            vec![
                "similar:rank_02_paper_id",
                "similar:rank_02_score",
                "similar:rank_03_paper_id",
                "similar:rank_03_score",
            ]
        );
        assert!(stale_columns(&next, &previous).is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let sink = HBaseRestSink::new("http://localhost:8080/", Duration::from_secs(1));
        assert_eq!(sink.url("t/schema"), "http://localhost:8080/t/schema");
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(decode("!!!").is_err());
    }
}
