//! Streaming reader for the enriched accident table (CSV with a header row).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::{DeserializeRecordsIntoIter, ReaderBuilder};
use tracing::{info, warn};

use causegraph_common::AccidentRecord;

/// Columns the enrichment stage writes. Only `Oid` is mandatory.
pub const EXPECTED_COLUMNS: [&str; 13] = [
    "Oid",
    "NtsbNumber",
    "EventDate",
    "HighestInjury",
    "ProbableCause",
    "City",
    "State",
    "Country",
    "Latitude",
    "Longitude",
    "Vehicles",
    "TopicID",
    "TopicName",
];

/// A CSV row that could not be decoded at all.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableRow {
    /// 1-based data row, header excluded.
    pub row: usize,
    pub line: Option<u64>,
    pub reason: String,
}

/// Yields `(row, record)` pairs in file order, `row` being the 1-based data
/// row. Rows the CSV decoder rejects are logged, collected in
/// [`TableReader::unreadable`], and skipped without shifting later row numbers.
pub struct TableReader<R: Read> {
    records: DeserializeRecordsIntoIter<R, AccidentRecord>,
    rows_read: usize,
    unreadable: Vec<UnreadableRow>,
}

impl TableReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Input table not found: {}", path.display()))?;
        info!(path = %path.display(), "Loading accident table");
        Self::from_reader(file)
    }
}

impl<R: Read> TableReader<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut csv = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = csv.headers().context("Failed to read table header")?.clone();
        let present = |name: &str| headers.iter().any(|h| h.trim() == name);
        if !present("Oid") {
            bail!("Input table has no Oid column");
        }
        let missing: Vec<&str> = EXPECTED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !present(c))
            .collect();
        if !missing.is_empty() {
            warn!(columns = ?missing, "Input table is missing columns, values will be absent");
        }

        Ok(Self {
            records: csv.into_deserialize(),
            rows_read: 0,
            unreadable: Vec::new(),
        })
    }

    pub fn unreadable(&self) -> &[UnreadableRow] {
        &self.unreadable
    }
}

impl<R: Read> Iterator for TableReader<R> {
    type Item = (usize, AccidentRecord);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = self.records.next()?;
            self.rows_read += 1;
            let row = self.rows_read;
            match result {
                Ok(record) => return Some((row, record)),
                Err(e) => {
                    let line = e.position().map(|p| p.line());
                    warn!(row, line, error = %e, "Unreadable table row, skipping");
                    self.unreadable.push(UnreadableRow {
                        row,
                        line,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
