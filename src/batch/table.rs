//! Delimited-text tables: a header row plus string cells.

use super::BatchError;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Read a table whose first record is the header. Rows may be ragged.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, BatchError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if headers.iter().all(String::is_empty) {
            return Err(BatchError::EmptyTable);
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?.iter().map(String::from).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Read from a file; `.tsv` and `.tab` files are tab-delimited.
    pub fn from_path(path: &Path) -> Result<Self, BatchError> {
        let file = File::open(path)?;
        Self::from_reader(file, delimiter_for(path))
    }

    /// Header position by name. Exact match first, then case-insensitive.
    pub fn column_index(&self, name: &str) -> Result<usize, BatchError> {
        let wanted = name.trim();
        self.headers
            .iter()
            .position(|h| h == wanted)
            .or_else(|| self.headers.iter().position(|h| h.eq_ignore_ascii_case(wanted)))
            .ok_or_else(|| BatchError::MissingColumn {
                column: wanted.to_string(),
                available: self.headers.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn delimiter_for(path: &Path) -> u8 {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("tab") => b'\t',
        _ => b',',
    }
}
