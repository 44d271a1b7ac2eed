//! Batch driver: resolves every row of a table, one at a time.
//!
//! Rows are processed sequentially so the rate-limited provider's pacing
//! holds across the whole upload. Output order and row count always match
//! the input.

pub mod table;

pub use table::Table;

use crate::geocode::{AddressResolver, GeocodeRequest, GeocodeResult, RawPinCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

/// Columns appended to every exported row, in order.
pub const RESULT_COLUMNS: [&str; 5] = [
    "Latitude",
    "Longitude",
    "Formatted_Address",
    "Geocoding_Status",
    "Geocoding_Service",
];

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse table: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("column '{column}' not found (available: {})", available.join(", "))]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },
    #[error("the table has no header row")]
    EmptyTable,
}

/// Which headers hold the address and the pin code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub address: String,
    pub pin_code: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub state: Option<String>,
    /// Process only the first N rows. `None` or `Some(0)` means all.
    pub max_records: Option<usize>,
}

/// Reported before each row is resolved.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Zero-based row index.
    pub index: usize,
    pub total: usize,
    pub address: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedRow {
    pub values: Vec<String>,
    pub result: GeocodeResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage, 0–100.
    pub success_rate: f64,
    /// Rows per `Geocoding_Service` value, including "None".
    pub provider_usage: BTreeMap<String, usize>,
}

impl BatchSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a GeocodeResult>) -> Self {
        let mut total = 0;
        let mut succeeded = 0;
        let mut provider_usage = BTreeMap::new();
        for r in results {
            total += 1;
            if r.is_success() {
                succeeded += 1;
            }
            *provider_usage.entry(r.provider_name.clone()).or_insert(0) += 1;
        }
        let success_rate = if total > 0 {
            succeeded as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            success_rate,
            provider_usage,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total processed:       {}", self.total)?;
        writeln!(f, "Successfully geocoded: {}", self.succeeded)?;
        writeln!(f, "Failed:                {}", self.failed)?;
        write!(f, "Success rate:          {:.1}%", self.success_rate)?;
        for (service, count) in &self.provider_usage {
            write!(f, "\n  {:<20} {}", service, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub headers: Vec<String>,
    pub columns: ReportColumns,
    pub rows: Vec<GeocodedRow>,
    pub summary: BatchSummary,
    pub generated_at: DateTime<Utc>,
}

/// Positions of the mapped columns within `headers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportColumns {
    pub address: usize,
    pub pin_code: usize,
}

impl BatchReport {
    pub fn successful_rows(&self) -> impl Iterator<Item = &GeocodedRow> {
        self.rows.iter().filter(|r| r.result.is_success())
    }

    /// Original columns followed by `RESULT_COLUMNS`.
    pub fn write_delimited<W: Write>(&self, writer: W, delimiter: u8) -> Result<(), BatchError> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .flexible(false)
            .from_writer(writer);

        let mut header: Vec<&str> = self.headers.iter().map(String::as_str).collect();
        header.extend(RESULT_COLUMNS);
        wtr.write_record(&header)?;

        let width = self.headers.len();
        for row in &self.rows {
            let mut record: Vec<String> = row.values.clone();
            record.resize(width, String::new());
            let r = &row.result;
            record.push(r.latitude.map(|v| v.to_string()).unwrap_or_default());
            record.push(r.longitude.map(|v| v.to_string()).unwrap_or_default());
            record.push(r.matched_address.clone().unwrap_or_default());
            record.push(r.outcome.status_label());
            record.push(r.provider_name.clone());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, BatchError> {
        let mut buf = Vec::new();
        self.write_delimited(&mut buf, b',')?;
        String::from_utf8(buf).map_err(|e| BatchError::Io(std::io::Error::other(e)))
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), BatchError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Resolve every selected row of `table`. Only file-level problems (a
/// missing column) return an error; row problems land in that row's result.
pub fn run_batch(
    resolver: &AddressResolver,
    table: &Table,
    columns: &ColumnMapping,
    options: &BatchOptions,
    mut on_progress: impl FnMut(Progress<'_>),
) -> Result<BatchReport, BatchError> {
    let address_idx = table.column_index(&columns.address)?;
    let pin_idx = table.column_index(&columns.pin_code)?;

    let limit = match options.max_records {
        Some(n) if n > 0 => n.min(table.len()),
        _ => table.len(),
    };

    let mut rows = Vec::with_capacity(limit);
    for (index, values) in table.rows.iter().take(limit).enumerate() {
        let address = values.get(address_idx).map(String::as_str).unwrap_or("");
        on_progress(Progress {
            index,
            total: limit,
            address,
        });

        let result = match (values.get(address_idx), values.get(pin_idx)) {
            (Some(address), Some(pin)) => {
                let request = GeocodeRequest::new(address.as_str(), RawPinCode::from(pin.as_str()))
                    .with_state(options.state.clone());
                resolver.resolve(&request)
            }
            (None, _) => missing_cell(&table.headers[address_idx]),
            (_, None) => missing_cell(&table.headers[pin_idx]),
        };

        rows.push(GeocodedRow {
            values: values.clone(),
            result,
        });
    }

    let summary = BatchSummary::from_results(rows.iter().map(|r| &r.result));
    log::info!(
        "Batch done: {}/{} geocoded ({:.1}%)",
        summary.succeeded,
        summary.total,
        summary.success_rate
    );

    Ok(BatchReport {
        headers: table.headers.clone(),
        columns: ReportColumns {
            address: address_idx,
            pin_code: pin_idx,
        },
        rows,
        summary,
        generated_at: Utc::now(),
    })
}

fn missing_cell(column: &str) -> GeocodeResult {
    GeocodeResult::error(format!("missing cell for column '{}'", column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::resolver::testing::*;
    use crate::geocode::{FailureReason, Outcome};
    use std::time::Duration;

    const CSV: &str = "Store,Address,Pin Code\n\
        S1,MG Road Pharmacy,560001.0\n\
        S2,ab,110001\n\
        S3,,\n\
        S4,Park Street Chemist,700016\n";

    fn mapping() -> ColumnMapping {
        ColumnMapping {
            address: "Address".into(),
            pin_code: "Pin Code".into(),
        }
    }

    fn stub_resolver(log: &CallLog) -> AddressResolver {
        let primary = StubProvider::new("Nominatim", Duration::from_secs(1), Reply::Empty, log)
            .reply("MG Road Pharmacy, 560001, India", Reply::Found(12.97, 77.60));
        let secondary = StubProvider::new("GoogleMaps", Duration::ZERO, Reply::Empty, log)
            .reply("Park Street Chemist, 700016, India", Reply::Found(22.55, 88.35));
        AddressResolver::new(vec![Box::new(primary), Box::new(secondary)], quiet_policy())
            .with_pause(Box::new(RecordingPause::default()))
    }

    fn run(csv: &str, options: &BatchOptions) -> Result<BatchReport, BatchError> {
        let log = new_log();
        let table = Table::from_reader(csv.as_bytes(), b',')?;
        run_batch(&stub_resolver(&log), &table, &mapping(), options, |_| {})
    }

    #[test]
    fn test_rows_preserved_in_order() {
        let report = run(CSV, &BatchOptions::default()).unwrap();
        let stores: Vec<&str> = report.rows.iter().map(|r| r.values[0].as_str()).collect();
        assert_eq!(stores, vec!["S1", "S2", "S3", "S4"]);

        assert_eq!(report.rows[0].result.provider_name, "Nominatim");
        assert_eq!(
            report.rows[1].result.outcome,
            Outcome::Failed(FailureReason::TooShortOrInvalid)
        );
        assert_eq!(
            report.rows[2].result.outcome,
            Outcome::Failed(FailureReason::MissingInput)
        );
        assert_eq!(report.rows[3].result.provider_name, "GoogleMaps");
    }

    #[test]
    fn test_summary() {
        let report = run(CSV, &BatchOptions::default()).unwrap();
        let s = &report.summary;
        assert_eq!((s.total, s.succeeded, s.failed), (4, 2, 2));
        assert!((s.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(s.provider_usage["Nominatim"], 1);
        assert_eq!(s.provider_usage["GoogleMaps"], 1);
        assert_eq!(s.provider_usage["None"], 2);
    }

    #[test]
    fn test_empty_summary() {
        let s = BatchSummary::from_results(std::iter::empty());
        assert_eq!(s.total, 0);
        assert_eq!(s.success_rate, 0.0);
    }

    #[test]
    fn test_max_records() {
        let options = BatchOptions {
            max_records: Some(2),
            ..Default::default()
        };
        let report = run(CSV, &options).unwrap();
        assert_eq!(report.rows.len(), 2);

        let options = BatchOptions {
            max_records: Some(0),
            ..Default::default()
        };
        assert_eq!(run(CSV, &options).unwrap().rows.len(), 4);
    }

    #[test]
    fn test_missing_column_is_file_level() {
        let err = run("Store,Addr\nS1,x\n", &BatchOptions::default()).unwrap_err();
        assert!(matches!(err, BatchError::MissingColumn { ref column, .. } if column == "Address"));
        assert!(err.to_string().contains("available: Store, Addr"));
    }

    #[test]
    fn test_short_row_gets_error_result() {
        let report = run("Store,Address,Pin Code\nS1,Park Street Chemist\n", &BatchOptions::default()).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(
            report.rows[0].result.outcome.status_label(),
            "ERROR: missing cell for column 'Pin Code'"
        );
    }

    #[test]
    fn test_progress_callback() {
        let log = new_log();
        let table = Table::from_reader(CSV.as_bytes(), b',').unwrap();
        let mut seen = Vec::new();
        run_batch(&stub_resolver(&log), &table, &mapping(), &BatchOptions::default(), |p| {
            seen.push((p.index, p.total, p.address.to_string()))
        })
        .unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (0, 4, "MG Road Pharmacy".to_string()));
        assert_eq!(seen[3].0, 3);
    }

    #[test]
    fn test_csv_export() {
        let report = run(CSV, &BatchOptions::default()).unwrap();
        let out = report.to_csv_string().unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Store,Address,Pin Code,Latitude,Longitude,Formatted_Address,Geocoding_Status,Geocoding_Service"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("S1,MG Road Pharmacy,560001.0,12.97,77.6,"));
        assert!(first.ends_with(",SUCCESS,Nominatim"));
        assert_eq!(lines.next().unwrap(), "S2,ab,110001,,,,FAILED,None");
        assert_eq!(out.lines().count(), 5);
    }

    #[test]
    fn test_tsv_export_pads_short_rows() {
        let report = run("Store,Address,Pin Code\nS1,Park Street Chemist\n", &BatchOptions::default()).unwrap();
        let mut buf = Vec::new();
        report.write_delimited(&mut buf, b'\t').unwrap();
        let out = String::from_utf8(buf).unwrap();
        let row = out.lines().nth(1).unwrap();
        assert_eq!(row.split('\t').count(), 3 + RESULT_COLUMNS.len());
    }

    #[test]
    fn test_json_export() {
        let report = run(CSV, &BatchOptions::default()).unwrap();
        let mut buf = Vec::new();
        report.write_json(&mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["summary"]["total"], 4);
        assert_eq!(v["rows"][1]["result"]["outcome"]["detail"], "Too short or invalid");
    }
}
