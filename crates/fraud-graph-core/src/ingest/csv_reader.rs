//! Transaction CSV reader.
//!
//! ## Format
//!
//! ```csv
//! transaction_id,account_id,merchant_id,device_id,transaction_amount,transaction_timestamp,is_fraud,device_type,country,merchant_category
//! t1,A1,M1,D1,42.50,2024-01-01 10:15:00,0,mobile,US,grocery
//! ```
//!
//! - `account_id`, `merchant_id`, `device_id`, `transaction_amount`,
//!   `transaction_timestamp` and `is_fraud` are required headers
//! - a `device_id` cell may be empty: the transaction has no device edge
//! - every other column is optional; empty cells read as absent
//! - rows that fail to parse are logged and skipped

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::StringRecord;
use tracing::{info, warn};

use super::columns;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionRecord;

/// Parsed records plus the number of rows that were rejected.
#[derive(Debug, Clone, Default)]
pub struct LoadedTransactions {
    pub records: Vec<TransactionRecord>,
    pub skipped_rows: usize,
}

/// Read transactions from a CSV file.
pub fn read_transactions_csv<P: AsRef<Path>>(path: P) -> CoreResult<LoadedTransactions> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CoreError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let file = std::fs::File::open(path)?;
    read_transactions(file, &path.display().to_string())
}

/// Read transactions from any CSV source. `source_name` is used in errors and logs.
pub fn read_transactions<R: Read>(reader: R, source_name: &str) -> CoreResult<LoadedTransactions> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: HashMap<String, usize> = reader
        .headers()
        .map_err(|e| CoreError::Csv {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_lowercase(), i))
        .collect();

    for required in columns::REQUIRED {
        if !headers.contains_key(required) {
            return Err(CoreError::MissingColumn {
                source_name: source_name.to_string(),
                column: required.to_string(),
            });
        }
    }

    let mut loaded = LoadedTransactions::default();

    for (row_idx, result) in reader.records().enumerate() {
        // +2 for header and 1-indexing
        let row = row_idx + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(source = source_name, row, error = %e, "Skipping unreadable CSV row");
                loaded.skipped_rows += 1;
                continue;
            }
        };

        match parse_row(&headers, &record, row) {
            Ok(parsed) => loaded.records.push(parsed),
            Err(e) => {
                warn!(source = source_name, row, error = %e, "Skipping invalid transaction row");
                loaded.skipped_rows += 1;
            }
        }
    }

    if loaded.records.is_empty() {
        return Err(CoreError::EmptyDataset {
            source_name: source_name.to_string(),
        });
    }

    info!(
        source = source_name,
        records = loaded.records.len(),
        skipped = loaded.skipped_rows,
        "Loaded transactions"
    );
    Ok(loaded)
}

fn cell<'r>(headers: &HashMap<String, usize>, record: &'r StringRecord, name: &str) -> Option<&'r str> {
    headers
        .get(name)
        .and_then(|&i| record.get(i))
        .filter(|v| !v.is_empty())
}

fn required<'r>(
    headers: &HashMap<String, usize>,
    record: &'r StringRecord,
    name: &str,
    row: usize,
) -> CoreResult<&'r str> {
    cell(headers, record, name).ok_or_else(|| CoreError::InvalidRecord {
        row,
        column: name.to_string(),
        message: "value is empty".into(),
    })
}

fn parse_row(
    headers: &HashMap<String, usize>,
    record: &StringRecord,
    row: usize,
) -> CoreResult<TransactionRecord> {
    let field = |name: &str| required(headers, record, name, row);
    let optional = |name: &str| cell(headers, record, name).map(str::to_string);

    let amount_raw = field(columns::TRANSACTION_AMOUNT)?;
    let amount: f64 = amount_raw.parse().map_err(|_| CoreError::InvalidRecord {
        row,
        column: columns::TRANSACTION_AMOUNT.into(),
        message: format!("'{}' is not a number", amount_raw),
    })?;
    if !amount.is_finite() {
        return Err(CoreError::InvalidRecord {
            row,
            column: columns::TRANSACTION_AMOUNT.into(),
            message: "amount must be finite".into(),
        });
    }

    let ts_raw = field(columns::TRANSACTION_TIMESTAMP)?;
    let timestamp = parse_timestamp(ts_raw).ok_or_else(|| CoreError::InvalidRecord {
        row,
        column: columns::TRANSACTION_TIMESTAMP.into(),
        message: format!("unrecognized timestamp '{}'", ts_raw),
    })?;

    let fraud_raw = field(columns::IS_FRAUD)?;
    let is_fraud = parse_flag(fraud_raw).ok_or_else(|| CoreError::InvalidRecord {
        row,
        column: columns::IS_FRAUD.into(),
        message: format!("expected 0/1/true/false, got '{}'", fraud_raw),
    })?;

    let mut parsed = TransactionRecord::new(
        field(columns::ACCOUNT_ID)?,
        field(columns::MERCHANT_ID)?,
        optional(columns::DEVICE_ID),
        amount,
        timestamp,
        is_fraud,
    );
    parsed.transaction_id = optional(columns::TRANSACTION_ID);
    parsed.device_type = optional(columns::DEVICE_TYPE);
    parsed.country = optional(columns::COUNTRY);
    parsed.merchant_category = optional(columns::MERCHANT_CATEGORY);
    Ok(parsed)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` (UTC) or epoch seconds.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Some(true),
        "0" | "false" | "f" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const HEADER: &str = "transaction_id,account_id,merchant_id,device_id,transaction_amount,transaction_timestamp,is_fraud,device_type,country,merchant_category\n";

    #[test]
    fn test_reads_valid_rows() {
        let csv = format!(
            "{}t1,A1,M1,D1,42.5,2024-01-01 10:15:00,0,mobile,US,grocery\nt2,A2,M1,,10,2024-01-02T08:00:00Z,true,,,\n",
            HEADER
        );
        let loaded = read_transactions(csv.as_bytes(), "inline").unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.skipped_rows, 0);

        let first = &loaded.records[0];
        assert_eq!(first.transaction_id.as_deref(), Some("t1"));
        assert_eq!(first.device_id.as_deref(), Some("D1"));
        assert_eq!(first.transaction_timestamp.hour(), 10);
        assert!(!first.is_fraud);
        assert_eq!(first.merchant_category.as_deref(), Some("grocery"));

        let second = &loaded.records[1];
        assert!(second.device_id.is_none());
        assert!(second.is_fraud);
        assert_eq!(second.transaction_timestamp.day(), 2);
    }

    #[test]
    fn test_bad_rows_are_skipped_and_counted() {
        let csv = format!(
            "{}t1,A1,M1,D1,abc,2024-01-01 10:15:00,0,,,\nt2,A2,M1,D1,5,not-a-date,0,,,\nt3,A3,M2,D2,5,2024-01-01 00:00:00,maybe,,,\nt4,A4,M2,D2,5,2024-01-01 00:00:00,1,,,\n",
            HEADER
        );
        let loaded = read_transactions(csv.as_bytes(), "inline").unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.skipped_rows, 3);
        assert_eq!(loaded.records[0].account_id, "A4");
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "account_id,merchant_id,device_id,transaction_amount,is_fraud\nA1,M1,D1,1.0,0\n";
        let err = read_transactions(csv.as_bytes(), "partial.csv").unwrap_err();
        match err {
            CoreError::MissingColumn {
                source_name,
                column,
            } => {
                assert_eq!(source_name, "partial.csv");
                assert_eq!(column, "transaction_timestamp");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_device_column_is_named() {
        let csv = "account_id,merchant_id,transaction_amount,transaction_timestamp,is_fraud\nA1,M1,1.0,1704067200,0\n";
        match read_transactions(csv.as_bytes(), "no_devices.csv").unwrap_err() {
            CoreError::MissingColumn { column, .. } => assert_eq!(column, "device_id"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let err = read_transactions(HEADER.as_bytes(), "empty.csv").unwrap_err();
        assert!(matches!(err, CoreError::EmptyDataset { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = read_transactions_csv("/nonexistent/transactions.csv").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/transactions.csv"));
    }

    #[test]
    fn test_reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx.csv");
        std::fs::write(
            &path,
            format!("{}t1,A1,M1,D1,1.0,1704067200,1,,,\n", HEADER),
        )
        .unwrap();
        let loaded = read_transactions_csv(&path).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].transaction_timestamp.year(), 2024);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T12:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:00").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:00.250").is_some());
        assert!(parse_timestamp("1700000000").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
