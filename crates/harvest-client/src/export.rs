use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use harvest_core::error::AppError;
use harvest_core::models::Record;

use crate::snapshot::SNAPSHOT_FIELDS;

const NOT_AUTHORIZED_COLUMN: &str = "notAuthorized";
const OUT_OF_SERVICE_COLUMN: &str = "outOfService";

/// Write records as CSV.
///
/// Columns are the snapshot fields present in any record, in page order,
/// then any other field names in first-seen order, then the two
/// classification flags. Missing fields are written as empty cells.
pub fn write_csv<W: Write>(records: &[Record], writer: W) -> Result<(), AppError> {
    if records.is_empty() {
        return Err(AppError::ConfigError("No data to export".into()));
    }

    let mut columns: Vec<&str> = SNAPSHOT_FIELDS
        .iter()
        .copied()
        .filter(|name| records.iter().any(|r| r.fields.contains_key(*name)))
        .collect();
    for record in records {
        for name in record.fields.keys() {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(
        columns
            .iter()
            .copied()
            .chain([NOT_AUTHORIZED_COLUMN, OUT_OF_SERVICE_COLUMN]),
    )
    .map_err(io::Error::from)?;

    for record in records {
        let mut row: Vec<String> = columns
            .iter()
            .map(|c| record.get(c).unwrap_or_default().to_string())
            .collect();
        row.push(record.not_authorized.to_string());
        row.push(record.out_of_service.to_string());
        wtr.write_record(&row).map_err(io::Error::from)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_csv_file(records: &[Record], path: &Path) -> Result<(), AppError> {
    if records.is_empty() {
        return Err(AppError::ConfigError("No data to export".into()));
    }
    let file = File::create(path)?;
    write_csv(records, file)?;
    tracing::info!(path = %path.display(), count = records.len(), "Records exported");
    Ok(())
}
