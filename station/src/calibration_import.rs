//! Parsing of calibration sample files for `calibration_tool import`.
//!
//! Two formats are accepted:
//!
//! - CSV, one `pixel_y,distance_ft` record per line. Lines starting with `#`
//!   and a non-numeric header record are skipped.
//! - A JSON array of `{"pixel_y": .., "distance_ft": ..}` objects.
//!
//! Samples keep the order they appear in. Validation is left to
//! [`shared::CalibrationModel::build`].

use shared::CalibrationSample;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("line {line}: {reason}")]
    BadLine { line: u64, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid JSON sample list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no samples found")]
    Empty,
}

pub fn parse_samples(text: &str) -> Result<Vec<CalibrationSample>, ImportError> {
    let samples = if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<CalibrationSample>>(text)?
    } else {
        parse_csv(text)?
    };
    if samples.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(samples)
}

fn is_header(record: &csv::StringRecord) -> bool {
    record
        .get(0)
        .is_some_and(|field| field.parse::<f64>().is_err())
}

fn parse_csv(text: &str) -> Result<Vec<CalibrationSample>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut samples = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 1);

        if index == 0 && is_header(&record) {
            continue;
        }
        if record.len() != 2 {
            return Err(ImportError::BadLine {
                line,
                reason: format!("expected 2 fields, found {}", record.len()),
            });
        }

        let sample: CalibrationSample =
            record
                .deserialize(None)
                .map_err(|e| ImportError::BadLine {
                    line,
                    reason: e.to_string(),
                })?;
        samples.push(sample);
    }
    Ok(samples)
}
