//! CSV upload parsing.
//!
//! Maps spreadsheet exports onto canonical incident drafts. Header names
//! vary between ticket systems ("Short description", "Issue summary", ...)
//! so matching is case-insensitive and underscore-tolerant. The engine never
//! sees spreadsheet structure, only `IncidentDraft` rows.

use crate::incidents::IncidentDraft;

/// Accepted headers for the incident description column.
const DESCRIPTION_COLUMNS: &[&str] = &[
    "short description",
    "description",
    "issue summary",
    "summary",
    "problem",
];

/// Accepted headers for the resolution column.
const RESOLUTION_COLUMNS: &[&str] = &[
    "resolved",
    "resolution",
    "resolved solution",
    "resolution notes",
    "solution",
    "fix",
];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No description column found; accepted headers: {0}")]
    MissingDescriptionColumn(String),
}

/// Parse CSV bytes into incident drafts.
///
/// A description column is required; a resolution column is optional (rows
/// without one become unresolved reference incidents). Row-level validation
/// is the ingestion pipeline's job, so empty cells pass through untouched.
pub fn parse_csv(data: &[u8]) -> Result<Vec<IncidentDraft>, UploadError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);

    let headers = reader.headers()?.clone();

    let description_idx = find_column(&headers, DESCRIPTION_COLUMNS).ok_or_else(|| {
        UploadError::MissingDescriptionColumn(DESCRIPTION_COLUMNS.join(", "))
    })?;
    let resolution_idx = find_column(&headers, RESOLUTION_COLUMNS);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;

        rows.push(IncidentDraft {
            description: record.get(description_idx).unwrap_or("").to_string(),
            resolution: resolution_idx
                .and_then(|idx| record.get(idx))
                .unwrap_or("")
                .to_string(),
        });
    }

    Ok(rows)
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|header| candidates.contains(&normalize_header(header).as_str()))
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace('_', " ")
}
