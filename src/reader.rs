//! CSV row extraction.
//!
//! Produces the `(headers, rows)` shape the normalizer consumes. The header
//! row index is a parameter so callers can re-read the same file assuming a
//! different header position when an export starts with preamble rows.

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Result, TrackError};
use crate::{CellValue, RawRow, RawSheet};

const DELIMITER_CANDIDATES: [u8; 3] = [b',', b';', b'\t'];

/// Read a CSV file assuming the header is record `header_row` (0-based).
pub fn read_csv(path: impl AsRef<Path>, header_row: usize) -> Result<RawSheet> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let content = decode_text(&bytes, path);
    debug!(
        "[Reader] {} ({} bytes), header row {}",
        path.display(),
        bytes.len(),
        header_row
    );
    read_csv_str(&content, header_row)
}

/// Decode file bytes as UTF-8, replacing invalid sequences.
///
/// Exports saved in a legacy code page lose their non-ASCII headers here and
/// will not match any alias, so the replacement is logged.
pub fn decode_text<'a>(bytes: &'a [u8], path: &Path) -> Cow<'a, str> {
    let content = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = content {
        warn!(
            "[Reader] {} is not valid UTF-8, invalid bytes were replaced",
            path.display()
        );
    }
    content
}

/// Parse CSV text assuming the header is record `header_row` (0-based).
///
/// Records before the header row are ignored. Blank header cells are named
/// `column_<n>` (1-based) and repeated names get a `_<n>` suffix, so every
/// cell stays addressable.
pub fn read_csv_str(content: &str, header_row: usize) -> Result<RawSheet> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let delimiter = sniff_delimiter(content, header_row);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut records = reader.records().skip(header_row);

    let header = records.next().ok_or(TrackError::NoHeaders)??;
    if header.iter().all(|cell| cell.trim().is_empty()) {
        return Err(TrackError::NoHeaders);
    }

    let mut seen = HashSet::new();
    let headers: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let trimmed = cell.trim();
            let name = if trimmed.is_empty() {
                format!("column_{}", i + 1)
            } else {
                trimmed.to_string()
            };
            unique_name(name, &mut seen)
        })
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let row: RawRow = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let cell = record.get(i).map(CellValue::from_text).unwrap_or(CellValue::Empty);
                (header.clone(), cell)
            })
            .collect();
        rows.push(row);
    }

    Ok(RawSheet { headers, rows })
}

/// First unused of `name`, `name_1`, `name_2`, ...
fn unique_name(name: String, seen: &mut HashSet<String>) -> String {
    let mut candidate = name.clone();
    let mut n = 1;
    while seen.contains(&candidate) {
        candidate = format!("{}_{}", name, n);
        n += 1;
    }
    seen.insert(candidate.clone());
    candidate
}

/// Pick the delimiter appearing most often (outside quotes) on the header line.
///
/// Only truly empty lines are skipped, matching how the csv reader counts
/// records; a whitespace-only line is still a record.
fn sniff_delimiter(content: &str, header_row: usize) -> u8 {
    let line = content
        .lines()
        .filter(|l| !l.is_empty())
        .nth(header_row)
        .or_else(|| content.lines().next())
        .unwrap_or("");

    let mut counts = [0usize; DELIMITER_CANDIDATES.len()];
    let mut in_quotes = false;
    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = DELIMITER_CANDIDATES.iter().position(|&d| d == byte) {
            counts[idx] += 1;
        }
    }

    // Ties keep the earliest candidate, so plain CSV stays comma-delimited
    let mut best = 0;
    for (idx, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = idx;
        }
    }
    DELIMITER_CANDIDATES[best]
}
