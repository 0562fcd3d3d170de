use crate::error::{EvalError, Result};
use crate::models::InteractionLog;
use crate::utils::validation::validate_raw_interaction;
use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::info;

const COLUMNS: [&str; 4] = ["user_id", "item_id", "event_type", "timestamp"];

/// An interaction record as it arrives, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInteraction {
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub item_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    JsonLines,
    Csv,
}

impl RecordFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" | "json" => Some(RecordFormat::JsonLines),
            "csv" => Some(RecordFormat::Csv),
            _ => None,
        }
    }
}

pub fn load_path(path: &Path) -> Result<InteractionLog> {
    let format = RecordFormat::from_path(path).ok_or_else(|| {
        EvalError::InvalidConfig(format!(
            "cannot infer record format of {} (expected .jsonl or .csv)",
            path.display()
        ))
    })?;

    let reader = BufReader::new(File::open(path)?);
    let log = match format {
        RecordFormat::JsonLines => read_json_lines(reader)?,
        RecordFormat::Csv => read_csv(reader)?,
    };

    info!("Loaded {} interactions from {}", log.len(), path.display());
    Ok(log)
}

/// One JSON object per line. Blank lines are skipped; anything else that does
/// not validate fails the whole load.
pub fn read_json_lines<R: BufRead>(reader: R) -> Result<InteractionLog> {
    let mut interactions = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let raw: RawInteraction =
            serde_json::from_str(&line).map_err(|e| EvalError::DataValidation {
                line: line_no,
                reason: format!("malformed JSON: {}", e),
            })?;
        interactions.push(validate_raw_interaction(line_no, raw)?);
    }

    Ok(InteractionLog::from_unsorted(interactions))
}

/// Headed CSV (RFC 4180 quoting); column order is taken from the header.
pub fn read_csv<R: Read>(reader: R) -> Result<InteractionLog> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let header = reader.headers().map_err(csv_error)?.clone();
    if header.is_empty() {
        return Ok(InteractionLog::default());
    }

    let mut positions = [0usize; 4];
    for (slot, column) in positions.iter_mut().zip(COLUMNS) {
        *slot = header
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == column)
            .ok_or_else(|| EvalError::DataValidation {
                line: 1,
                reason: format!("header is missing column '{}'", column),
            })?;
    }

    let mut interactions = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record).map_err(csv_error)? {
        let line_no = record.position().map_or(0, |p| p.line() as usize);
        let field = |pos: usize| record.get(pos).map(str::to_string);
        let raw = RawInteraction {
            user_id: field(positions[0]),
            item_id: field(positions[1]),
            event_type: field(positions[2]),
            timestamp: field(positions[3]),
        };
        interactions.push(validate_raw_interaction(line_no, raw)?);
    }

    Ok(InteractionLog::from_unsorted(interactions))
}

fn csv_error(err: csv::Error) -> EvalError {
    if err.is_io_error() {
        if let csv::ErrorKind::Io(io) = err.into_kind() {
            return EvalError::Io(io);
        }
        return EvalError::DataValidation {
            line: 0,
            reason: "unreadable CSV input".to_string(),
        };
    }

    let line = err.position().map_or(0, |p| p.line() as usize);
    let reason = match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} fields, found {}", expected_len, len),
        _ => err.to_string(),
    };
    EvalError::DataValidation { line, reason }
}
