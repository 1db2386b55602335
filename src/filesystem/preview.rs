use std::fs::{self, File};
use std::path::Path;

use base64::Engine;
use serde_json::Value;

use crate::config::PreviewConfig;
use crate::error::{Result, SandboxFsError};
use crate::filesystem::mime::{self, ContentFormat, MIME_CSV};

/// Row/column/byte caps for tabular preview.
#[derive(Debug, Clone, Copy)]
pub struct TabularLimits {
    pub max_row: usize,
    pub max_column: usize,
    pub max_size: u64,
}

impl Default for TabularLimits {
    fn default() -> Self {
        Self { max_row: 1000, max_column: 2000, max_size: 10 * 1024 * 1024 }
    }
}

/// Result of a capped CSV scan. `scanned_rows` reports what was actually read;
/// the file may contain more rows than that.
#[derive(Debug, Clone)]
pub struct TabularPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub scanned_rows: usize,
}

/// Extracts size-gated, encoding-validated content previews.
#[derive(Debug, Clone)]
pub struct PreviewPipeline {
    text_limit: u64,
    image_limit: u64,
}

impl PreviewPipeline {
    pub fn new(cfg: &PreviewConfig) -> Self {
        Self { text_limit: cfg.text_limit_bytes, image_limit: cfg.image_limit_bytes }
    }

    /// Content for a file of known size and format. Oversized files yield
    /// `None` (the caller shows metadata only); invalid encoding or structure
    /// where the caller explicitly asked for it is a hard error.
    pub fn extract_sync(&self, path: &Path, format: ContentFormat, size: u64) -> Result<Option<Value>> {
        match format {
            ContentFormat::Json => {
                if size >= self.text_limit {
                    return Ok(None);
                }
                let text = read_utf8(path)?;
                let value: Value = serde_json::from_str(&text).map_err(|e| {
                    SandboxFsError::unsupported(format!("File content is not valid JSON: {e}"))
                })?;
                Ok(Some(value))
            }
            ContentFormat::Image => {
                if size >= self.image_limit {
                    return Ok(None);
                }
                let bytes = fs::read(path)?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                Ok(Some(Value::String(encoded)))
            }
            ContentFormat::Text => {
                if size >= self.text_limit {
                    return Ok(None);
                }
                Ok(Some(Value::String(read_utf8(path)?)))
            }
        }
    }

    /// Capped scan of a delimited text file. Reads at most `max_row` data rows
    /// and stops early once the reader has consumed more than `max_size`
    /// bytes; a header wider than `max_column` is rejected outright.
    pub fn tabular_sync(&self, path: &Path, limits: TabularLimits, separator: u8) -> Result<TabularPreview> {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if mime::mime_for(&name) != MIME_CSV {
            return Err(SandboxFsError::unsupported(format!(
                "Tabular preview only supports CSV files, got {name}"
            )));
        }
        if fs::metadata(path)?.len() == 0 {
            return Err(SandboxFsError::unsupported("CSV file is empty"));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .from_reader(File::open(path)?);

        let columns: Vec<String> = reader
            .headers()
            .map_err(map_csv_error)?
            .iter()
            .map(str::to_string)
            .collect();
        if columns.len() > limits.max_column {
            return Err(SandboxFsError::TooManyEntries {
                count: columns.len(),
                limit: limits.max_column,
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(map_csv_error)?;
            let mut row = serde_json::Map::with_capacity(columns.len());
            for (column, field) in columns.iter().zip(record.iter()) {
                row.insert(column.clone(), field_value(field));
            }
            rows.push(Value::Object(row));
            if rows.len() >= limits.max_row {
                break;
            }
            if record.position().map_or(false, |p| p.byte() >= limits.max_size) {
                break;
            }
        }

        let scanned_rows = rows.len();
        Ok(TabularPreview { columns, rows, scanned_rows })
    }
}

fn read_utf8(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes)
        .map_err(|_| SandboxFsError::encoding("Only UTF-8 encoded files can be previewed"))
}

fn map_csv_error(e: csv::Error) -> SandboxFsError {
    match e.kind() {
        csv::ErrorKind::Utf8 { .. } => {
            SandboxFsError::encoding("CSV file must be UTF-8 encoded")
        }
        csv::ErrorKind::Io(_) => SandboxFsError::unsupported(format!("CSV read failed: {e}")),
        _ => SandboxFsError::unsupported(format!("Not a parseable delimited file: {e}")),
    }
}

/// Mirrors the loose typing a dataframe would infer: integers and floats come
/// back as numbers, empty fields as null, everything else as a string.
fn field_value(field: &str) -> Value {
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = field.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = field.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(field.to_string())
}
