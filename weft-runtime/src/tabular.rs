//! ABOUTME: Tabular file IO: CSV/JSON/JSONL/Parquet (and Excel behind a feature)
//! ABOUTME: Rows travel as JSON maps; typed coercion happens at the executor boundary

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use weft_core::{Result, WeftError};

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Csv,
    Json,
    Jsonl,
    Parquet,
    #[cfg(feature = "excel")]
    Excel,
}

fn detect_format(path: &str) -> Result<FileFormat> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => Ok(FileFormat::Csv),
        "json" => Ok(FileFormat::Json),
        "jsonl" => Ok(FileFormat::Jsonl),
        "parquet" => Ok(FileFormat::Parquet),
        #[cfg(feature = "excel")]
        "xlsx" | "xls" => Ok(FileFormat::Excel),
        other => Err(WeftError::configuration(format!(
            "unsupported file format '.{other}' for '{path}'"
        ))),
    }
}

fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Read a tabular file (local or remote) into rows.
pub async fn read_rows(path: &str, http: &reqwest::Client) -> Result<Vec<Row>> {
    let format = detect_format(path)?;
    let bytes: Vec<u8> = if is_remote(path) {
        http.get(path)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| WeftError::Adapter {
                message: format!("cannot fetch '{path}'"),
                source: Some(Box::new(e)),
            })?
            .bytes()
            .await
            .map_err(|e| WeftError::Adapter {
                message: format!("cannot read body of '{path}'"),
                source: Some(Box::new(e)),
            })?
            .to_vec()
    } else {
        tokio::fs::read(path).await.map_err(|e| WeftError::Step {
            step_id: String::new(),
            message: format!("cannot read '{path}': {e}"),
        })?
    };

    let path = path.to_string();
    // Parsing is CPU/file bound; keep it off the async workers.
    tokio::task::spawn_blocking(move || parse_bytes(&path, format, &bytes))
        .await
        .map_err(|e| WeftError::internal(format!("tabular read task failed: {e}")))?
}

fn parse_bytes(path: &str, format: FileFormat, bytes: &[u8]) -> Result<Vec<Row>> {
    match format {
        FileFormat::Csv => parse_csv(bytes),
        FileFormat::Json => {
            let rows: Vec<Row> = serde_json::from_slice(bytes).map_err(|e| {
                WeftError::loader(format!("'{path}' is not a JSON array of objects: {e}"))
            })?;
            Ok(rows)
        }
        FileFormat::Jsonl => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| WeftError::loader(format!("'{path}' is not UTF-8: {e}")))?;
            text.lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    serde_json::from_str(line).map_err(|e| {
                        WeftError::loader(format!("bad JSONL line in '{path}': {e}"))
                    })
                })
                .collect()
        }
        FileFormat::Parquet => parse_parquet(path, bytes),
        #[cfg(feature = "excel")]
        FileFormat::Excel => parse_excel(path, bytes),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| WeftError::loader(format!("bad CSV header: {e}")))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| WeftError::loader(format!("bad CSV record: {e}")))?;
        let mut row = Row::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), serde_json::Value::String(field.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_parquet(path: &str, bytes: &[u8]) -> Result<Vec<Row>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::copy_from_slice(bytes))
        .and_then(parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::build)
        .map_err(|e| WeftError::loader(format!("cannot read parquet '{path}': {e}")))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| WeftError::loader(format!("bad parquet batch in '{path}': {e}")))?;
        let mut writer = arrow::json::ArrayWriter::new(Vec::new());
        writer
            .write_batches(&[&batch])
            .and_then(|()| writer.finish())
            .map_err(|e| WeftError::loader(format!("cannot decode parquet '{path}': {e}")))?;
        let decoded: Vec<Row> = serde_json::from_slice(&writer.into_inner())
            .map_err(|e| WeftError::loader(format!("cannot decode parquet '{path}': {e}")))?;
        rows.extend(decoded);
    }
    Ok(rows)
}

#[cfg(feature = "excel")]
fn parse_excel(path: &str, bytes: &[u8]) -> Result<Vec<Row>> {
    use calamine::{Reader as _, Xlsx};
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mut workbook = Xlsx::new(cursor)
        .map_err(|e| WeftError::loader(format!("cannot open workbook '{path}': {e}")))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| WeftError::loader(format!("workbook '{path}' has no sheets")))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| WeftError::loader(format!("cannot read sheet '{sheet_name}': {e}")))?;

    let mut iter = range.rows();
    let headers: Vec<String> = iter
        .next()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .unwrap_or_default();
    let mut rows = Vec::new();
    for record in iter {
        let mut row = Row::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(
                header.clone(),
                serde_json::Value::String(cell.to_string()),
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

fn sorted_columns(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<std::collections::BTreeSet<String>>()
        .into_iter()
        .collect();
    columns.sort();
    columns
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Write rows to a tabular file; the format follows the extension.
pub fn write_rows(path: &str, rows: &[Row]) -> Result<()> {
    let format = detect_format(path)?;
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| WeftError::Step {
                step_id: String::new(),
                message: format!("cannot create '{}': {e}", parent.display()),
            })?;
        }
    }
    match format {
        FileFormat::Csv => write_csv(path, rows),
        FileFormat::Json => {
            let file = create_file(path)?;
            serde_json::to_writer_pretty(file, rows)
                .map_err(|e| write_error(path, &e.to_string()))
        }
        FileFormat::Jsonl => {
            let mut file = create_file(path)?;
            for row in rows {
                let line = serde_json::to_string(row)
                    .map_err(|e| write_error(path, &e.to_string()))?;
                writeln!(file, "{line}").map_err(|e| write_error(path, &e.to_string()))?;
            }
            Ok(())
        }
        FileFormat::Parquet => write_parquet(path, rows),
        #[cfg(feature = "excel")]
        FileFormat::Excel => Err(WeftError::configuration(format!(
            "writing Excel workbooks is not supported ('{path}')"
        ))),
    }
}

fn create_file(path: &str) -> Result<File> {
    File::create(path).map_err(|e| write_error(path, &e.to_string()))
}

fn write_error(path: &str, detail: &str) -> WeftError {
    WeftError::Step {
        step_id: String::new(),
        message: format!("cannot write '{path}': {detail}"),
    }
}

fn write_csv(path: &str, rows: &[Row]) -> Result<()> {
    let columns = sorted_columns(rows);
    let mut writer =
        csv::Writer::from_path(path).map_err(|e| write_error(path, &e.to_string()))?;
    writer
        .write_record(&columns)
        .map_err(|e| write_error(path, &e.to_string()))?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| row.get(column).map(render_cell).unwrap_or_default())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| write_error(path, &e.to_string()))?;
    }
    writer.flush().map_err(|e| write_error(path, &e.to_string()))
}

/// All columns are written as strings; non-string values carry their JSON
/// rendering.
fn write_parquet(path: &str, rows: &[Row]) -> Result<()> {
    let columns = sorted_columns(rows);
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|column| {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(column).map(render_cell))
                .collect();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| write_error(path, &e.to_string()))?;

    let file = create_file(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)
        .map_err(|e| write_error(path, &e.to_string()))?;
    writer
        .write(&batch)
        .map_err(|e| write_error(path, &e.to_string()))?;
    writer
        .close()
        .map(|_| ())
        .map_err(|e| write_error(path, &e.to_string()))
}
