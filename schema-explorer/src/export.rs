//! CSV export of streamed rows

use crate::database::traits::{DatabaseError, RowStream};
use crate::schema::TableName;
use futures::stream::{BoxStream, StreamExt};
use std::fmt::Display;

/// CSV bytes, one chunk per row
pub type CsvStream = BoxStream<'static, Result<Vec<u8>, DatabaseError>>;

fn csv_error(error: impl Display) -> DatabaseError {
    DatabaseError::Serialization(format!("CSV encoding failed: {}", error))
}

fn cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn encode_row(
    columns: &[String],
    row: &serde_json::Value,
    with_header: bool,
) -> Result<Vec<u8>, DatabaseError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if with_header {
        writer.write_record(columns).map_err(csv_error)?;
    }
    writer
        .write_record(columns.iter().map(|column| cell(row.get(column))))
        .map_err(csv_error)?;
    writer.into_inner().map_err(csv_error)
}

/// A running export: the table it reads from and its CSV chunks
pub struct CsvExport {
    pub table: TableName,
    pub chunks: CsvStream,
}

impl CsvExport {
    /// Download name, `schema_table.csv`
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.table.file_stem())
    }
}

/// Encode `rows` as CSV with `columns` as the header
///
/// The header goes out together with the first row, so an empty row stream
/// yields no bytes at all. Row errors are passed through unchanged.
pub fn csv_chunks(columns: Vec<String>, rows: RowStream) -> CsvStream {
    let mut header_pending = true;
    rows.map(move |row| {
        let row = row?;
        let chunk = encode_row(&columns, &row, header_pending)?;
        header_pending = false;
        Ok(chunk)
    })
    .boxed()
}
