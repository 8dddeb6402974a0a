use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::InputFiles;
use crate::core::{DataError, RawFinancials, StatementRow, validate_statement};

/// Loads the three statements from `data_dir` and validates each one.
pub fn load_financials(data_dir: &Path, files: &InputFiles) -> Result<RawFinancials, DataError> {
    let raw = RawFinancials {
        income_statement: load_statement(&data_dir.join(&files.income_statement))?,
        balance_sheet: load_statement(&data_dir.join(&files.balance_sheet))?,
        cash_flow: load_statement(&data_dir.join(&files.cash_flow))?,
    };
    debug!(
        income_statement = raw.income_statement.len(),
        balance_sheet = raw.balance_sheet.len(),
        cash_flow = raw.cash_flow.len(),
        "statements loaded"
    );
    Ok(raw)
}

/// Reads one statement CSV. Columns are matched by header name; extra
/// columns are ignored and every missing required column is reported.
pub fn load_statement<R>(path: &Path) -> Result<Vec<R>, DataError>
where
    R: StatementRow + DeserializeOwned,
{
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => DataError::MissingFile(path.to_path_buf()),
        _ => unreadable::<R>(format!("{}: {e}", path.display())),
    })?;
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| unreadable::<R>(format!("header: {e}")))?
        .clone();
    let column_index = required_columns::<R>(&headers)?;

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| unreadable::<R>(format!("line {line}: {e}")))?;
        rows.push(parse_row::<R>(&record, &headers, &column_index, line)?);
    }

    validate_statement(&rows)?;
    Ok(rows)
}

fn required_columns<R: StatementRow>(headers: &StringRecord) -> Result<Vec<usize>, DataError> {
    let mut indices = Vec::with_capacity(R::COLUMNS.len());
    let mut missing = Vec::new();
    for &column in R::COLUMNS {
        match headers.iter().position(|h| h == column) {
            Some(idx) => indices.push(idx),
            None => missing.push(column.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(DataError::MissingColumns {
            table: R::TABLE.to_string(),
            columns: missing,
        });
    }
    Ok(indices)
}

fn parse_row<R>(
    record: &StringRecord,
    headers: &StringRecord,
    column_index: &[usize],
    line: usize,
) -> Result<R, DataError>
where
    R: StatementRow + DeserializeOwned,
{
    // `year` is always the first required column.
    let year_cell = record.get(column_index[0]).unwrap_or_default();
    let year: i32 = year_cell
        .parse()
        .map_err(|_| unreadable::<R>(format!("line {line}: invalid year `{year_cell}`")))?;

    for (&column, &idx) in R::COLUMNS.iter().zip(column_index).skip(1) {
        if record.get(idx).is_none_or(str::is_empty) {
            return Err(DataError::MissingValue {
                table: R::TABLE.to_string(),
                year,
                column: column.to_string(),
            });
        }
    }

    record
        .deserialize(Some(headers))
        .map_err(|e| unreadable::<R>(format!("line {line}: {e}")))
}

fn unreadable<R: StatementRow>(message: String) -> DataError {
    DataError::Unreadable {
        table: R::TABLE.to_string(),
        message,
    }
}
