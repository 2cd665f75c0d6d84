//! Tabular input for reconciliation.
//!
//! Uploaded lab extracts, EDC listings and safety database exports arrive as delimited text or
//! as a spreadsheet, with a header row. [`Table`] holds one of them in memory with every cell as
//! a string; interpretation of values is left to the caller (the comparator only needs key and
//! compare columns).

use crate::{CdmError, CdmResult};
use calamine::{Data, DataType, Reader};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

/// One row of a table as `column -> value`.
pub type RecordFields = BTreeMap<String, String>;

/// An in-memory delimited table with a header row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Builds a table from already-split rows.
    ///
    /// Column names are trimmed. Every row must have exactly one value per column and column
    /// names must be unique.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> CdmResult<Self> {
        let name = name.into();
        let columns: Vec<String> = columns.into_iter().map(|c| c.trim().to_string()).collect();

        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() {
                return Err(CdmError::InvalidInput(format!(
                    "{name} table has an empty column name"
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(CdmError::InvalidInput(format!(
                    "{name} table has duplicate column '{column}'"
                )));
            }
        }

        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(CdmError::InvalidInput(format!(
                    "{name} table row {} has {} values, expected {}",
                    index + 1,
                    row.len(),
                    columns.len()
                )));
            }
        }

        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    /// Reads a table from delimited text. The first record is the header row.
    pub fn from_reader<R: Read>(
        name: impl Into<String>,
        reader: R,
        delimiter: u8,
    ) -> CdmResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let columns = csv_reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::new(name, columns, rows)
    }

    /// Reads the first worksheet of a spreadsheet. The first non-empty row is the header row and
    /// fully empty rows are skipped.
    pub fn from_spreadsheet(name: impl Into<String>, path: &Path) -> CdmResult<Self> {
        let name = name.into();
        std::fs::metadata(path).map_err(CdmError::FileRead)?;
        let mut workbook = calamine::open_workbook_auto(path).map_err(|e| match e {
            calamine::Error::Io(io) => CdmError::FileRead(io),
            other => CdmError::Spreadsheet(other),
        })?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| {
                CdmError::InvalidInput(format!("{name} spreadsheet has no worksheets"))
            })?
            .map_err(CdmError::Spreadsheet)?;

        let mut rows = range
            .rows()
            .filter(|row| !row.iter().all(DataType::is_empty))
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let columns = rows.next().ok_or_else(|| {
            CdmError::InvalidInput(format!("{name} spreadsheet has no header row"))
        })?;
        let rows = rows.collect();

        Self::new(name, columns, rows)
    }

    /// Reads a table from a file.
    ///
    /// `.xlsx`, `.xlsm`, `.xls` and `.ods` files are read as spreadsheets and `delimiter` is
    /// ignored. Anything else is delimited text, with the delimiter chosen from the extension
    /// unless one is given.
    pub fn from_path(
        name: impl Into<String>,
        path: &Path,
        delimiter: Option<u8>,
    ) -> CdmResult<Self> {
        let table = if is_spreadsheet(path) {
            Self::from_spreadsheet(name, path)?
        } else {
            let delimiter = delimiter.unwrap_or_else(|| delimiter_for_path(path));
            let file = std::fs::File::open(path).map_err(CdmError::FileRead)?;
            Self::from_reader(name, file, delimiter)?
        };
        tracing::debug!(
            "loaded {} table from {} ({} rows)",
            table.name,
            path.display(),
            table.rows.len()
        );
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the position of `field`, or `MissingRequiredField` if the table lacks it.
    pub fn require_column(&self, field: &str) -> CdmResult<usize> {
        self.columns
            .iter()
            .position(|c| c == field)
            .ok_or_else(|| CdmError::MissingRequiredField {
                table: self.name.clone(),
                field: field.to_string(),
            })
    }

    /// Raw cell value at (`row`, `column`).
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
    }

    /// Copies row `row` out as a column-keyed record.
    pub fn record(&self, row: usize) -> Option<RecordFields> {
        let values = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
        )
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Whether `path` names a spreadsheet rather than delimited text.
pub fn is_spreadsheet(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("xlsx" | "xlsm" | "xls" | "ods")
    )
}

/// Spreadsheet cells as text. Dates keep their calendar form.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => dt.date().to_string(),
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => cell.to_string(),
        },
        Data::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

/// Tab for `.tsv`/`.tab` files, comma for everything else.
pub fn delimiter_for_path(path: &Path) -> u8 {
    match extension(path).as_deref() {
        Some("tsv") | Some("tab") => b'\t',
        _ => b',',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn from_reader_reads_header_and_rows() {
        let data = "SUBJID,LBTEST,LBORRES\nSUB-001,HGB,13.2\nSUB-002,HGB,11.9\n";
        let table = Table::from_reader("Lab", data.as_bytes(), b',').unwrap();

        assert_eq!(table.columns(), ["SUBJID", "LBTEST", "LBORRES"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, 2), Some("11.9"));

        let record = table.record(0).unwrap();
        assert_eq!(record.get("LBTEST").map(String::as_str), Some("HGB"));
    }

    #[test]
    fn from_reader_rejects_ragged_rows() {
        let data = "SUBJID,VISIT\nSUB-001\n";
        let err = Table::from_reader("EDC", data.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, CdmError::Csv(_)));
    }

    #[test]
    fn new_rejects_duplicate_columns() {
        let err = Table::new("EDC", vec!["SUBJID".into(), " SUBJID ".into()], vec![])
            .unwrap_err();
        assert!(matches!(err, CdmError::InvalidInput(msg) if msg.contains("duplicate column")));
    }

    #[test]
    fn require_column_reports_table_and_field() {
        let table = Table::new("Lab", vec!["PATIENT".into()], vec![]).unwrap();
        let err = table.require_column("SUBJID").unwrap_err();
        match err {
            CdmError::MissingRequiredField { table, field } => {
                assert_eq!(table, "Lab");
                assert_eq!(field, "SUBJID");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn from_path_uses_tab_for_tsv_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lab.tsv");
        fs::write(&path, "SUBJID\tLBORRES\nSUB-001\t4.5\n").unwrap();

        let table = Table::from_path("Lab", &path, None).unwrap();
        assert_eq!(table.columns(), ["SUBJID", "LBORRES"]);
        assert_eq!(table.cell(0, 1), Some("4.5"));
    }

    #[test]
    fn from_path_reads_first_worksheet_of_xlsx() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/lab_results.xlsx");

        let table = Table::from_path("Lab", &path, None).unwrap();
        assert_eq!(table.name(), "Lab");
        assert_eq!(table.columns(), ["SUBJID", "LBTEST", "LBORRES"]);
        // Row 3 of the sheet is blank.
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 0), Some("SUB-001"));
        assert_eq!(table.cell(0, 2), Some("13.2"));
        assert_eq!(table.cell(1, 2), Some("4"));
    }

    #[test]
    fn spreadsheet_extension_is_not_parsed_as_csv() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lab.xlsx");
        fs::write(&path, "SUBJID,LBORRES\nSUB-001,4.5\n").unwrap();

        let err = Table::from_path("Lab", &path, None).unwrap_err();
        assert!(matches!(err, CdmError::Spreadsheet(_)));
    }

    #[test]
    fn missing_spreadsheet_is_read_error() {
        let temp = TempDir::new().unwrap();
        let err = Table::from_path("Lab", &temp.path().join("absent.xlsx"), None).unwrap_err();
        assert!(matches!(err, CdmError::FileRead(_)));
    }

    #[test]
    fn spreadsheet_formats_are_detected_by_extension() {
        assert!(is_spreadsheet(Path::new("lab.xlsx")));
        assert!(is_spreadsheet(Path::new("LAB.XLS")));
        assert!(is_spreadsheet(Path::new("safety.ods")));
        assert!(!is_spreadsheet(Path::new("lab.csv")));
        assert!(!is_spreadsheet(Path::new("lab")));
    }

    #[test]
    fn from_path_missing_file_is_read_error() {
        let temp = TempDir::new().unwrap();
        let err = Table::from_path("Lab", &temp.path().join("absent.csv"), None).unwrap_err();
        assert!(matches!(err, CdmError::FileRead(_)));
    }
}
