//! Input tables: CSV or the first worksheet of a spreadsheet, read into
//! string cells.

use std::io::Read;
use std::path::Path;

use calamine::{Data, Range, Reader, open_workbook_auto};

use crate::error::AppError;

const BOM: char = '\u{feff}';
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

/// A header row plus data rows, every cell as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Read `path`, choosing the format by extension.
    pub fn read(path: &Path) -> Result<Self, AppError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if extension == "csv" {
            let file = std::fs::File::open(path)?;
            return Self::from_csv(file);
        }
        if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
            return Self::from_spreadsheet(path);
        }
        Err(AppError::ConfigError(format!(
            "Unsupported table type '.{extension}' (expected .csv, .xlsx or .xls): {}",
            path.display()
        )))
    }

    pub fn from_csv<R: Read>(reader: R) -> Result<Self, AppError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader.headers()?.iter().map(clean_header).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    fn from_spreadsheet(path: &Path) -> Result<Self, AppError> {
        let mut workbook = open_workbook_auto(path).map_err(|e| {
            AppError::IoError(format!("Failed to open workbook {}: {e}", path.display()))
        })?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| {
                AppError::ConfigError(format!("Workbook has no worksheets: {}", path.display()))
            })?
            .map_err(|e| {
                AppError::IoError(format!("Failed to read worksheet {}: {e}", path.display()))
            })?;
        Ok(Self::from_range(&range))
    }

    /// First row is the header; fully empty rows are skipped.
    fn from_range(range: &Range<Data>) -> Self {
        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|row| row.iter().map(|c| clean_header(&cell_text(c))).collect())
            .unwrap_or_default();
        let rows = rows
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .collect();
        Self { headers, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|cells| Row { cells })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One data row. Missing trailing cells read as empty.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    cells: &'a [String],
}

impl<'a> Row<'a> {
    pub fn get(&self, idx: usize) -> &'a str {
        self.cells.get(idx).map(String::as_str).unwrap_or_default()
    }
}

fn clean_header(raw: &str) -> String {
    raw.trim_start_matches(BOM).trim().to_string()
}

/// Spreadsheet cell as the text a CSV export would carry. Whole floats lose
/// their `.0` so numeric ids stay stable.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default(),
    }
}
