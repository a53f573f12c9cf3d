//! Reading input sheets into header names and typed rows.

use crate::error::{Error, Result};
use crate::value::Value;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

const BINARY_EXTENSIONS: &[&str] = &["ods", "xlsx", "xlsm", "xls"];

/// How many leading bytes [`is_binary`] inspects.
const SNIFF_LEN: u64 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetOptions {
    pub delimiter: u8,
    /// Rows above the header row are ignored.
    pub header_row: usize,
    /// Columns left of this one are ignored.
    pub header_column: usize,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header_row: 0,
            header_column: 0,
        }
    }
}

/// A sheet with normalized column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Sheet {
    /// Builds a sheet from raw rows, the first non-empty one being the header.
    ///
    /// Columns with an empty header cell are dropped. Short rows are padded
    /// with empty strings, cells beyond the header are ignored.
    pub fn from_rows(rows: Vec<Vec<Value>>, options: &SheetOptions) -> Result<Self> {
        let mut rows = rows
            .into_iter()
            .skip(options.header_row)
            .map(|row| row.into_iter().skip(options.header_column).collect::<Vec<_>>())
            .filter(|row| !row.iter().all(is_empty_cell));

        let header = rows
            .next()
            .ok_or_else(|| Error::Input("missing a proper column header".to_string()))?;

        let mut columns = Vec::new();
        let mut headers = Vec::new();
        for (i, cell) in header.iter().enumerate() {
            if is_empty_cell(cell) {
                continue;
            }
            let raw = cell.to_string();
            let name = normalize_header(&raw);
            if name.is_empty() {
                return Err(Error::Input(format!(
                    "column header '{}' does not contain a usable name",
                    raw
                )));
            }
            if headers.contains(&name) {
                warn!(header = %name, "duplicate column header, the rightmost column wins");
            }
            columns.push(i);
            headers.push(name);
        }
        if headers.is_empty() {
            return Err(Error::Input("missing a proper column header".to_string()));
        }

        let rows = rows
            .map(|row| {
                columns
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or_else(|| Value::from("")))
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(Sheet { headers, rows })
    }

    /// One variable map per data row, keyed by normalized header.
    pub fn records(&self) -> impl Iterator<Item = BTreeMap<String, Value>> + '_ {
        self.rows.iter().map(|row| {
            self.headers
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect::<BTreeMap<_, _>>()
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_empty_cell(v: &Value) -> bool {
    match v {
        Value::String(s) => s.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Lowercases, turns each run of characters outside `[0-9a-z_]` into one
/// `_`, then strips leading characters that can't start an identifier.
pub fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut in_run = false;
    for c in header.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out.trim_start_matches(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .to_string()
}

/// Whether `path`'s extension marks a spreadsheet rather than CSV text.
pub fn expects_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// A file is binary if its first 8000 bytes contain a NUL.
pub fn is_binary(path: &Path) -> std::io::Result<bool> {
    let mut chunk = Vec::new();
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut chunk)?;
    Ok(chunk.contains(&0))
}

/// Checks that `path` is an existing regular file whose binary-ness is `binary`.
pub fn check_file(path: &Path, binary: bool) -> Result<()> {
    if !path.exists() {
        return Err(Error::Input(format!("'{}' doesn't exist", path.display())));
    }
    if !path.is_file() {
        return Err(Error::Input(format!("'{}' is not a file", path.display())));
    }
    match (binary, is_binary(path)?) {
        (true, false) => Err(Error::Input(format!(
            "'{}' is not a binary spreadsheet file",
            path.display()
        ))),
        (false, true) => Err(Error::Input(format!("'{}' is a binary file", path.display()))),
        _ => Ok(()),
    }
}

/// Reads a text file after [`check_file`].
pub fn read_text(path: &Path) -> Result<String> {
    check_file(path, false)?;
    std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("failed to read '{}': {}", path.display(), e)))
}

pub fn read_sheet(path: &Path, options: &SheetOptions) -> Result<Sheet> {
    let rows = if expects_binary(path) {
        read_workbook(path)?
    } else {
        read_csv(path, options.delimiter)?
    };
    debug!(path = %path.display(), rows = rows.len(), "read sheet");
    Sheet::from_rows(rows, options).map_err(|e| match e {
        Error::Input(message) => Error::Input(format!("'{}': {}", path.display(), message)),
        other => other,
    })
}

fn read_csv(path: &Path, delimiter: u8) -> Result<Vec<Vec<Value>>> {
    let failed = |e: csv::Error| Error::Input(format!("failed to read '{}': {}", path.display(), e));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(failed)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(failed)?;
        rows.push(record.iter().map(csv_cell).collect::<Vec<_>>());
    }
    Ok(rows)
}

/// CSV cells that look like numbers become numbers.
fn csv_cell(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Int(i);
    }
    let numeric = cell.bytes().any(|b| b.is_ascii_digit())
        && cell.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b));
    match cell.parse::<f64>() {
        Ok(f) if numeric => Value::Float(f),
        _ => Value::from(cell),
    }
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<Value>>> {
    let failed = |e: calamine::Error| Error::Input(format!("failed to read '{}': {}", path.display(), e));
    let mut workbook = open_workbook_auto(path).map_err(failed)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Input(format!("'{}' contains no worksheet", path.display())))?
        .map_err(failed)?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(workbook_cell).collect::<Vec<_>>())
        .collect())
}

fn workbook_cell(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Value::Int(*f as i64),
        Data::Float(f) => Value::Float(*f),
        Data::String(s) => Value::from(s.as_str()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Value::Float(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::from(s.as_str()),
        Data::Error(e) => Value::String(e.to_string()),
        Data::Empty => Value::from(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(cells: &[&str]) -> Vec<Value> {
        cells.iter().map(|c| csv_cell(c)).collect()
    }

    #[test]
    fn header_normalization() {
        assert_eq!(normalize_header("Name"), "name");
        assert_eq!(normalize_header("First Name"), "first_name");
        assert_eq!(normalize_header("Price (EUR)"), "price_eur_");
        assert_eq!(normalize_header("2nd column"), "nd_column");
        assert_eq!(normalize_header("  -- id"), "_id");
        assert_eq!(normalize_header("#1 id"), "_1_id");
        assert_eq!(normalize_header("_keep"), "_keep");
        assert_eq!(normalize_header("123"), "");
    }

    #[test]
    fn csv_cells_are_typed() {
        assert_eq!(csv_cell("3"), Value::Int(3));
        assert_eq!(csv_cell("-2.5"), Value::Float(-2.5));
        assert_eq!(csv_cell("1e3"), Value::Float(1000.0));
        assert_eq!(csv_cell("inf"), Value::from("inf"));
        assert_eq!(csv_cell("007"), Value::Int(7));
        assert_eq!(csv_cell("Alice"), Value::from("Alice"));
        assert_eq!(csv_cell(""), Value::from(""));
    }

    #[test]
    fn offsets_and_empty_rows() {
        let rows = vec![
            row(&["junk", "junk", "junk"]),
            row(&["", "Name", "Count"]),
            row(&["", "", ""]),
            row(&["x", "Alice", "3"]),
            row(&["x", "Bob"]),
        ];
        let options = SheetOptions {
            header_row: 1,
            header_column: 1,
            ..SheetOptions::default()
        };
        let sheet = Sheet::from_rows(rows, &options).unwrap();
        assert_eq!(sheet.headers, vec!["name", "count"]);
        let records: Vec<_> = sheet.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["count"], Value::Int(3));
        assert_eq!(records[1]["count"], Value::from(""));
    }

    #[test]
    fn empty_header_cells_drop_the_column() {
        let sheet = Sheet::from_rows(vec![row(&["a", "", "b"]), row(&["1", "2", "3"])], &SheetOptions::default()).unwrap();
        assert_eq!(sheet.headers, vec!["a", "b"]);
        assert_eq!(sheet.rows[0], vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn header_problems_are_input_errors() {
        assert!(matches!(Sheet::from_rows(vec![], &SheetOptions::default()), Err(Error::Input(_))));
        assert!(matches!(
            Sheet::from_rows(vec![row(&["ok", "42"])], &SheetOptions::default()),
            Err(Error::Input(m)) if m.contains("'42'")
        ));
    }

    #[test]
    fn reads_csv_with_custom_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "Name;Count\nAlice;3\n\nBob;4\n").unwrap();
        let options = SheetOptions {
            delimiter: b';',
            ..SheetOptions::default()
        };
        let sheet = read_sheet(&path, &options).unwrap();
        assert_eq!(sheet.headers, vec!["name", "count"]);
        assert_eq!(sheet.len(), 2);
        assert_eq!(sheet.rows[1], vec![Value::from("Bob"), Value::Int(4)]);
    }

    #[test]
    fn binary_detection() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("a.csv");
        std::fs::write(&text, "a,b\n").unwrap();
        let bin = dir.path().join("b.xlsx");
        File::create(&bin).unwrap().write_all(b"PK\x03\x04\x00\x00").unwrap();

        assert!(expects_binary(&bin));
        assert!(!expects_binary(&text));
        assert!(check_file(&text, false).is_ok());
        assert!(check_file(&bin, true).is_ok());
        assert!(matches!(check_file(&text, true), Err(Error::Input(_))));
        assert!(matches!(check_file(&bin, false), Err(Error::Input(_))));
        assert!(matches!(check_file(dir.path(), false), Err(Error::Input(m)) if m.contains("not a file")));
        assert!(matches!(check_file(&dir.path().join("nope"), false), Err(Error::Input(_))));
    }
}
