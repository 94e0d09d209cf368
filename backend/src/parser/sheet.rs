//! Tabular rule sources.
//!
//! A rule source is a *mapping* sheet (one rule per row) and an optional
//! *lookup* sheet (one raw → replacement pair per row). Both arrive either
//! as sheets of a workbook (`Mapping` / `Transform`) or as delimited files.

use calamine::{open_workbook_auto, DataType, Range, Reader, Xlsx};
use std::io::Cursor;
use std::path::Path;

use super::{decode_content, detect_delimiter, detect_encoding};
use crate::error::{LoadError, LoadResult};
use crate::models::Cell;

/// Workbook sheet holding the rules.
pub const MAPPING_SHEET: &str = "Mapping";
/// Workbook sheet holding the lookup tables.
pub const LOOKUP_SHEET: &str = "Transform";

/// A header row plus its non-blank data rows.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

/// One data row, cleaned and as written.
#[derive(Debug, Clone, Default)]
pub struct SheetRow {
    /// Spreadsheet row number (header is row 1)
    pub number: usize,
    /// Trimmed cells, blank as `None`
    pub cells: Vec<Option<String>>,
    /// Cells as written, only empty ones as `None`
    pub raw: Vec<Option<String>>,
}

/// Mapping sheet and its lookup sheet, if any.
#[derive(Debug, Clone)]
pub struct RuleSource {
    pub mapping: Sheet,
    pub lookups: Option<Sheet>,
}

impl Sheet {
    /// Build a sheet from raw rows; the first row is the header and rows are
    /// numbered from 1. Blank rows are dropped but keep their number.
    pub fn from_rows<I, R, S>(name: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut rows = rows.into_iter().enumerate().map(|(idx, row)| {
            let raw: Vec<Option<String>> = row
                .into_iter()
                .map(|c| c.map(|s| s.as_ref().to_string()).filter(|s| !s.is_empty()))
                .collect();
            SheetRow {
                number: idx + 1,
                cells: raw.iter().map(|c| c.as_deref().and_then(clean_cell)).collect(),
                raw,
            }
        });

        let headers = rows
            .next()
            .map(|h| h.cells.into_iter().map(Option::unwrap_or_default).collect())
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            headers,
            rows: rows.filter(|r| r.cells.iter().any(Option::is_some)).collect(),
        }
    }

    /// Parse a delimited sheet (encoding and delimiter auto-detected).
    pub fn from_delimited(name: &str, bytes: &[u8]) -> LoadResult<Self> {
        let content = decode_content(bytes, &detect_encoding(bytes));
        let content = content.trim_start_matches('\u{feff}');
        let delimiter = detect_delimiter(content) as u8;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut rows = Vec::new();
        for row in reader.records() {
            let row = row?;
            rows.push(row.iter().map(|f| Some(f.to_string())).collect::<Vec<_>>());
        }

        Ok(Self::from_rows(name, rows))
    }

    fn from_range(name: &str, range: &Range<DataType>) -> Self {
        let mut sheet = Self::from_rows(name, range.rows().map(|row| row.iter().map(cell_text)));

        // Ranges start at the first used cell
        let offset = range.start().map_or(0, |(row, _)| row as usize);
        for row in &mut sheet.rows {
            row.number += offset;
        }
        sheet
    }

    /// Index of the first header matching any of `names` (trimmed, case-insensitive).
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|wanted| {
            self.headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted.trim()))
        })
    }

    /// Like [`Sheet::column`] but a missing header is an error.
    pub fn require_column(&self, names: &[&str]) -> LoadResult<usize> {
        self.column(names).ok_or_else(|| LoadError::MissingColumn {
            sheet: self.name.clone(),
            column: names.join("' / '"),
        })
    }

    /// Trimmed cell at (`row`, `col`), `None` when blank or out of range.
    pub fn cell(&self, row: usize, col: Option<usize>) -> Option<&str> {
        self.rows.get(row)?.cells.get(col?)?.as_deref()
    }

    /// Cell as written, surrounding spaces kept; `None` only when empty.
    pub fn raw_cell(&self, row: usize, col: Option<usize>) -> Option<&str> {
        self.rows.get(row)?.raw.get(col?)?.as_deref()
    }

    /// Spreadsheet row number of data row `row`.
    pub fn row_number(&self, row: usize) -> usize {
        self.rows.get(row).map_or(row + 2, |r| r.number)
    }
}

/// Trim, strip non-breaking spaces; empty becomes `None`.
fn clean_cell(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\u{a0}', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn cell_text(cell: &DataType) -> Option<String> {
    match cell {
        DataType::Empty | DataType::Error(_) => None,
        DataType::String(s) => Some(s.clone()),
        DataType::Float(f) => Some(Cell::Number(*f).render()),
        DataType::Int(i) => Some(i.to_string()),
        other => Some(other.to_string()),
    }
}

fn find_sheet(names: &[String], wanted: &str) -> Option<String> {
    names.iter().find(|n| n.trim().eq_ignore_ascii_case(wanted)).cloned()
}

fn range_error(origin: &Path, e: impl std::fmt::Display) -> LoadError {
    LoadError::Unreadable {
        path: origin.to_path_buf(),
        message: e.to_string(),
    }
}

fn read_sheets<RS, R>(workbook: &mut R, origin: &Path) -> LoadResult<RuleSource>
where
    RS: std::io::Read + std::io::Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let names = workbook.sheet_names().to_vec();

    let mapping_name = find_sheet(&names, MAPPING_SHEET)
        .ok_or_else(|| LoadError::MissingSheet(MAPPING_SHEET.to_string()))?;
    let mapping = match workbook.worksheet_range(&mapping_name) {
        Ok(range) => Sheet::from_range(MAPPING_SHEET, &range),
        Err(e) => return Err(range_error(origin, e)),
    };

    let lookups = match find_sheet(&names, LOOKUP_SHEET) {
        Some(name) => match workbook.worksheet_range(&name) {
            Ok(range) => Some(Sheet::from_range(LOOKUP_SHEET, &range)),
            Err(e) => return Err(range_error(origin, e)),
        },
        None => None,
    };

    Ok(RuleSource { mapping, lookups })
}

/// Read `Mapping` and (optional) `Transform` sheets from any workbook calamine opens.
pub fn read_workbook(path: &Path) -> LoadResult<RuleSource> {
    let mut workbook = open_workbook_auto(path).map_err(|e| range_error(path, e))?;
    read_sheets(&mut workbook, path)
}

/// Read an uploaded `.xlsx` workbook held in memory.
pub fn read_xlsx_bytes(bytes: Vec<u8>) -> LoadResult<RuleSource> {
    let origin = Path::new("<upload>");
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(|e| range_error(origin, e))?;
    read_sheets(&mut workbook, origin)
}

/// True for extensions handled by [`read_workbook`].
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_lowercase().as_str(), "xlsx" | "xlsm" | "xlsb" | "xls" | "ods"))
}

/// Open a rule source from disk.
///
/// Workbooks carry both sheets; a delimited mapping file takes its lookup
/// table from `lookups` (a delimited file too) when given.
pub fn read_rule_source(path: &Path, lookups: Option<&Path>) -> LoadResult<RuleSource> {
    let mut source = if is_workbook(path) {
        read_workbook(path)?
    } else {
        let bytes = std::fs::read(path).map_err(|e| range_error(path, e))?;
        RuleSource {
            mapping: Sheet::from_delimited(MAPPING_SHEET, &bytes)?,
            lookups: None,
        }
    };

    if let Some(lookup_path) = lookups {
        let bytes = std::fs::read(lookup_path).map_err(|e| range_error(lookup_path, e))?;
        source.lookups = Some(Sheet::from_delimited(LOOKUP_SHEET, &bytes)?);
    }

    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_rows_cleans_cells() {
        let sheet = Sheet::from_rows(
            "Transform",
            vec![
                vec![Some(" MapName "), Some("Map Criteria#1"), Some("Transformed Value")],
                vec![Some("GenderCode"), Some("M"), Some("1\u{a0}")],
                vec![None, Some("  "), None],
            ],
        );

        assert_eq!(sheet.headers, vec!["MapName", "Map Criteria#1", "Transformed Value"]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.cell(0, Some(2)), Some("1"));
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let sheet = Sheet::from_rows("Mapping", vec![vec![Some("STG_Column_Name"), Some("transformation type")]]);

        assert_eq!(sheet.column(&["target_column", "stg_column_name"]), Some(0));
        assert_eq!(sheet.column(&["Transformation Type"]), Some(1));
        assert!(sheet.require_column(&["Parameter#1"]).is_err());
    }

    #[test]
    fn test_from_delimited() {
        let sheet = Sheet::from_delimited("Mapping", b"target_column;kind;param1\nSex;O;NF:Gender\n").unwrap();

        assert_eq!(sheet.headers.len(), 3);
        assert_eq!(sheet.cell(0, Some(2)), Some("NF:Gender"));
        assert_eq!(sheet.cell(0, Some(7)), None);
    }

    #[test]
    fn test_read_rule_source_with_lookup_file() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("mapping.csv");
        let lookups = dir.path().join("lookups.csv");
        std::fs::File::create(&mapping)
            .unwrap()
            .write_all(b"target_column,kind,param1,param2\nGenderCode,T,Gender,GenderMap\n")
            .unwrap();
        std::fs::File::create(&lookups)
            .unwrap()
            .write_all(b"lookup,raw,replacement\nGenderMap,M,1\n")
            .unwrap();

        let source = read_rule_source(&mapping, Some(&lookups)).unwrap();
        assert_eq!(source.mapping.rows.len(), 1);
        assert_eq!(source.lookups.map(|l| l.rows.len()), Some(1));
    }

    #[test]
    fn test_rows_keep_sheet_numbers_and_raw_text() {
        let sheet = Sheet::from_rows(
            "Mapping",
            vec![
                vec![Some("target_column"), Some("kind"), Some("param1")],
                vec![Some("Pad"), Some("default"), Some("  00 ")],
                vec![Some(""), Some("   "), None],
                vec![Some("Bad"), Some("Q"), Some("x")],
            ],
        );

        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.row_number(0), 2);
        assert_eq!(sheet.row_number(1), 4);
        assert_eq!(sheet.cell(0, Some(2)), Some("00"));
        assert_eq!(sheet.raw_cell(0, Some(2)), Some("  00 "));
        assert_eq!(sheet.raw_cell(0, Some(9)), None);
    }

    #[test]
    fn test_read_workbook_fixture() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/TRANS_REL.xlsx");
        let source = read_workbook(&path).unwrap();

        let mapping = &source.mapping;
        assert_eq!(mapping.name, MAPPING_SHEET);
        assert_eq!(mapping.column(&["STG_Column_Name"]), Some(0));
        assert_eq!(mapping.cell(0, Some(2)), Some("NF_CLIENT:Gender"));
        // Row 4 is blank in the workbook
        assert_eq!(mapping.rows.len(), 5);
        assert_eq!(mapping.row_number(2), 5);
        assert_eq!(mapping.raw_cell(2, Some(3)), Some(", "));
        assert_eq!(mapping.raw_cell(3, Some(2)), Some("  00 "));

        let lookups = source.lookups.unwrap();
        assert_eq!(lookups.rows.len(), 3);
        // Numeric cells render without a fraction
        assert_eq!(lookups.cell(0, Some(2)), Some("1"));
        assert_eq!(lookups.cell(2, Some(1)), Some("U"));
    }

    #[test]
    fn test_read_xlsx_bytes_fixture() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/TRANS_REL.xlsx");
        let source = read_xlsx_bytes(std::fs::read(path).unwrap()).unwrap();
        assert_eq!(source.mapping.rows.len(), 5);
        assert!(source.lookups.is_some());
    }

    #[test]
    fn test_workbook_extension() {
        assert!(is_workbook(Path::new("TRANS_REL 3.xlsx")));
        assert!(is_workbook(Path::new("rules.XLS")));
        assert!(!is_workbook(Path::new("rules.csv")));
    }
}
