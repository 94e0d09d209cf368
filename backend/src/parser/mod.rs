//! Delimited-text input parser with encoding and delimiter auto-detection.
//!
//! Turns an input file into [`Record`]s. Rule sources are read by [`sheet`].

pub mod sheet;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CsvError, CsvResult};
use crate::models::{Cell, Record};

/// How input header names are normalized before rules see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HeaderCase {
    /// Keep headers exactly as written (trimmed).
    #[default]
    AsIs,
    /// `CLIENTID` → `clientid`
    Lower,
    /// `clientId` → `Clientid`
    Capitalize,
}

impl HeaderCase {
    pub fn apply(self, name: &str) -> String {
        let name = name.trim();
        match self {
            HeaderCase::AsIs => name.to_string(),
            HeaderCase::Lower => name.to_lowercase(),
            HeaderCase::Capitalize => {
                let lower = name.to_lowercase();
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed records, one per data row
    pub records: Vec<Record>,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
    /// Column headers (after normalization)
    pub headers: Vec<String>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        // UTF-8 and anything unknown: lossy UTF-8
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [';', ',', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse delimited text into records.
///
/// Headers are trimmed and normalized with `header_case`. Empty fields become
/// [`Cell::Missing`]; short rows are padded with missing cells, extra fields
/// are ignored. Empty lines are skipped, but a line of blank fields is kept
/// as a record of missing cells.
///
/// # Example
/// ```ignore
/// use rulemap::parser::{parse_str, HeaderCase};
///
/// let records = parse_str("name;age\nAlice;30", ';', HeaderCase::AsIs).unwrap();
/// assert_eq!(records[0].text("name"), "Alice");
/// ```
pub fn parse_str(content: &str, delimiter: char, header_case: HeaderCase) -> CsvResult<Vec<Record>> {
    parse_with_headers(content, delimiter, header_case).map(|(_, records)| records)
}

fn parse_with_headers(
    content: &str,
    delimiter: char,
    header_case: HeaderCase,
) -> CsvResult<(Vec<String>, Vec<Record>)> {
    if content.trim().is_empty() {
        return Err(CsvError::EmptyFile);
    }

    let delimiter = u8::try_from(delimiter).map_err(|_| CsvError::Parse {
        line: 1,
        message: format!("delimiter '{}' is not a single byte", delimiter),
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CsvError::Parse { line: 1, message: e.to_string() })?
        .iter()
        .map(|h| header_case.apply(h.trim_matches('"')))
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(CsvError::NoHeaders);
    }

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| CsvError::Parse {
            line: e.position().map(|p| p.line() as usize).unwrap_or(idx + 2),
            message: e.to_string(),
        })?;

        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), row.get(i).map(Cell::from_raw).unwrap_or(Cell::Missing)))
            .collect();
        records.push(record);
    }

    Ok((headers, records))
}

/// Parse a file with auto-detection of encoding and (unless given) delimiter.
///
/// # Example
/// ```ignore
/// let result = parse_file_auto("clients.csv", None, HeaderCase::AsIs)?;
/// println!("Encoding: {}, Delimiter: '{}'", result.encoding, result.delimiter);
/// ```
pub fn parse_file_auto<P: AsRef<Path>>(
    path: P,
    delimiter: Option<char>,
    header_case: HeaderCase,
) -> CsvResult<ParseResult> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_bytes_auto(&bytes, delimiter, header_case)
}

/// Parse bytes with auto-detection of encoding and (unless given) delimiter.
pub fn parse_bytes_auto(
    bytes: &[u8],
    delimiter: Option<char>,
    header_case: HeaderCase,
) -> CsvResult<ParseResult> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(content));

    let (headers, records) = parse_with_headers(content, delimiter, header_case)?;

    Ok(ParseResult {
        records,
        encoding,
        delimiter,
        headers,
    })
}

/// Format a delimiter for display
pub fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "TAB".to_string(),
        c => c.to_string(),
    }
}
