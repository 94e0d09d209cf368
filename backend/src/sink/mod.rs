//! CSV sink for output records.
//!
//! Columns are the rule set's distinct target columns in rule order. A row
//! without a value for some column writes an empty field there.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::api::logs::log_success;
use crate::error::{SinkError, SinkResult};
use crate::models::OutputRecord;

/// Where `transform` writes when no output path is given.
pub const DEFAULT_OUTPUT: &str = "Output/mapped_output_file.csv";

/// Write `outputs` as CSV to any writer.
pub fn write_to<W: Write>(writer: W, columns: &[String], outputs: &[OutputRecord]) -> SinkResult<()> {
    let mut csv = csv::WriterBuilder::new().flexible(false).from_writer(writer);

    if !columns.is_empty() {
        csv.write_record(columns)?;
        for output in outputs {
            csv.write_record(output.row(columns))?;
        }
    }

    csv.flush().map_err(|source| SinkError::Io {
        path: PathBuf::from("<writer>"),
        source,
    })
}

/// Render `outputs` as a CSV string.
pub fn to_csv_string(columns: &[String], outputs: &[OutputRecord]) -> SinkResult<String> {
    let mut buffer = Vec::new();
    write_to(&mut buffer, columns, outputs)?;
    String::from_utf8(buffer).map_err(|_| SinkError::Utf8)
}

/// Write `outputs` to `path`, replacing any existing file.
///
/// Parent directories are created as needed. Returns the path written.
pub fn write_csv(path: &Path, columns: &[String], outputs: &[OutputRecord]) -> SinkResult<PathBuf> {
    let io_error = |source: std::io::Error| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let file = std::fs::File::create(path).map_err(io_error)?;
    write_to(std::io::BufWriter::new(file), columns, outputs)?;

    log_success(format!("Wrote {} rows to {}", outputs.len(), path.display()));
    Ok(path.to_path_buf())
}
