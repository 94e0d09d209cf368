//! Error types for the rulemap transformation pipeline.
//!
//! One enum per concern:
//!
//! - [`CsvError`] - input record parsing errors
//! - [`LoadError`] - rule source loading errors
//! - [`EvaluationError`] - row-level evaluation errors (never fatal to a batch)
//! - [`SinkError`] - output writing errors
//! - [`AiError`] - LLM client errors
//! - [`RegistryError`] - rule set template registry errors
//! - [`PipelineError`] - top-level orchestration errors
//! - [`ServerError`] - HTTP server errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Input Parsing Errors
// =============================================================================

/// Errors while reading the input record file.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read file.
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed delimited text.
    #[error("Invalid CSV at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Empty file.
    #[error("Input file is empty")]
    EmptyFile,

    /// No headers found.
    #[error("No headers found in input")]
    NoHeaders,
}

// =============================================================================
// Rule Loading Errors
// =============================================================================

/// Errors while building a rule set.
///
/// Bad individual rows are not errors: they are skipped and reported as
/// warnings. Only problems that leave nothing to run end up here.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Rule source could not be read.
    #[error("Failed to read rule source {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// Workbook has no sheet with the expected name.
    #[error("Sheet '{0}' not found in workbook")]
    MissingSheet(String),

    /// A required header is absent from a sheet.
    #[error("Sheet '{sheet}' has no '{column}' column")]
    MissingColumn { sheet: String, column: String },

    /// Unsupported rule source format.
    #[error("Unsupported rule source: {0}")]
    UnsupportedFormat(String),

    /// No usable rule after skipping bad rows.
    #[error("Rule set is empty ({skipped} rows skipped)")]
    EmptyRuleSet { skipped: usize },

    /// Delimited rule sheet could not be parsed.
    #[error("Invalid rule sheet: {0}")]
    Csv(#[from] csv::Error),

    /// Compiled rule set JSON could not be parsed.
    #[error("Invalid rule set JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Evaluation Errors
// =============================================================================

/// Row-level evaluation errors.
///
/// The batch driver records these against the row index and carries on.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The execution strategy cannot resolve this rule kind.
    #[error("No execution strategy for {kind} rule on '{target}'")]
    Unsupported { kind: &'static str, target: String },

    /// The execution strategy failed.
    #[error("Strategy failed on '{target}': {message}")]
    Strategy { target: String, message: String },

    /// The strategy answered with something outside the response contract.
    #[error("Unparseable result for '{target}': {message}")]
    InvalidResponse { target: String, message: String },

    /// A generated identifier was already issued in this batch.
    #[error("Duplicate identifier '{value}' for '{target}'")]
    DuplicateIdentifier { target: String, value: String },
}

// =============================================================================
// Sink Errors
// =============================================================================

/// Errors while writing output records.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Destination could not be created or written.
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV encoding failed.
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    /// Output buffer was not valid UTF-8.
    #[error("Output is not valid UTF-8")]
    Utf8,
}

// =============================================================================
// AI Client Errors
// =============================================================================

/// Errors from the LLM client.
#[derive(Debug, Error)]
pub enum AiError {
    /// Missing configuration value.
    #[error("Missing {0} environment variable")]
    MissingConfig(&'static str),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Provider returned an error payload or status.
    #[error("API error: {0}")]
    ApiError(String),

    /// Response body was not what the chat endpoint promises.
    #[error("Invalid AI response: {0}")]
    InvalidResponse(String),

    /// Timeout.
    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the rule set template registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Template not found.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Imported file is not a valid rule set.
    #[error("Invalid rule set: {0}")]
    Invalid(String),

    /// IO error.
    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Registry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// Only systemic failures land here: unreadable input, empty rule set,
/// unwritable sink. Row failures are reported in the batch summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input parsing error.
    #[error("Input error: {0}")]
    Csv(#[from] CsvError),

    /// Rule loading error.
    #[error("Rule error: {0}")]
    Load(#[from] LoadError),

    /// Sink error.
    #[error("Output error: {0}")]
    Sink(#[from] SinkError),

    /// AI client error.
    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// No records to transform.
    #[error("No records to transform")]
    EmptyInput,
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Socket error.
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for input parsing.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for rule loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for row evaluation.
pub type EvalResult<T> = Result<T, EvaluationError>;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for AI operations.
pub type AiResult<T> = Result<T, AiError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // CsvError -> PipelineError
        let csv_err = CsvError::EmptyFile;
        let pipeline_err: PipelineError = csv_err.into();
        assert!(pipeline_err.to_string().contains("empty"));

        // LoadError -> PipelineError
        let load_err = LoadError::EmptyRuleSet { skipped: 3 };
        let pipeline_err: PipelineError = load_err.into();
        assert!(pipeline_err.to_string().contains("3 rows skipped"));
    }

    #[test]
    fn test_evaluation_error_format() {
        let err = EvaluationError::DuplicateIdentifier {
            target: "ClientKey".into(),
            value: "0042-2025".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ClientKey"));
        assert!(msg.contains("0042-2025"));
    }

    #[test]
    fn test_sink_error_names_path() {
        let err = SinkError::Io {
            path: PathBuf::from("/nope/out.csv"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/nope/out.csv"));
    }
}
