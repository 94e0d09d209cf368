//! REST API types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::parser::format_delimiter;
use crate::transform::batch::{BatchSummary, RowFailure};
use crate::transform::pipeline::TransformReport;
use crate::transform::rules::LoadWarning;

/// Response to `POST /api/transform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    /// Unique job identifier
    pub job_id: String,

    /// "ready" when every row evaluated, "warning" otherwise
    pub status: String,

    /// Output columns, in rule order
    pub columns: Vec<String>,

    /// Output rows as objects keyed by column
    pub rows: Vec<Value>,

    /// Output as CSV text, same content as `rows`
    pub csv: String,

    pub summary: BatchSummary,

    pub failures: Vec<RowFailure>,

    pub metadata: ResponseMetadata,
}

/// Metadata about the run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub rule_count: usize,

    /// Rule rows skipped while loading
    pub rule_warnings: Vec<String>,

    /// Referenced source columns absent from the input
    pub missing_sources: Vec<String>,

    pub strategy: String,

    pub csv_info: CsvMetadata,
}

/// Input file metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvMetadata {
    pub encoding: String,
    pub delimiter: String,
    pub row_count: usize,
    pub columns: Vec<String>,
}

impl TransformResponse {
    pub fn new(report: TransformReport, csv: String, rule_count: usize, warnings: &[LoadWarning], strategy: &str) -> Self {
        let rows = report.outputs.iter().map(|o| o.to_json()).collect();

        TransformResponse {
            job_id: Uuid::new_v4().to_string(),
            status: if report.failures.is_empty() { "ready" } else { "warning" }.to_string(),
            columns: report.columns,
            rows,
            csv,
            summary: report.summary,
            failures: report.failures,
            metadata: ResponseMetadata {
                rule_count,
                rule_warnings: warnings.iter().map(|w| w.to_string()).collect(),
                missing_sources: report.missing_sources,
                strategy: strategy.to_string(),
                csv_info: CsvMetadata {
                    encoding: report.csv_info.encoding,
                    delimiter: format_delimiter(report.csv_info.delimiter),
                    row_count: report.csv_info.row_count,
                    columns: report.csv_info.headers,
                },
            },
        }
    }
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "jobId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
        "columns": [],
        "rows": [],
        "csv": "",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputRecord;
    use crate::transform::pipeline::CsvInfo;

    fn report(failures: Vec<RowFailure>) -> TransformReport {
        TransformReport {
            columns: vec!["Sex".to_string()],
            outputs: vec![[("Sex", "M")].into_iter().collect::<OutputRecord>()],
            summary: BatchSummary {
                total: 1 + failures.len(),
                succeeded: 1,
                failed_rows: failures.iter().map(|f| f.row).collect(),
            },
            failures,
            missing_sources: vec![],
            csv_info: CsvInfo {
                encoding: "utf-8".to_string(),
                delimiter: '\t',
                headers: vec!["Gender".to_string()],
                row_count: 1,
            },
            output_path: None,
            template_id: None,
        }
    }

    #[test]
    fn test_response_shape() {
        let response = TransformResponse::new(report(vec![]), "Sex\nM\n".to_string(), 1, &[], "deterministic");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "ready");
        assert_eq!(json["rows"][0]["Sex"], "M");
        assert_eq!(json["summary"]["failedRows"], json!([]));
        assert_eq!(json["metadata"]["csvInfo"]["delimiter"], "TAB");
    }

    #[test]
    fn test_failures_give_warning_status() {
        let failure = RowFailure {
            row: 1,
            message: "boom".to_string(),
        };
        let response = TransformResponse::new(report(vec![failure]), String::new(), 1, &[], "llm");
        assert_eq!(response.status, "warning");
        assert_eq!(response.summary.failed_rows, vec![1]);
    }

    #[test]
    fn test_error_response() {
        let value = error_response("no rules");
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "no rules");
    }
}
