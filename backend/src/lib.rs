//! # rulemap - rule-driven column mapping for tabular records
//!
//! rulemap reads a rule set (a workbook with `Mapping` and `Transform`
//! sheets, mapping CSVs, or compiled JSON) and applies it to every row of a
//! delimited input file, producing a CSV with exactly the target columns.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Rule file  │────▶│   Loader    │────▶│  Evaluator  │────▶│    Sink     │
//! │ (xlsx/csv)  │     │  (RuleSet)  │     │ (per row)   │     │   (CSV)     │
//! └─────────────┘     └─────────────┘     └──────▲──────┘     └─────────────┘
//!                                                │
//! ┌─────────────┐     ┌─────────────┐     ┌──────┴──────┐
//! │ Input file  │────▶│   Parser    │────▶│ Batch driver│
//! │  (ISO/UTF8) │     │  (auto-enc) │     │ + strategy  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rulemap::{load_rules, transform_csv, TransformOptions};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() {
//!     let rules = load_rules(Path::new("TRANS_REL.xlsx"), None).unwrap().rule_set;
//!     let report = transform_csv(Path::new("clients.csv"), rules, TransformOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{}", report.summary);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Records and output records
//! - [`parser`] - Input parsing with auto-detection, rule source sheets
//! - [`transform`] - Rules, strategies, batch driver and pipeline
//! - [`sink`] - CSV output
//! - [`validation`] - JSON Schema checks
//! - [`cache`] - Rule set templates
//! - [`ai`] - LLM strategy for custom rules
//! - [`api`] - HTTP API server and log stream

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Transformation
pub mod transform;

// Output
pub mod sink;

// Validation
pub mod validation;

// Templates
pub mod cache;

// AI
pub mod ai;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    AiError, CsvError, EvaluationError, LoadError, PipelineError, RegistryError, ServerError, SinkError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{Cell, OutputRecord, Record};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::sheet::{read_rule_source, RuleSource, Sheet};
pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, parse_file_auto, HeaderCase, ParseResult,
};

// =============================================================================
// Re-exports - Rules
// =============================================================================

pub use transform::rules::{
    evaluate, kinds_description, load_rule_set, LoadReport, LoadWarning, LookupTable, Rule, RuleKind, RuleSet,
};

// =============================================================================
// Re-exports - Strategies and batch
// =============================================================================

pub use transform::batch::{run, BatchOptions, BatchOutcome, BatchSummary, RowFailure};
pub use transform::strategy::{BatchState, DeterministicStrategy, ExecutionStrategy, Strategy, StrategyKind};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{
    build_strategy, load_rules, load_template, transform_bytes, transform_csv, transform_records, CsvInfo,
    TransformOptions, TransformReport,
};

// =============================================================================
// Re-exports - Output, validation, templates, AI
// =============================================================================

pub use ai::{AiClient, AiConfig, LlmStrategy};
pub use cache::{RuleSetRegistry, StoredRuleSet};
pub use sink::{to_csv_string, write_csv, DEFAULT_OUTPUT};
pub use validation::{is_valid, validate, validate_llm_response, validate_rule_set};

// =============================================================================
// Re-exports - API
// =============================================================================

pub use api::types::{error_response, CsvMetadata, ResponseMetadata, TransformResponse};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server};
}
