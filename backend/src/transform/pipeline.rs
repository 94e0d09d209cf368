//! High-level pipeline API: rules + input file → output CSV.
//!
//! Combines every step: rule loading, input parsing, batch evaluation,
//! writing and template bookkeeping.
//!
//! # Example
//!
//! ```rust,ignore
//! use rulemap::transform::pipeline::{load_rules, transform_csv, TransformOptions};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rules = load_rules(Path::new("TRANS_REL.xlsx"), None)?.rule_set;
//!     let report = transform_csv(Path::new("clients.csv"), rules, TransformOptions::default()).await?;
//!
//!     println!("{}", report.summary);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ai::{AiConfig, LlmStrategy};
use crate::api::logs::{log_info, log_success, log_warning};
use crate::cache::RuleSetRegistry;
use crate::error::{LoadError, LoadResult, PipelineError, PipelineResult};
use crate::models::{OutputRecord, Record};
use crate::parser::sheet::{read_rule_source, read_xlsx_bytes, RuleSource, Sheet, MAPPING_SHEET, LOOKUP_SHEET};
use crate::parser::{format_delimiter, parse_bytes_auto, parse_file_auto, HeaderCase, ParseResult};
use crate::sink::{write_csv, DEFAULT_OUTPUT};
use crate::transform::batch::{run, BatchOptions, BatchSummary, RowFailure};
use crate::transform::rules::{load_rule_set, LoadReport, RuleSet};
use crate::transform::strategy::{DeterministicStrategy, Strategy, StrategyKind};
use crate::validation::validate_rule_set;

/// Options for one transformation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Input delimiter; auto-detected when `None`
    pub delimiter: Option<char>,

    /// Header normalization for input columns and rule sources
    pub header_case: HeaderCase,

    /// Strategy for custom and auto-generate rules
    pub strategy: StrategyKind,

    /// Where to write the output CSV; nothing is written when `None`
    pub output: Option<PathBuf>,

    /// Keep empty placeholder rows for failed input rows
    pub align_failed_rows: bool,

    /// Template the rules came from, for usage statistics
    pub template_id: Option<String>,

    /// Save the rules as a new template under this name
    pub save_template: Option<String>,

    /// Registry directory (default `.rulemap/rulesets`)
    pub registry_dir: Option<PathBuf>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            header_case: HeaderCase::AsIs,
            strategy: StrategyKind::Deterministic,
            output: Some(PathBuf::from(DEFAULT_OUTPUT)),
            align_failed_rows: false,
            template_id: None,
            save_template: None,
            registry_dir: None,
        }
    }
}

impl TransformOptions {
    fn registry(&self) -> RuleSetRegistry {
        match &self.registry_dir {
            Some(dir) => RuleSetRegistry::with_dir(dir),
            None => RuleSetRegistry::new(),
        }
    }
}

/// Input file information
#[derive(Debug, Clone, Serialize)]
pub struct CsvInfo {
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
    pub row_count: usize,
}

/// Result of a complete run
#[derive(Debug, Clone)]
pub struct TransformReport {
    /// Output columns, in rule order
    pub columns: Vec<String>,

    /// Output rows (placeholders included when aligned)
    pub outputs: Vec<OutputRecord>,

    pub summary: BatchSummary,
    pub failures: Vec<RowFailure>,

    /// Source columns the rules read that the input lacks
    pub missing_sources: Vec<String>,

    pub csv_info: CsvInfo,

    /// File written, if any
    pub output_path: Option<PathBuf>,

    /// Template used or created
    pub template_id: Option<String>,
}

// =============================================================================
// Rule loading
// =============================================================================

/// Load rules from a workbook, a mapping CSV (+ lookup CSV) or compiled JSON.
pub fn load_rules(path: &Path, lookups: Option<&Path>) -> LoadResult<LoadReport> {
    log_info(format!("📋 Loading rules from {}...", path.display()));

    if is_json(path) {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        return compiled_rules(&content);
    }

    load_rule_set(&read_rule_source(path, lookups)?)
}

/// Load rules from uploaded bytes; the file name picks the format.
pub fn load_rules_bytes(file_name: &str, bytes: Vec<u8>, lookups: Option<&[u8]>) -> LoadResult<LoadReport> {
    let path = Path::new(file_name);

    if is_json(path) {
        let content = String::from_utf8(bytes).map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;
        return compiled_rules(&content);
    }

    let mut source = match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase) {
        Some(ext) if ext == "xlsx" || ext == "xlsm" => read_xlsx_bytes(bytes)?,
        Some(ext) if ext == "xls" || ext == "xlsb" || ext == "ods" => {
            return Err(LoadError::UnsupportedFormat(format!(
                ".{} uploads are not supported; use .xlsx or CSV",
                ext
            )))
        }
        _ => RuleSource {
            mapping: Sheet::from_delimited(MAPPING_SHEET, &bytes)?,
            lookups: None,
        },
    };

    if let Some(lookup_bytes) = lookups {
        source.lookups = Some(Sheet::from_delimited(LOOKUP_SHEET, lookup_bytes)?);
    }

    load_rule_set(&source)
}

/// Parse and schema-check a compiled rule set.
pub fn compiled_rules(content: &str) -> LoadResult<LoadReport> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    validate_rule_set(&value).map_err(|errors| LoadError::UnsupportedFormat(errors.join("; ")))?;
    let rule_set: RuleSet = serde_json::from_value(value)?;

    if rule_set.is_empty() {
        return Err(LoadError::EmptyRuleSet { skipped: 0 });
    }

    log_success(format!("Loaded {} compiled rules", rule_set.len()));
    Ok(LoadReport {
        rule_set,
        warnings: Vec::new(),
    })
}

/// Rules of a stored template; returns the template id too.
pub fn load_template(id_or_name: &str, registry_dir: Option<&Path>) -> PipelineResult<(String, RuleSet)> {
    let registry = match registry_dir {
        Some(dir) => RuleSetRegistry::with_dir(dir),
        None => RuleSetRegistry::new(),
    };
    let stored = registry.resolve(id_or_name)?;
    log_success(format!("Using template \"{}\" ({})", stored.name, stored.id));
    Ok((stored.id.clone(), stored.rule_set.clone()))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

// =============================================================================
// Transformation
// =============================================================================

/// Build the execution strategy for a run.
pub fn build_strategy(kind: StrategyKind) -> PipelineResult<Strategy> {
    match kind {
        StrategyKind::Deterministic => Ok(Strategy::Deterministic(DeterministicStrategy)),
        StrategyKind::Llm => {
            let config = AiConfig::from_env()?;
            log_info(format!("🤖 LLM strategy: {} ({})", config.model, config.endpoint));
            Ok(Strategy::Llm(LlmStrategy::new(config)?))
        }
    }
}

/// Transform an input file.
pub async fn transform_csv(input: &Path, rules: RuleSet, options: TransformOptions) -> PipelineResult<TransformReport> {
    log_info(format!("📖 Reading {}...", input.display()));
    let parsed = parse_file_auto(input, options.delimiter, options.header_case)?;
    transform_parsed(parsed, rules, options).await
}

/// Transform input bytes.
pub async fn transform_bytes(bytes: &[u8], rules: RuleSet, options: TransformOptions) -> PipelineResult<TransformReport> {
    log_info("📖 Reading uploaded input...");
    let parsed = parse_bytes_auto(bytes, options.delimiter, options.header_case)?;
    transform_parsed(parsed, rules, options).await
}

/// Transform already-parsed records.
pub async fn transform_records(
    records: Vec<Record>,
    headers: Vec<String>,
    rules: RuleSet,
    options: TransformOptions,
) -> PipelineResult<TransformReport> {
    let parsed = ParseResult {
        records,
        encoding: "utf-8".to_string(),
        delimiter: options.delimiter.unwrap_or(','),
        headers,
    };
    transform_parsed(parsed, rules, options).await
}

async fn transform_parsed(parsed: ParseResult, rules: RuleSet, options: TransformOptions) -> PipelineResult<TransformReport> {
    log_success(format!("Detected encoding: {}", parsed.encoding));
    log_success(format!("Detected separator: '{}'", format_delimiter(parsed.delimiter)));
    log_success(format!("Read {} rows, {} columns", parsed.records.len(), parsed.headers.len()));

    if parsed.records.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let csv_info = CsvInfo {
        encoding: parsed.encoding,
        delimiter: parsed.delimiter,
        headers: parsed.headers,
        row_count: parsed.records.len(),
    };

    let rules = rules.normalize_sources(options.header_case);
    let columns = rules.target_columns();

    let missing_sources = rules.missing_sources(&csv_info.headers);
    if !missing_sources.is_empty() {
        log_warning(format!(
            "Input lacks {} referenced column(s), read as empty: {}",
            missing_sources.len(),
            missing_sources.join(", ")
        ));
    }

    let strategy = build_strategy(options.strategy)?;
    let batch_options = BatchOptions {
        align_failed_rows: options.align_failed_rows,
        ..BatchOptions::default()
    };
    let outcome = run(&parsed.records, &rules, &strategy, batch_options).await;
    let summary = outcome.summary();

    let output_path = match &options.output {
        Some(path) => Some(write_csv(path, &columns, &outcome.outputs)?),
        None => None,
    };

    let template_id = record_template(&options, rules, outcome.is_complete())?;

    Ok(TransformReport {
        columns,
        outputs: outcome.outputs,
        summary,
        failures: outcome.failures,
        missing_sources,
        csv_info,
        output_path,
        template_id,
    })
}

/// Update statistics of the template used, or save the rules as a new one.
fn record_template(options: &TransformOptions, rules: RuleSet, complete: bool) -> PipelineResult<Option<String>> {
    if options.template_id.is_none() && options.save_template.is_none() {
        return Ok(None);
    }

    let mut registry = options.registry();

    if let Some(id) = &options.template_id {
        registry.update_stats(id, complete)?;
        return Ok(Some(id.clone()));
    }

    match &options.save_template {
        Some(name) => {
            let id = registry.save(rules, name)?;
            log_success(format!("→ Saved as template: {}", id));
            Ok(Some(id))
        }
        None => Ok(None),
    }
}
