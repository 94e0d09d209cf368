//! Rule set loader.
//!
//! Builds a [`RuleSet`] from a mapping sheet and an optional lookup sheet.
//! Bad rows are skipped and reported as [`LoadWarning`]s; only an empty
//! result (or a mapping sheet without its key columns) fails the load.

use std::collections::HashMap;

use super::rule::{KindCode, LookupTable, Rule, RuleKind, RuleSet, DEFAULT_ID_PATTERN, DEFAULT_SEPARATOR};
use crate::api::logs::{log_success, log_warning};
use crate::error::{LoadError, LoadResult};
use crate::parser::sheet::{RuleSource, Sheet};

const TARGET_HEADERS: &[&str] = &["target_column", "STG_Column_Name"];
const KIND_HEADERS: &[&str] = &["kind", "Transformation Type"];
const PARAM1_HEADERS: &[&str] = &["param1", "Parameter#1"];
const PARAM2_HEADERS: &[&str] = &["param2", "Parameter#2"];

const LOOKUP_NAME_HEADERS: &[&str] = &["lookup", "MapName"];
const LOOKUP_RAW_HEADERS: &[&str] = &["raw", "Map Criteria#1"];
const LOOKUP_VALUE_HEADERS: &[&str] = &["replacement", "Transformed Value"];

/// A row that was skipped or needs attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    /// Sheet the row came from
    pub sheet: String,
    /// Spreadsheet row number (header is row 1)
    pub row: usize,
    pub message: String,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} row {}: {}", self.sheet, self.row, self.message)
    }
}

/// Loaded rule set plus everything that was skipped on the way.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub rule_set: RuleSet,
    pub warnings: Vec<LoadWarning>,
}

/// Keep only the name after the last qualifier: `NF_CLIENT:ClientId` → `ClientId`.
pub fn unqualify(raw: &str) -> String {
    raw.rsplit(':').next().unwrap_or(raw).trim().to_string()
}

/// Load a rule set from a mapping sheet and its optional lookup sheet.
///
/// # Example
///
/// ```rust,ignore
/// let source = read_rule_source(Path::new("TRANS_REL.xlsx"), None)?;
/// let report = load_rule_set(&source)?;
/// for warning in &report.warnings {
///     eprintln!("skipped: {}", warning);
/// }
/// ```
pub fn load_rule_set(source: &RuleSource) -> LoadResult<LoadReport> {
    let mut warnings = Vec::new();

    let lookups = match &source.lookups {
        Some(sheet) => build_lookups(sheet, &mut warnings),
        None => HashMap::new(),
    };

    let (rules, skipped) = build_rules(&source.mapping, &mut warnings)?;
    let rule_set = RuleSet { rules, lookups };

    for rule in rule_set.unresolved_lookups() {
        if let RuleKind::Translate { lookup, .. } = &rule.kind {
            let warning = LoadWarning {
                sheet: source.mapping.name.clone(),
                row: 0,
                message: format!(
                    "lookup table '{}' for '{}' is not defined; every value will translate to \"\"",
                    lookup, rule.target_column
                ),
            };
            log_warning(warning.to_string());
            warnings.push(warning);
        }
    }

    if rule_set.is_empty() {
        return Err(LoadError::EmptyRuleSet { skipped });
    }

    log_success(format!(
        "Loaded {} rules, {} lookup tables ({} rows skipped)",
        rule_set.len(),
        rule_set.lookups.len(),
        skipped
    ));

    Ok(LoadReport { rule_set, warnings })
}

/// Group lookup rows by table identifier.
///
/// Rows missing any of identifier, raw value or replacement are skipped. A
/// repeated raw value within one table keeps the later replacement.
pub fn build_lookups(sheet: &Sheet, warnings: &mut Vec<LoadWarning>) -> HashMap<String, LookupTable> {
    let mut tables: HashMap<String, LookupTable> = HashMap::new();

    let (name_col, raw_col, value_col) = match (
        sheet.column(LOOKUP_NAME_HEADERS),
        sheet.column(LOOKUP_RAW_HEADERS),
        sheet.column(LOOKUP_VALUE_HEADERS),
    ) {
        (Some(n), Some(r), Some(v)) => (n, r, v),
        _ => {
            let warning = LoadWarning {
                sheet: sheet.name.clone(),
                row: 1,
                message: "missing lookup/raw/replacement headers; lookup sheet ignored".to_string(),
            };
            log_warning(warning.to_string());
            warnings.push(warning);
            return tables;
        }
    };

    for idx in 0..sheet.rows.len() {
        let fields = (
            sheet.cell(idx, Some(name_col)),
            sheet.cell(idx, Some(raw_col)),
            sheet.cell(idx, Some(value_col)),
        );

        match fields {
            (Some(name), Some(raw), Some(value)) => {
                tables
                    .entry(name.to_string())
                    .or_default()
                    .insert(raw.to_string(), value.to_string());
            }
            _ => warnings.push(LoadWarning {
                sheet: sheet.name.clone(),
                row: sheet.row_number(idx),
                message: "incomplete lookup row skipped".to_string(),
            }),
        }
    }

    tables
}

/// Build rules from the mapping sheet, in row order.
///
/// Names and kind codes are read trimmed; a default literal and a
/// concatenate separator are taken as written. Returns the rules and the
/// number of skipped rows.
pub fn build_rules(sheet: &Sheet, warnings: &mut Vec<LoadWarning>) -> LoadResult<(Vec<Rule>, usize)> {
    let target_col = sheet.require_column(TARGET_HEADERS)?;
    let kind_col = sheet.require_column(KIND_HEADERS)?;
    let param1_col = sheet.column(PARAM1_HEADERS);
    let param2_col = sheet.column(PARAM2_HEADERS);

    let mut rules = Vec::new();
    let mut skipped = 0;

    for idx in 0..sheet.rows.len() {
        let target = sheet.cell(idx, Some(target_col));
        let code = sheet.cell(idx, Some(kind_col));
        let param1 = sheet.cell(idx, param1_col);
        let param2 = sheet.cell(idx, param2_col);
        let literals = (sheet.raw_cell(idx, param1_col), sheet.raw_cell(idx, param2_col));

        match parse_row(target, code, param1, param2, literals) {
            Ok(rule) => rules.push(rule),
            Err(message) => {
                skipped += 1;
                let warning = LoadWarning {
                    sheet: sheet.name.clone(),
                    row: sheet.row_number(idx),
                    message,
                };
                log_warning(warning.to_string());
                warnings.push(warning);
            }
        }
    }

    Ok((rules, skipped))
}

fn parse_row(
    target: Option<&str>,
    code: Option<&str>,
    param1: Option<&str>,
    param2: Option<&str>,
    (literal1, literal2): (Option<&str>, Option<&str>),
) -> Result<Rule, String> {
    let target = target.ok_or("missing target column")?;
    let code = code.ok_or_else(|| format!("missing rule kind for '{}'", target))?;
    let kind = KindCode::parse(code).ok_or_else(|| format!("unknown rule kind '{}' for '{}'", code, target))?;

    let kind = match kind {
        KindCode::Rename => RuleKind::Rename {
            source_column: param1
                .map(unqualify)
                .ok_or_else(|| format!("rename '{}' has no source column", target))?,
        },

        KindCode::Default => RuleKind::Default {
            value: literal1.unwrap_or_default().to_string(),
        },

        KindCode::Concatenate => {
            let source_columns: Vec<String> = param1
                .unwrap_or_default()
                .split('+')
                .map(unqualify)
                .filter(|s| !s.is_empty())
                .collect();
            if source_columns.len() < 2 {
                return Err(format!(
                    "concatenate '{}' needs at least two '+'-separated sources",
                    target
                ));
            }
            RuleKind::Concatenate {
                source_columns,
                separator: literal2.unwrap_or(DEFAULT_SEPARATOR).to_string(),
            }
        }

        KindCode::Translate => RuleKind::Translate {
            source_column: param1
                .map(unqualify)
                .ok_or_else(|| format!("translate '{}' has no source column", target))?,
            lookup: param2.unwrap_or(target).to_string(),
        },

        KindCode::Custom => RuleKind::Custom {
            source_column: param1.map(unqualify),
            instruction: param2
                .ok_or_else(|| format!("custom '{}' has no instruction", target))?
                .to_string(),
        },

        KindCode::AutoGenerate => RuleKind::AutoGenerate {
            source_column: param1.map(unqualify),
            pattern: param2.unwrap_or(DEFAULT_ID_PATTERN).to_string(),
        },
    };

    Ok(Rule::new(target, kind))
}
