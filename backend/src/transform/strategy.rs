//! Execution strategies for custom and auto-generate rules.
//!
//! The built-in rule kinds are evaluated directly. Custom and auto-generate
//! rules go through an [`ExecutionStrategy`], which sees the record, the rule
//! and the [`BatchState`] shared by every row of one run.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::ai::LlmStrategy;
use crate::error::{EvalResult, EvaluationError};
use crate::models::Record;
use crate::transform::rules::{Rule, RuleKind};

/// `{name}` or `{name:arg}` inside an identifier pattern.
const TOKEN_PATTERN: &str = r"\{([a-z]+)(?::([^}]*))?\}";

// =============================================================================
// Batch state
// =============================================================================

/// State shared by all row evaluations of one batch run.
///
/// Holds the run start time, the current row and every auto-generated value
/// issued so far, per target column.
#[derive(Debug, Clone)]
pub struct BatchState {
    started_at: DateTime<Local>,
    row: usize,
    issued: HashMap<String, HashSet<String>>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    /// Batch state with a fixed start time.
    pub fn starting_at(started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            row: 0,
            issued: HashMap::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Mark `row` (0-based input index) as the one being evaluated.
    pub fn begin_row(&mut self, row: usize) {
        self.row = row;
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn is_issued(&self, target: &str, value: &str) -> bool {
        self.issued.get(target).is_some_and(|values| values.contains(value))
    }

    /// Record an issued identifier. Returns `false` if it was already issued.
    pub fn register(&mut self, target: &str, value: &str) -> bool {
        self.issued
            .entry(target.to_string())
            .or_default()
            .insert(value.to_string())
    }

    /// Forget identifiers issued while evaluating a row that then failed.
    pub fn release(&mut self, target: &str, value: &str) {
        if let Some(values) = self.issued.get_mut(target) {
            values.remove(value);
        }
    }

    pub fn issued_count(&self, target: &str) -> usize {
        self.issued.get(target).map_or(0, HashSet::len)
    }
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Strategy trait
// =============================================================================

/// Resolves rules that plain column arithmetic cannot: custom instructions
/// and generated identifiers.
#[allow(async_fn_in_trait)]
pub trait ExecutionStrategy {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Value for `rule.target_column` on `record`.
    async fn execute(&self, record: &Record, rule: &Rule, state: &mut BatchState) -> EvalResult<String>;
}

/// Which strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Built-in identifier generator; custom rules fail their row
    #[default]
    Deterministic,
    /// Custom rules answered by a chat-completion model
    Llm,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" | "" => Ok(Self::Deterministic),
            "llm" | "ai" => Ok(Self::Llm),
            other => Err(format!("unknown strategy '{}' (expected deterministic or llm)", other)),
        }
    }
}

// =============================================================================
// Deterministic strategy
// =============================================================================

/// Offline strategy: generates identifiers from the rule pattern and rejects
/// custom rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicStrategy;

impl ExecutionStrategy for DeterministicStrategy {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn execute(&self, record: &Record, rule: &Rule, state: &mut BatchState) -> EvalResult<String> {
        match &rule.kind {
            RuleKind::AutoGenerate { source_column, pattern } => {
                let seed = source_column.as_deref().map(|c| record.text(c)).unwrap_or_default();
                generate_identifier(&rule.target_column, &seed, pattern, state)
            }
            other => Err(EvaluationError::Unsupported {
                kind: other.code(),
                target: rule.target_column.clone(),
            }),
        }
    }
}

/// Render `pattern` and make the result unique for `target` within the batch.
///
/// Tokens:
/// - `{seed}` / `{seed:N}`: the seed value, or its last N characters
/// - `{ts:FMT}`: batch start time in chrono `strftime` format
/// - `{seq}`: 1-based row number
/// - `{uuid}`: a random v4 UUID
///
/// A value already issued gets `-2`, `-3`, ... appended until it is new.
pub fn generate_identifier(target: &str, seed: &str, pattern: &str, state: &BatchState) -> EvalResult<String> {
    let base = render_pattern(pattern, seed, state).map_err(|message| EvaluationError::Strategy {
        target: target.to_string(),
        message,
    })?;

    if !state.is_issued(target, &base) {
        return Ok(base);
    }

    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !state.is_issued(target, &candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn render_pattern(pattern: &str, seed: &str, state: &BatchState) -> Result<String, String> {
    let tokens = Regex::new(TOKEN_PATTERN).map_err(|e| e.to_string())?;

    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;

    for caps in tokens.captures_iter(pattern) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&pattern[last..whole.start()]);
        last = whole.end();

        let arg = caps.get(2).map(|m| m.as_str());
        match &caps[1] {
            "seed" => out.push_str(&last_chars(seed, arg)?),
            "ts" => {
                let format = arg.unwrap_or("%Y%m%d%H%M%S");
                if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                    return Err(format!("invalid timestamp format '{}'", format));
                }
                out.push_str(&state.started_at().format(format).to_string());
            }
            "seq" => out.push_str(&(state.row() + 1).to_string()),
            "uuid" => out.push_str(&uuid::Uuid::new_v4().to_string()),
            other => return Err(format!("unknown pattern token '{{{}}}'", other)),
        }
    }
    out.push_str(&pattern[last..]);

    Ok(out)
}

fn last_chars(value: &str, count: Option<&str>) -> Result<String, String> {
    let Some(count) = count else {
        return Ok(value.to_string());
    };
    let n: usize = count
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a character count", count))?;

    let chars: Vec<char> = value.chars().collect();
    let start = chars.len().saturating_sub(n);
    Ok(chars[start..].iter().collect())
}

// =============================================================================
// Strategy selection
// =============================================================================

/// The strategies a run can be configured with.
#[derive(Debug, Clone)]
pub enum Strategy {
    Deterministic(DeterministicStrategy),
    Llm(LlmStrategy),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Deterministic(DeterministicStrategy)
    }
}

impl ExecutionStrategy for Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::Deterministic(s) => s.name(),
            Strategy::Llm(s) => s.name(),
        }
    }

    async fn execute(&self, record: &Record, rule: &Rule, state: &mut BatchState) -> EvalResult<String> {
        match self {
            Strategy::Deterministic(s) => s.execute(record, rule, state).await,
            Strategy::Llm(s) => s.execute(record, rule, state).await,
        }
    }
}
