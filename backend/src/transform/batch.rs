//! Batch driver.
//!
//! Runs the row evaluator over every input record in order. A row that fails
//! is logged and listed in the outcome; the batch always runs to the end.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::logs::{log_error, log_info, log_success, log_warning};
use crate::models::{OutputRecord, Record};
use crate::transform::rules::{evaluate, RuleSet};
use crate::transform::strategy::{BatchState, ExecutionStrategy};

/// Rows between two progress log lines.
pub const PROGRESS_EVERY: usize = 10;

/// Failed rows shown individually before the log switches to a count.
const MAX_LOGGED_FAILURES: usize = 20;

/// Batch driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Keep an empty placeholder output for failed rows so outputs line up
    /// with input rows.
    pub align_failed_rows: bool,
    /// Log progress every N rows (0 disables).
    pub progress_every: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            align_failed_rows: false,
            progress_every: PROGRESS_EVERY,
        }
    }
}

/// One row that did not evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    /// 0-based input row index
    pub row: usize,
    pub message: String,
}

/// Counts reported at the end of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed_rows: Vec<usize>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows, {} succeeded, {} failed", self.total, self.succeeded, self.failed_rows.len())?;
        if !self.failed_rows.is_empty() {
            let rows: Vec<String> = self.failed_rows.iter().map(|r| r.to_string()).collect();
            write!(f, " (rows {})", rows.join(", "))?;
        }
        Ok(())
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Evaluated rows in input order (with placeholders when aligned)
    pub outputs: Vec<OutputRecord>,
    pub failures: Vec<RowFailure>,
    pub total: usize,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.total - self.failures.len()
    }

    pub fn failed_rows(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.row).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            succeeded: self.succeeded(),
            failed_rows: self.failed_rows(),
        }
    }
}

/// Evaluate `records` against `rules` with a fresh [`BatchState`].
pub async fn run<S: ExecutionStrategy>(
    records: &[Record],
    rules: &RuleSet,
    strategy: &S,
    options: BatchOptions,
) -> BatchOutcome {
    let mut state = BatchState::new();
    run_with_state(records, rules, strategy, options, &mut state).await
}

/// Like [`run`], with caller-owned batch state.
pub async fn run_with_state<S: ExecutionStrategy>(
    records: &[Record],
    rules: &RuleSet,
    strategy: &S,
    options: BatchOptions,
    state: &mut BatchState,
) -> BatchOutcome {
    let total = records.len();
    let mut outcome = BatchOutcome {
        outputs: Vec::with_capacity(total),
        failures: Vec::new(),
        total,
    };

    log_info(format!(
        "⚙️  Evaluating {} rows against {} rules ({} strategy)...",
        total,
        rules.len(),
        strategy.name()
    ));

    for (idx, record) in records.iter().enumerate() {
        state.begin_row(idx);

        match evaluate(record, rules, strategy, state).await {
            Ok(output) => outcome.outputs.push(output),
            Err(e) => {
                if outcome.failures.len() < MAX_LOGGED_FAILURES {
                    log_error(format!("Row {}: {}", idx, e));
                }
                outcome.failures.push(RowFailure {
                    row: idx,
                    message: e.to_string(),
                });
                if options.align_failed_rows {
                    outcome.outputs.push(OutputRecord::new());
                }
            }
        }

        let done = idx + 1;
        if options.progress_every > 0 && done % options.progress_every == 0 && done < total {
            log_info(format!("Processed {}/{} rows", done, total));
        }
    }

    let summary = outcome.summary();
    if summary.failed_rows.is_empty() {
        log_success(format!("All {} rows transformed", total));
    } else {
        if summary.failed_rows.len() > MAX_LOGGED_FAILURES {
            log_warning(format!(
                "... {} more failed rows not shown",
                summary.failed_rows.len() - MAX_LOGGED_FAILURES
            ));
        }
        log_warning(summary.to_string());
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalResult, EvaluationError};
    use crate::models::Cell;
    use crate::transform::rules::Rule;
    use crate::transform::strategy::DeterministicStrategy;

    /// Fails custom rules on records whose `Fail` column is set.
    struct FailOnFlag;

    impl ExecutionStrategy for FailOnFlag {
        fn name(&self) -> &'static str {
            "flag"
        }

        async fn execute(&self, record: &Record, rule: &Rule, _state: &mut BatchState) -> EvalResult<String> {
            if record.has_value("Fail") {
                Err(EvaluationError::Strategy {
                    target: rule.target_column.clone(),
                    message: "backend unavailable".to_string(),
                })
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn records() -> Vec<Record> {
        vec![
            Record::new().with("Name", "a").with("Fail", Cell::Missing),
            Record::new().with("Name", "b").with("Fail", "yes"),
            Record::new().with("Name", "c").with("Fail", Cell::Missing),
        ]
    }

    fn rules() -> RuleSet {
        RuleSet::new(vec![Rule::rename("Out", "Name"), Rule::custom("Note", None, "anything")])
    }

    #[tokio::test]
    async fn test_failed_row_recorded_and_batch_continues() {
        let outcome = run(&records(), &rules(), &FailOnFlag, BatchOptions::default()).await;

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.failed_rows(), vec![1]);
        assert_eq!(outcome.outputs[1].get("Out"), Some("c"));
        assert!(outcome.failures[0].message.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_aligned_placeholders() {
        let options = BatchOptions {
            align_failed_rows: true,
            ..BatchOptions::default()
        };
        let outcome = run(&records(), &rules(), &FailOnFlag, options).await;

        assert_eq!(outcome.outputs.len(), 3);
        assert!(outcome.outputs[1].is_empty());
        assert_eq!(outcome.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_summary() {
        let outcome = run(&records(), &rules(), &FailOnFlag, BatchOptions::default()).await;
        let summary = outcome.summary();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed_rows, vec![1]);
        assert_eq!(summary.to_string(), "3 rows, 2 succeeded, 1 failed (rows 1)");
    }

    #[tokio::test]
    async fn test_autogenerate_distinct_over_batch() {
        let records: Vec<Record> = (0..40).map(|_| Record::new().with("ClientId", "CL-7777")).collect();
        let rules = RuleSet::new(vec![Rule::auto_generate(
            "Key",
            Some("ClientId"),
            crate::transform::rules::DEFAULT_ID_PATTERN,
        )]);

        let outcome = run(&records, &rules, &DeterministicStrategy, BatchOptions::default()).await;
        let mut keys: Vec<&str> = outcome.outputs.iter().filter_map(|o| o.get("Key")).collect();
        keys.sort();
        keys.dedup();

        assert!(outcome.is_complete());
        assert_eq!(keys.len(), 40);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcome = run(&[], &rules(), &DeterministicStrategy, BatchOptions::default()).await;
        assert_eq!(outcome.summary().to_string(), "0 rows, 0 succeeded, 0 failed");
    }
}
