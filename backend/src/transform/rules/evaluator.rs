//! Row evaluator.
//!
//! Applies a [`RuleSet`] to one [`Record`], rule by rule in definition
//! order. A later rule on the same target overwrites the earlier value.

use crate::error::{EvalResult, EvaluationError};
use crate::models::{OutputRecord, Record};
use crate::transform::strategy::{BatchState, ExecutionStrategy};

use super::rule::{Rule, RuleKind, RuleSet};

/// Evaluate every rule of `rules` against `record`.
///
/// Either all rules apply or the row fails: on error no output is returned
/// and identifiers generated for this row are released from `state`.
pub async fn evaluate<S: ExecutionStrategy>(
    record: &Record,
    rules: &RuleSet,
    strategy: &S,
    state: &mut BatchState,
) -> EvalResult<OutputRecord> {
    let mut output = OutputRecord::new();
    let mut issued: Vec<(&str, String)> = Vec::new();

    for rule in &rules.rules {
        let value = match apply_builtin(record, rule, rules) {
            Some(value) => Ok(value),
            None => resolve(record, rule, strategy, state, &mut issued).await,
        };

        match value {
            Ok(value) => output.set(&rule.target_column, value),
            Err(e) => {
                for (target, value) in &issued {
                    state.release(target, value);
                }
                return Err(e);
            }
        }
    }

    Ok(output)
}

async fn resolve<'r, S: ExecutionStrategy>(
    record: &Record,
    rule: &'r Rule,
    strategy: &S,
    state: &mut BatchState,
    issued: &mut Vec<(&'r str, String)>,
) -> EvalResult<String> {
    let value = strategy.execute(record, rule, state).await?;

    if matches!(rule.kind, RuleKind::AutoGenerate { .. }) {
        if !state.register(&rule.target_column, &value) {
            return Err(EvaluationError::DuplicateIdentifier {
                target: rule.target_column.clone(),
                value,
            });
        }
        issued.push((rule.target_column.as_str(), value.clone()));
    }

    Ok(value)
}

/// Value of a built-in rule, or `None` for rules that need a strategy.
///
/// Absent and missing source values read as `""`; an unknown lookup raw
/// value (or an undefined lookup table) translates to `""`.
pub fn apply_builtin(record: &Record, rule: &Rule, rules: &RuleSet) -> Option<String> {
    let value = match &rule.kind {
        RuleKind::Rename { source_column } => record.text(source_column),

        RuleKind::Default { value } => value.clone(),

        RuleKind::Concatenate { source_columns, separator } => source_columns
            .iter()
            .map(|col| record.text(col))
            .collect::<Vec<_>>()
            .join(separator),

        RuleKind::Translate { source_column, lookup } => record
            .get(source_column)
            .filter(|cell| !cell.is_missing())
            .and_then(|cell| rules.lookup(lookup)?.get(&cell.render()))
            .cloned()
            .unwrap_or_default(),

        RuleKind::Custom { .. } | RuleKind::AutoGenerate { .. } => return None,
    };

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;
    use crate::transform::rules::LookupTable;
    use crate::transform::strategy::{DeterministicStrategy, Strategy};

    fn table(pairs: &[(&str, &str)]) -> LookupTable {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn eval(record: &Record, rules: &RuleSet) -> OutputRecord {
        evaluate(record, rules, &DeterministicStrategy, &mut BatchState::new())
            .await
            .unwrap()
    }

    /// Strategy that answers custom rules with a fixed value.
    struct Echo(&'static str);

    impl ExecutionStrategy for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _record: &Record, _rule: &Rule, _state: &mut BatchState) -> EvalResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_rename_copies_value() {
        let rules = RuleSet::new(vec![Rule::rename("Sex", "Gender")]);
        let out = eval(&Record::new().with("Gender", "F"), &rules).await;
        assert_eq!(out.get("Sex"), Some("F"));
    }

    #[tokio::test]
    async fn test_rename_missing_or_absent_is_empty() {
        let rules = RuleSet::new(vec![Rule::rename("Sex", "Gender")]);

        let out = eval(&Record::new().with("Gender", Cell::Missing), &rules).await;
        assert_eq!(out.get("Sex"), Some(""));

        let out = eval(&Record::new().with("Other", "x"), &rules).await;
        assert_eq!(out.get("Sex"), Some(""));
    }

    #[tokio::test]
    async fn test_default_ignores_record() {
        let rules = RuleSet::new(vec![Rule::default_value("Status", "ACTIVE")]);
        for record in [Record::new(), Record::new().with("Status", "CLOSED")] {
            assert_eq!(eval(&record, &rules).await.get("Status"), Some("ACTIVE"));
        }
    }

    #[tokio::test]
    async fn test_concatenate_missing_first() {
        let rules = RuleSet::new(vec![Rule::concatenate("AB", &["a", "b"], "-")]);
        let out = eval(&Record::new().with("a", Cell::Missing).with("b", "x"), &rules).await;
        assert_eq!(out.get("AB"), Some("-x"));
    }

    #[tokio::test]
    async fn test_concatenate_keeps_trailing_separator() {
        let rules = RuleSet::new(vec![Rule::concatenate("Full", &["First", "Last"], " ")]);
        let record = Record::new().with("First", "Ann").with("Last", Cell::Missing);

        let out = eval(&record, &rules).await;
        assert_eq!(out, [("Full", "Ann ")].into_iter().collect::<OutputRecord>());
    }

    #[tokio::test]
    async fn test_translate_unmapped_is_empty() {
        let rules = RuleSet::new(vec![Rule::translate("GenderCode", "Gender", "GenderMap")])
            .with_lookup("GenderMap", table(&[("M", "1"), ("F", "2")]));

        let out = eval(&Record::new().with("Gender", "X"), &rules).await;
        assert_eq!(out.get("GenderCode"), Some(""));

        let out = eval(&Record::new().with("Gender", "m"), &rules).await;
        assert_eq!(out.get("GenderCode"), Some(""), "keys match exactly");
    }

    #[tokio::test]
    async fn test_translate_numeric_cell_and_unknown_table() {
        let rules = RuleSet::new(vec![
            Rule::translate("Level", "Tier", "TierMap"),
            Rule::translate("Other", "Tier", "NoSuchTable"),
        ])
        .with_lookup("TierMap", table(&[("3", "GOLD")]));

        let out = eval(&Record::new().with("Tier", 3.0), &rules).await;
        assert_eq!(out.get("Level"), Some("GOLD"));
        assert_eq!(out.get("Other"), Some(""));
    }

    #[tokio::test]
    async fn test_gender_scenario() {
        let rules = RuleSet::new(vec![
            Rule::rename("Sex", "Gender"),
            Rule::translate("GenderCode", "Gender", "GenderMap"),
        ])
        .with_lookup("GenderMap", table(&[("M", "1"), ("F", "2")]));

        let out = eval(&Record::new().with("Gender", "M"), &rules).await;
        assert_eq!(out, [("Sex", "M"), ("GenderCode", "1")].into_iter().collect::<OutputRecord>());
    }

    #[tokio::test]
    async fn test_later_rule_wins() {
        let rules = RuleSet::new(vec![Rule::default_value("X", "v1"), Rule::rename("X", "Y")]);
        let out = eval(&Record::new().with("Y", "v2"), &rules).await;

        assert_eq!(out.get("X"), Some("v2"));
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_only_target_columns_in_output() {
        let rules = RuleSet::new(vec![Rule::rename("Sex", "Gender")]);
        let record = Record::new().with("Gender", "M").with("ClientId", "C1");

        let out = eval(&record, &rules).await;
        assert_eq!(out.columns().collect::<Vec<_>>(), vec!["Sex"]);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let rules = RuleSet::new(vec![
            Rule::rename("Sex", "Gender"),
            Rule::concatenate("Full", &["First", "Last"], " "),
            Rule::translate("GenderCode", "Gender", "GenderMap"),
            Rule::default_value("Src", "CRM"),
        ])
        .with_lookup("GenderMap", table(&[("F", "2")]));
        let record = Record::new().with("Gender", "F").with("First", "Ann").with("Last", "Lee");

        let first = eval(&record, &rules).await;
        let second = eval(&record, &rules).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_custom_through_strategy() {
        let rules = RuleSet::new(vec![Rule::custom("Dob", Some("DateOfBirth"), "Reformat")]);
        let out = evaluate(&Record::new(), &rules, &Echo("2024/07/MAR"), &mut BatchState::new())
            .await
            .unwrap();
        assert_eq!(out.get("Dob"), Some("2024/07/MAR"));
    }

    #[tokio::test]
    async fn test_custom_unsupported_fails_row() {
        let rules = RuleSet::new(vec![Rule::rename("Sex", "Gender"), Rule::custom("Dob", None, "Reformat")]);
        let result = evaluate(&Record::new(), &rules, &Strategy::default(), &mut BatchState::new()).await;
        assert!(matches!(result, Err(EvaluationError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_identifier_rejected() {
        let rules = RuleSet::new(vec![Rule::auto_generate("Key", None, "fixed")]);
        let mut state = BatchState::new();

        evaluate(&Record::new(), &rules, &Echo("K1"), &mut state).await.unwrap();
        let err = evaluate(&Record::new(), &rules, &Echo("K1"), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::DuplicateIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_failed_row_releases_identifiers() {
        let rules = RuleSet::new(vec![
            Rule::auto_generate("Key", None, "K"),
            Rule::custom("Dob", None, "Reformat"),
        ]);
        let mut state = BatchState::new();

        assert!(evaluate(&Record::new(), &rules, &DeterministicStrategy, &mut state).await.is_err());
        assert_eq!(state.issued_count("Key"), 0);
    }

    #[tokio::test]
    async fn test_autogenerate_unique_across_batch() {
        let rules = RuleSet::new(vec![Rule::auto_generate("Key", Some("ClientId"), "{seed:2}")]);
        let mut state = BatchState::new();
        let mut seen = std::collections::HashSet::new();

        for i in 0..25 {
            state.begin_row(i);
            let record = Record::new().with("ClientId", "C-00");
            let out = evaluate(&record, &rules, &DeterministicStrategy, &mut state).await.unwrap();
            assert!(seen.insert(out.get("Key").unwrap_or_default().to_string()));
        }
        assert_eq!(seen.len(), 25);
    }
}
