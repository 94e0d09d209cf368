//! Prompts for custom rules.
//!
//! One request per (row, custom rule). The model sees the row, the rule and
//! the exact answer shape it must produce.

use serde_json::{json, Value};

use crate::models::Record;
use crate::transform::rules::{Rule, RuleKind};

/// System prompt shared by every custom-rule request.
pub fn system_prompt() -> String {
    r#"You are a data transformation engine. You receive one input row as a JSON object and one transformation instruction for one output column.

## Rules

1. Apply the instruction to the input row and compute the value of the output column.
2. Use only the data in the row. Do not invent values.
3. If the instruction cannot be applied (for example the source value is empty), the value is an empty string.
4. The value is always a JSON string, even for numbers and dates.

## CRITICAL: Output Format

Reply with exactly one JSON object and nothing else: no markdown, no code fences, no explanation.
The object has exactly one property, named after the output column:

{"<output column>": "<value>"}"#
        .to_string()
}

/// User prompt for `rule` applied to `record`.
pub fn user_prompt(record: &Record, rule: &Rule) -> String {
    let row_json = serde_json::to_string_pretty(&record.to_json()).unwrap_or_default();

    let (source, instruction) = match &rule.kind {
        RuleKind::Custom {
            source_column,
            instruction,
        } => (source_column.as_deref(), instruction.as_str()),
        _ => (None, ""),
    };

    let source_line = match source {
        Some(col) => format!(
            "Source column: `{}` (value: {})\n",
            col,
            serde_json::to_string(&record.text(col)).unwrap_or_default()
        ),
        None => String::new(),
    };

    let target = &rule.target_column;
    let example = json!({ target.as_str(): "..." });

    format!(
        r#"## Input Row

```json
{row_json}
```

## Output Column

Output column: `{target}`
{source_line}Instruction: {instruction}

Reply with exactly: {example}"#
    )
}

/// Chat messages for one custom-rule request.
pub fn build_messages(record: &Record, rule: &Rule) -> Vec<Value> {
    vec![
        json!({ "role": "system", "content": system_prompt() }),
        json!({ "role": "user", "content": user_prompt(record, rule) }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_demands_single_object() {
        let prompt = system_prompt();
        assert!(prompt.contains("exactly one JSON object"));
        assert!(prompt.contains("no code fences"));
    }

    #[test]
    fn test_user_prompt_includes_row_and_instruction() {
        let record = Record::new().with("DateOfBirth", "1990-03-07").with("ClientId", "C1");
        let rule = Rule::custom("Dob", Some("DateOfBirth"), "Reformat as YYYY/DD/MMM");

        let prompt = user_prompt(&record, &rule);
        assert!(prompt.contains("\"ClientId\": \"C1\""));
        assert!(prompt.contains("Source column: `DateOfBirth` (value: \"1990-03-07\")"));
        assert!(prompt.contains("Instruction: Reformat as YYYY/DD/MMM"));
        assert!(prompt.contains(r#"{"Dob":"..."}"#));
    }

    #[test]
    fn test_build_messages_roles() {
        let messages = build_messages(&Record::new(), &Rule::custom("X", None, "Say hi"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert!(!messages[1]["content"].as_str().unwrap_or_default().contains("Source column"));
    }
}
