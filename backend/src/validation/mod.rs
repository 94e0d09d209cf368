//! JSON Schema validation (Draft 7).
//!
//! Two contracts are checked here:
//!
//! - **Rule set JSON**: compiled rule sets and stored templates are validated
//!   against the embedded `schemas/rule-set.json` before deserialization, so
//!   a bad file reports every problem at once.
//! - **LLM responses**: a custom-rule answer must be exactly one JSON object
//!   with one string property, the rule's target column.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use rulemap::validation::validate_llm_response;
//!
//! assert!(validate_llm_response("Dob", &json!({ "Dob": "2024/07/MAR" })).is_ok());
//! assert!(validate_llm_response("Dob", &json!({ "Dob": 7 })).is_err());
//! ```

use serde_json::{json, Value};

/// Embedded rule set schema
const RULE_SET_SCHEMA: &str = include_str!("../../schemas/rule-set.json");

/// Validate a JSON value against a schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with one message per violation
///
/// # Example
/// ```ignore
/// use serde_json::json;
/// use rulemap::validation::validate;
///
/// let schema = json!({
///     "type": "object",
///     "required": ["name"],
///     "properties": {
///         "name": { "type": "string" }
///     }
/// });
///
/// assert!(validate(&schema, &json!({ "name": "test" })).is_ok());
/// assert!(validate(&schema, &json!({ "age": 42 })).is_err());
/// ```
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick true/false check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// The embedded rule set schema.
pub fn rule_set_schema() -> Result<Value, serde_json::Error> {
    serde_json::from_str(RULE_SET_SCHEMA)
}

/// Validate compiled rule set JSON.
pub fn validate_rule_set(data: &Value) -> Result<(), Vec<String>> {
    let schema = rule_set_schema().map_err(|e| vec![format!("Invalid embedded schema: {}", e)])?;
    validate(&schema, data)
}

/// Schema of the answer to a custom rule on `target`.
pub fn response_schema(target: &str) -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": [target],
        "properties": {
            target: { "type": "string" }
        },
        "additionalProperties": false
    })
}

/// Validate an LLM answer for `target`.
pub fn validate_llm_response(target: &str, data: &Value) -> Result<(), Vec<String>> {
    validate(&response_schema(target), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_set_schema_is_valid_json() {
        let schema = rule_set_schema().unwrap();
        assert!(schema.get("definitions").is_some());
    }

    #[test]
    fn test_valid_rule_set() {
        let rules = json!({
            "rules": [
                { "target_column": "Sex", "kind": "rename", "source_column": "Gender" },
                { "target_column": "GenderCode", "kind": "translate", "source_column": "Gender", "lookup": "GenderMap" },
                { "target_column": "Key", "kind": "autogenerate" }
            ],
            "lookups": { "GenderMap": { "M": "1", "F": "2" } }
        });
        assert!(validate_rule_set(&rules).is_ok());
    }

    #[test]
    fn test_invalid_rule_set_reports_each_problem() {
        let rules = json!({
            "rules": [
                { "target_column": "Sex", "kind": "rename" },
                { "target_column": "Full", "kind": "concatenate", "source_columns": ["First"] },
                { "target_column": "X", "kind": "shout" }
            ]
        });
        let errors = validate_rule_set(&rules).unwrap_err();
        assert!(errors.len() >= 3, "{:?}", errors);
    }

    #[test]
    fn test_empty_rule_list_is_invalid() {
        assert!(validate_rule_set(&json!({ "rules": [] })).is_err());
    }

    #[test]
    fn test_llm_response_contract() {
        assert!(validate_llm_response("Dob", &json!({ "Dob": "2024/07/MAR" })).is_ok());
        assert!(validate_llm_response("Dob", &json!({ "Dob": 2024 })).is_err());
        assert!(validate_llm_response("Dob", &json!({ "dob": "x" })).is_err());
        assert!(validate_llm_response("Dob", &json!({ "Dob": "x", "Extra": "y" })).is_err());
        assert!(validate_llm_response("Dob", &json!(["x"])).is_err());
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid(&response_schema("A"), &json!({ "A": "" })));
        assert!(!is_valid(&response_schema("A"), &json!({})));
    }
}
