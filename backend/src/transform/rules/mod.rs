//! Rules: the rule model, the rule set loader and the row evaluator.

pub mod evaluator;
pub mod loader;
pub mod rule;

pub use evaluator::{apply_builtin, evaluate};
pub use loader::{load_rule_set, unqualify, LoadReport, LoadWarning};
pub use rule::{
    kinds_description, KindCode, LookupTable, Rule, RuleKind, RuleSet, DEFAULT_ID_PATTERN, DEFAULT_SEPARATOR,
    KIND_CODES,
};
