//! Rule set definition.
//!
//! A [`RuleSet`] is an ordered list of [`Rule`]s plus the lookup tables its
//! translate rules refer to by name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::parser::HeaderCase;

/// Pattern used by auto-generate rules that do not give one.
///
/// Last four characters of the seed column, then the run timestamp as
/// `YYYY-DDMM-HHMM`.
pub const DEFAULT_ID_PATTERN: &str = "{seed:4}-{ts:%Y}-{ts:%d%m}-{ts:%H%M}";

/// Separator used by concatenate rules that do not give one.
pub const DEFAULT_SEPARATOR: &str = " ";

/// One transformation rule producing one target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Output column this rule writes
    pub target_column: String,

    /// What the rule does
    #[serde(flatten)]
    pub kind: RuleKind,
}

/// The kinds of rule, with their payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Copy a source column as-is
    Rename { source_column: String },

    /// Assign a literal, ignoring the record
    Default { value: String },

    /// Join several source columns
    Concatenate {
        source_columns: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },

    /// Replace a source value through a named lookup table
    Translate { source_column: String, lookup: String },

    /// Free-text instruction resolved by the execution strategy
    Custom {
        #[serde(default)]
        source_column: Option<String>,
        instruction: String,
    },

    /// Identifier generated by the execution strategy, unique per batch
    #[serde(rename = "autogenerate")]
    AutoGenerate {
        #[serde(default)]
        source_column: Option<String>,
        #[serde(default = "default_pattern")]
        pattern: String,
    },
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_pattern() -> String {
    DEFAULT_ID_PATTERN.to_string()
}

/// Canonical kind code and the legacy single-letter codes mapped onto it.
pub const KIND_CODES: &[(&str, &[&str], &str)] = &[
    ("rename", &["O"], "copy source column as-is (one-to-one)"),
    ("default", &["D"], "assign a literal value"),
    ("concatenate", &["J", "C"], "join source columns with a separator"),
    ("translate", &["T"], "replace via a named lookup table"),
    ("custom", &["X"], "free-text instruction for the execution strategy"),
    ("autogenerate", &["A"], "unique identifier from a pattern"),
];

/// Kind codes a rule sheet may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindCode {
    Rename,
    Default,
    Concatenate,
    Translate,
    Custom,
    AutoGenerate,
}

impl KindCode {
    /// Parse a canonical or legacy code, case-insensitively.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "rename" | "o" => Some(Self::Rename),
            "default" | "d" => Some(Self::Default),
            "concatenate" | "concat" | "j" | "c" => Some(Self::Concatenate),
            "translate" | "t" => Some(Self::Translate),
            "custom" | "x" => Some(Self::Custom),
            "autogenerate" | "auto_generate" | "a" => Some(Self::AutoGenerate),
            _ => None,
        }
    }
}

impl RuleKind {
    /// Canonical code of this kind.
    pub fn code(&self) -> &'static str {
        match self {
            RuleKind::Rename { .. } => "rename",
            RuleKind::Default { .. } => "default",
            RuleKind::Concatenate { .. } => "concatenate",
            RuleKind::Translate { .. } => "translate",
            RuleKind::Custom { .. } => "custom",
            RuleKind::AutoGenerate { .. } => "autogenerate",
        }
    }

    /// Source columns this rule reads.
    pub fn sources(&self) -> Vec<&str> {
        match self {
            RuleKind::Rename { source_column } | RuleKind::Translate { source_column, .. } => {
                vec![source_column.as_str()]
            }
            RuleKind::Concatenate { source_columns, .. } => {
                source_columns.iter().map(String::as_str).collect()
            }
            RuleKind::Custom { source_column, .. } | RuleKind::AutoGenerate { source_column, .. } => {
                source_column.iter().map(String::as_str).collect()
            }
            RuleKind::Default { .. } => Vec::new(),
        }
    }

    /// Whether evaluation needs an execution strategy.
    pub fn needs_strategy(&self) -> bool {
        matches!(self, RuleKind::Custom { .. } | RuleKind::AutoGenerate { .. })
    }

    fn sources_mut(&mut self) -> Vec<&mut String> {
        match self {
            RuleKind::Rename { source_column } | RuleKind::Translate { source_column, .. } => {
                vec![source_column]
            }
            RuleKind::Concatenate { source_columns, .. } => source_columns.iter_mut().collect(),
            RuleKind::Custom { source_column, .. } | RuleKind::AutoGenerate { source_column, .. } => {
                source_column.iter_mut().collect()
            }
            RuleKind::Default { .. } => Vec::new(),
        }
    }
}

impl Rule {
    pub fn rename(target: &str, source: &str) -> Self {
        Self::new(target, RuleKind::Rename { source_column: source.to_string() })
    }

    pub fn default_value(target: &str, value: &str) -> Self {
        Self::new(target, RuleKind::Default { value: value.to_string() })
    }

    pub fn concatenate(target: &str, sources: &[&str], separator: &str) -> Self {
        Self::new(
            target,
            RuleKind::Concatenate {
                source_columns: sources.iter().map(|s| s.to_string()).collect(),
                separator: separator.to_string(),
            },
        )
    }

    pub fn translate(target: &str, source: &str, lookup: &str) -> Self {
        Self::new(
            target,
            RuleKind::Translate {
                source_column: source.to_string(),
                lookup: lookup.to_string(),
            },
        )
    }

    pub fn custom(target: &str, source: Option<&str>, instruction: &str) -> Self {
        Self::new(
            target,
            RuleKind::Custom {
                source_column: source.map(str::to_string),
                instruction: instruction.to_string(),
            },
        )
    }

    pub fn auto_generate(target: &str, seed: Option<&str>, pattern: &str) -> Self {
        Self::new(
            target,
            RuleKind::AutoGenerate {
                source_column: seed.map(str::to_string),
                pattern: pattern.to_string(),
            },
        )
    }

    pub fn new(target: &str, kind: RuleKind) -> Self {
        Self {
            target_column: target.to_string(),
            kind,
        }
    }
}

/// Named raw → replacement mapping. Keys match exactly.
pub type LookupTable = HashMap<String, String>;

/// An ordered rule collection, immutable for the duration of a job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rules in definition order
    pub rules: Vec<Rule>,

    /// Lookup tables by identifier
    #[serde(default)]
    pub lookups: HashMap<String, LookupTable>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            lookups: HashMap::new(),
        }
    }

    pub fn with_lookup(mut self, name: &str, table: LookupTable) -> Self {
        self.lookups.insert(name.to_string(), table);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&LookupTable> {
        self.lookups.get(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Distinct target columns in first-definition order.
    pub fn target_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for rule in &self.rules {
            if !columns.contains(&rule.target_column) {
                columns.push(rule.target_column.clone());
            }
        }
        columns
    }

    /// Distinct source columns referenced by any rule, sorted.
    pub fn source_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .rules
            .iter()
            .flat_map(|r| r.kind.sources())
            .map(str::to_string)
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Source columns absent from `headers`.
    ///
    /// Absent columns are not an error at evaluation time; this is for
    /// reporting before a run.
    pub fn missing_sources(&self, headers: &[String]) -> Vec<String> {
        self.source_columns()
            .into_iter()
            .filter(|col| !headers.iter().any(|h| h == col))
            .collect()
    }

    /// Translate rules whose lookup table is not defined.
    pub fn unresolved_lookups(&self) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| matches!(&r.kind, RuleKind::Translate { lookup, .. } if !self.lookups.contains_key(lookup)))
            .collect()
    }

    /// Whether any rule needs an execution strategy.
    pub fn needs_strategy(&self) -> bool {
        self.rules.iter().any(|r| r.kind.needs_strategy())
    }

    /// Apply the input header normalization to every source reference.
    pub fn normalize_sources(mut self, case: HeaderCase) -> Self {
        if case != HeaderCase::AsIs {
            for rule in &mut self.rules {
                for source in rule.kind.sources_mut() {
                    *source = case.apply(source);
                }
            }
        }
        self
    }

    /// Parse a compiled rule set from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Markdown table of the kind-code vocabulary.
pub fn kinds_description() -> String {
    let mut out = String::from("| Kind | Legacy codes | Description |\n|------|--------------|-------------|\n");
    for (code, legacy, desc) in KIND_CODES {
        out.push_str(&format!("| {} | {} | {} |\n", code, legacy.join(", "), desc));
    }
    out
}
