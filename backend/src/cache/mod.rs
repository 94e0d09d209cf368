//! Rule set registry - store and reuse compiled rule sets
//!
//! Saves rule sets to disk as JSON templates and matches them to input files
//! by the source columns their rules read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, RegistryResult};
use crate::transform::rules::RuleSet;
use crate::validation::validate_rule_set;

/// Directory where templates are stored (relative to current dir)
const DEFAULT_REGISTRY_DIR: &str = ".rulemap/rulesets";

/// Minimum share of source columns an input must have to be compatible
const MIN_COMPATIBILITY: f64 = 0.5;

/// A stored rule set with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRuleSet {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// The rule set
    pub rule_set: RuleSet,
    /// Source columns the rules read
    pub source_columns: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    /// Share of complete runs, as a moving average (0.0 to 1.0)
    pub success_rate: f64,
    pub use_count: u32,
}

/// Registry of rule set templates
pub struct RuleSetRegistry {
    registry_dir: PathBuf,
    templates: HashMap<String, StoredRuleSet>,
}

impl RuleSetRegistry {
    /// Open the default registry, loading existing templates from disk
    pub fn new() -> Self {
        Self::with_dir(DEFAULT_REGISTRY_DIR)
    }

    /// Open a registry in a custom directory
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self {
            registry_dir: dir.as_ref().to_path_buf(),
            templates: HashMap::new(),
        };
        registry.load_all();
        registry
    }

    pub fn dir(&self) -> &Path {
        &self.registry_dir
    }

    /// Unreadable or malformed files are ignored.
    fn load_all(&mut self) {
        let entries = match fs::read_dir(&self.registry_dir) {
            Ok(e) => e,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(stored) = serde_json::from_str::<StoredRuleSet>(&content) {
                        self.templates.insert(stored.id.clone(), stored);
                    }
                }
            }
        }
    }

    /// All templates, by name
    pub fn list(&self) -> Vec<&StoredRuleSet> {
        let mut all: Vec<_> = self.templates.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        all
    }

    pub fn get(&self, id: &str) -> Option<&StoredRuleSet> {
        self.templates.get(id)
    }

    /// Template by id, or the most recent one with that name.
    pub fn resolve(&self, id_or_name: &str) -> RegistryResult<&StoredRuleSet> {
        if let Some(stored) = self.templates.get(id_or_name) {
            return Ok(stored);
        }
        self.templates
            .values()
            .filter(|t| t.name == id_or_name)
            .max_by_key(|t| t.created_at)
            .ok_or_else(|| RegistryError::NotFound(id_or_name.to_string()))
    }

    /// Templates whose source columns the input mostly has.
    /// Sorted by compatibility score times success rate.
    pub fn find_compatible(&self, headers: &[String]) -> Vec<(&StoredRuleSet, f64)> {
        let mut compatible: Vec<_> = self
            .templates
            .values()
            .filter_map(|t| {
                let score = compatibility(&t.source_columns, headers);
                (score > MIN_COMPATIBILITY).then_some((t, score))
            })
            .collect();

        compatible.sort_by(|a, b| {
            let score_a = a.1 * a.0.success_rate;
            let score_b = b.1 * b.0.success_rate;
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        compatible
    }

    /// Save a rule set as a new template. Returns its id.
    pub fn save(&mut self, rule_set: RuleSet, name: &str) -> RegistryResult<String> {
        fs::create_dir_all(&self.registry_dir)?;

        let id = generate_id(name);
        let stored = StoredRuleSet {
            id: id.clone(),
            name: name.to_string(),
            source_columns: rule_set.source_columns(),
            rule_set,
            created_at: Utc::now(),
            last_used: None,
            success_rate: 1.0,
            use_count: 0,
        };

        self.write(&stored)?;
        self.templates.insert(id.clone(), stored);
        Ok(id)
    }

    /// Import a compiled rule set JSON file
    pub fn import(&mut self, path: &Path, name: Option<&str>) -> RegistryResult<String> {
        let content = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        validate_rule_set(&value).map_err(|errors| RegistryError::Invalid(errors.join("; ")))?;
        let rule_set: RuleSet = serde_json::from_value(value)?;

        let name = name.unwrap_or_else(|| path.file_stem().and_then(|s| s.to_str()).unwrap_or("imported"));

        self.save(rule_set, name)
    }

    /// Record the result of a run with this template
    pub fn update_stats(&mut self, id: &str, success: bool) -> RegistryResult<()> {
        let stored = self
            .templates
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        // Exponential moving average
        stored.success_rate = if success {
            stored.success_rate * 0.9 + 0.1
        } else {
            stored.success_rate * 0.9
        };
        stored.last_used = Some(Utc::now());
        stored.use_count += 1;

        let stored = stored.clone();
        self.write(&stored)
    }

    pub fn delete(&mut self, id: &str) -> RegistryResult<()> {
        if self.templates.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        fs::remove_file(self.path_for(id))?;
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.registry_dir.join(format!("{}.json", id))
    }

    fn write(&self, stored: &StoredRuleSet) -> RegistryResult<()> {
        let content = serde_json::to_string_pretty(stored)?;
        fs::write(self.path_for(&stored.id), content)?;
        Ok(())
    }
}

impl Default for RuleSetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Share of `stored` columns found in `headers`, case-insensitively.
fn compatibility(stored: &[String], headers: &[String]) -> f64 {
    if stored.is_empty() {
        return 0.0;
    }

    let headers_lower: Vec<String> = headers.iter().map(|c| c.to_lowercase()).collect();
    let match_count = stored
        .iter()
        .filter(|col| headers_lower.contains(&col.to_lowercase()))
        .count();

    match_count as f64 / stored.len() as f64
}

/// Slug of the name plus a millisecond timestamp
fn generate_id(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let slug = if slug.is_empty() { "ruleset".to_string() } else { slug };
    format!("{}-{}", slug, Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::rules::Rule;
    use tempfile::tempdir;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn gender_rules() -> RuleSet {
        RuleSet::new(vec![Rule::rename("Sex", "Gender"), Rule::concatenate("Full", &["First", "Last"], " ")])
    }

    #[test]
    fn test_compatibility_score() {
        let score = compatibility(&columns(&["First", "Gender", "Last"]), &columns(&["First", "Gender", "Age"]));
        assert!((score - 0.666).abs() < 0.01); // 2/3 match
    }

    #[test]
    fn test_case_insensitive_match() {
        let score = compatibility(&columns(&["gender", "FIRST"]), &columns(&["Gender", "first"]));
        assert!((score - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_save_reload_and_resolve() {
        let dir = tempdir().unwrap();
        let id = {
            let mut registry = RuleSetRegistry::with_dir(dir.path());
            registry.save(gender_rules(), "CRM Clients").unwrap()
        };
        assert!(id.starts_with("crm-clients-"));

        let registry = RuleSetRegistry::with_dir(dir.path());
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get(&id).map(|t| t.rule_set.clone()), Some(gender_rules()));
        assert_eq!(registry.resolve("CRM Clients").map(|t| t.id.clone()).ok(), Some(id));
        assert!(matches!(registry.resolve("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_find_compatible() {
        let dir = tempdir().unwrap();
        let mut registry = RuleSetRegistry::with_dir(dir.path());
        registry.save(gender_rules(), "clients").unwrap();

        assert_eq!(registry.find_compatible(&columns(&["Gender", "First", "Last"])).len(), 1);
        assert!(registry.find_compatible(&columns(&["Title"])).is_empty());
    }

    #[test]
    fn test_update_stats_moving_average() {
        let dir = tempdir().unwrap();
        let mut registry = RuleSetRegistry::with_dir(dir.path());
        let id = registry.save(gender_rules(), "clients").unwrap();

        registry.update_stats(&id, false).unwrap();
        let stored = registry.get(&id).unwrap();
        assert!((stored.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(stored.use_count, 1);
        assert!(stored.last_used.is_some());

        // Persisted
        let reloaded = RuleSetRegistry::with_dir(dir.path());
        assert_eq!(reloaded.get(&id).map(|t| t.use_count), Some(1));
    }

    #[test]
    fn test_import_validates() {
        let dir = tempdir().unwrap();
        let mut registry = RuleSetRegistry::with_dir(dir.path().join("store"));

        let good = dir.path().join("good.json");
        fs::write(&good, gender_rules().to_json().unwrap()).unwrap();
        let id = registry.import(&good, None).unwrap();
        assert_eq!(registry.get(&id).map(|t| t.name.as_str()), Some("good"));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"rules": [{"target_column": "X", "kind": "rename"}]}"#).unwrap();
        assert!(matches!(registry.import(&bad, None), Err(RegistryError::Invalid(_))));
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let mut registry = RuleSetRegistry::with_dir(dir.path());
        let id = registry.save(gender_rules(), "clients").unwrap();

        registry.delete(&id).unwrap();
        assert!(registry.get(&id).is_none());
        assert!(registry.delete(&id).is_err());
    }
}
