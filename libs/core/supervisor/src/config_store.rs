//! Per-instance, layered configuration store.
//!
//! Layers merge in increasing priority: `Default` < `File` < `Api` <
//! `Environment`. Each named section is validated before it is accepted;
//! a failed validation leaves the store at its last-good value instead of
//! partially applying. The store itself holds no [`crate::event_bus::EventBus`]
//! reference — it is a plain data structure — so `ThreadingService::update_config`
//! is what turns a `set`/`merge` result into `ConfigValidationFailed`/
//! `ConfigSectionChanged`/`ConfigUpdated` events, keeping every
//! cross-component coupling routed through the bus.
//! There is no module-level singleton: each `ThreadingService` owns one
//! store, so two instances in the same process never see each other's
//! configuration.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default,
    File,
    Api,
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChange {
    pub section: String,
    pub source: ConfigSource,
    pub at: DateTime<Utc>,
    pub old: Value,
    pub new: Value,
}

/// A validator's outcome: `errors` block the update entirely; `warnings` are
/// reported alongside an otherwise-accepted value.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_blocking(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub type Validator = fn(&Value) -> ValidationOutcome;

struct Section {
    value: Value,
    source: ConfigSource,
    validator: Option<Validator>,
}

/// Layered, per-instance configuration tree with named sections.
pub struct ConfigStore {
    sections: HashMap<String, Section>,
    defaults: HashMap<String, Value>,
    change_log: VecDeque<ConfigChange>,
    max_change_log: usize,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self { sections: HashMap::new(), defaults: HashMap::new(), change_log: VecDeque::new(), max_change_log: 200 }
    }

    /// Register a section's default value and optional validator. Call this
    /// once per section before any `set`/`merge` calls.
    pub fn register_section(&mut self, name: impl Into<String>, default: Value, validator: Option<Validator>) {
        let name = name.into();
        self.defaults.insert(name.clone(), default.clone());
        self.sections.insert(name, Section { value: default, source: ConfigSource::Default, validator });
    }

    pub fn get(&self, section: &str) -> Option<&Value> {
        self.sections.get(section).map(|s| &s.value)
    }

    pub fn source_of(&self, section: &str) -> Option<ConfigSource> {
        self.sections.get(section).map(|s| s.source)
    }

    /// Replace a section wholesale from `source`, validating first. A lower
    /// or equal-priority source never overrides a value already set from a
    /// higher-priority source. On success, returns any non-blocking
    /// warnings the validator raised; on a blocking error the prior value
    /// is left untouched.
    pub fn set(&mut self, section: &str, value: Value, source: ConfigSource) -> Result<Vec<String>, Vec<String>> {
        let Some(existing) = self.sections.get(section) else {
            return Err(vec![format!("unknown configuration section `{section}`")]);
        };
        if source < existing.source {
            return Ok(Vec::new());
        }
        let warnings = if let Some(validator) = existing.validator {
            let outcome = validator(&value);
            if outcome.is_blocking() {
                return Err(outcome.errors);
            }
            outcome.warnings
        } else {
            Vec::new()
        };

        let old = existing.value.clone();
        let entry = self.sections.get_mut(section).unwrap();
        entry.value = value.clone();
        entry.source = source;

        if self.change_log.len() >= self.max_change_log {
            self.change_log.pop_front();
        }
        self.change_log.push_back(ConfigChange { section: section.to_string(), source, at: Utc::now(), old, new: value });
        Ok(warnings)
    }

    /// Deep-merge `patch` into a section's current object value, field by
    /// field, validating the merged result before committing it.
    pub fn merge(&mut self, section: &str, patch: Value, source: ConfigSource) -> Result<Vec<String>, Vec<String>> {
        let Some(existing) = self.sections.get(section) else {
            return Err(vec![format!("unknown configuration section `{section}`")]);
        };
        if source < existing.source {
            return Ok(Vec::new());
        }
        let merged = deep_merge(existing.value.clone(), patch);
        self.set(section, merged, source)
    }

    pub fn reset_to_defaults(&mut self) {
        for (name, default) in self.defaults.clone() {
            if let Some(entry) = self.sections.get_mut(&name) {
                entry.value = default;
                entry.source = ConfigSource::Default;
            }
        }
        self.change_log.clear();
    }

    pub fn export(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, section) in &self.sections {
            map.insert(name.clone(), section.value.clone());
        }
        Value::Object(map)
    }

    /// Import a full tree, applying each top-level key as its own section
    /// set. Unknown keys are reported but do not prevent known keys from
    /// applying.
    pub fn import(&mut self, tree: Value, source: ConfigSource) -> Result<Vec<String>, Vec<String>> {
        let Value::Object(map) = tree else {
            return Err(vec!["configuration import must be a JSON object".to_string()]);
        };
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (section, value) in map {
            match self.set(&section, value, source) {
                Ok(mut w) => warnings.append(&mut w),
                Err(mut e) => errors.append(&mut e),
            }
        }
        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors)
        }
    }

    pub fn change_log(&self) -> impl Iterator<Item = &ConfigChange> {
        self.change_log.iter()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn deep_merge(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => patch_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_pool_section() -> ConfigStore {
        let mut store = ConfigStore::new();
        fn validate_pool(v: &Value) -> ValidationOutcome {
            let mut outcome = ValidationOutcome::ok();
            if v.get("min_workers").and_then(Value::as_u64).is_none() {
                outcome.errors.push("min_workers must be an integer".to_string());
            }
            if v.get("max_workers").and_then(Value::as_u64).is_some_and(|m| m > 64) {
                outcome.warnings.push("max_workers above 64 is unusually high".to_string());
            }
            outcome
        }
        store.register_section("pool", json!({"min_workers": 1, "max_workers": 4}), Some(validate_pool));
        store
    }

    #[test]
    fn validator_warnings_do_not_block_the_update() {
        let mut store = store_with_pool_section();
        let warnings = store.set("pool", json!({"min_workers": 2, "max_workers": 100}), ConfigSource::Api).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(store.get("pool").unwrap()["max_workers"], 100);
    }

    #[test]
    fn higher_priority_source_overrides_lower() {
        let mut store = store_with_pool_section();
        store.set("pool", json!({"min_workers": 2, "max_workers": 4}), ConfigSource::File).unwrap();
        store.set("pool", json!({"min_workers": 1, "max_workers": 4}), ConfigSource::Default).unwrap();
        assert_eq!(store.get("pool").unwrap()["min_workers"], 2);
        assert_eq!(store.source_of("pool"), Some(ConfigSource::File));
    }

    #[test]
    fn invalid_section_is_rejected_and_leaves_prior_value() {
        let mut store = store_with_pool_section();
        let err = store.set("pool", json!({"max_workers": 4}), ConfigSource::Api);
        assert!(err.is_err());
        assert_eq!(store.get("pool").unwrap()["min_workers"], 1);
    }

    #[test]
    fn merge_only_touches_patched_fields() {
        let mut store = store_with_pool_section();
        store.merge("pool", json!({"max_workers": 8}), ConfigSource::Api).unwrap();
        assert_eq!(store.get("pool").unwrap()["min_workers"], 1);
        assert_eq!(store.get("pool").unwrap()["max_workers"], 8);
    }

    #[test]
    fn reset_to_defaults_clears_change_log() {
        let mut store = store_with_pool_section();
        store.set("pool", json!({"min_workers": 3, "max_workers": 4}), ConfigSource::Api).unwrap();
        store.reset_to_defaults();
        assert_eq!(store.get("pool").unwrap()["min_workers"], 1);
        assert_eq!(store.change_log().count(), 0);
    }

    #[test]
    fn import_applies_known_sections_and_reports_unknown() {
        let mut store = store_with_pool_section();
        let err = store.import(json!({"pool": {"min_workers": 2, "max_workers": 4}, "nope": {}}), ConfigSource::Api).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(store.get("pool").unwrap()["min_workers"], 2);
    }
}
