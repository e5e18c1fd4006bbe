//! Profile data model and compile-time validation (§3).
//!
//! A [`Profile`] is what a YAML loader (out of scope for this crate,
//! see §6) deserializes into. [`Profile::compile`] enforces every
//! invariant in §3 and produces a [`CompiledProfile`] with defaults
//! already folded into each control — the DAG builder, filter, and
//! engine only ever see compiled controls.

use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegletError;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());
static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());
static PLUGIN_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ControlDefaults {
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Observation {
    pub plugin: String,
    /// Present but possibly empty — absence is a deserialize error,
    /// which is what §3 means by "not absent".
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub expect: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Control {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Controls {
    #[serde(default)]
    pub defaults: ControlDefaults,
    pub items: Vec<Control>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(rename = "profile")]
    pub metadata: ProfileMetadata,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub vars: serde_json::Map<String, serde_json::Value>,
    pub controls: Controls,
}

/// A control after defaults have been folded in and every invariant in
/// §3 has been checked. This is the shape the DAG builder, filter, and
/// engine operate on.
#[derive(Debug, Clone)]
pub struct CompiledControl {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub owner: Option<String>,
    pub tags: HashSet<String>,
    pub timeout: Option<Duration>,
    pub depends_on: HashSet<String>,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone)]
pub struct CompiledProfile {
    pub metadata: ProfileMetadata,
    pub plugins: Vec<String>,
    pub vars: serde_json::Map<String, serde_json::Value>,
    pub controls: Vec<CompiledControl>,
}

impl CompiledProfile {
    /// Every distinct plugin name referenced by any observation, in
    /// first-seen order (used by the capability manager, §4.7 step 1).
    pub fn referenced_plugin_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for control in &self.controls {
            for obs in &control.observations {
                if seen.insert(obs.plugin.clone()) {
                    names.push(obs.plugin.clone());
                }
            }
        }
        names
    }
}

impl Profile {
    /// Validate every invariant in §3 and fold control defaults in,
    /// producing a [`CompiledProfile`]. Fails fast with a `config` error
    /// naming the first violation found.
    pub fn compile(self) -> Result<CompiledProfile, RegletError> {
        if self.metadata.name.trim().is_empty() {
            return Err(RegletError::config("profile metadata.name must not be empty"));
        }
        if !VERSION_RE.is_match(&self.metadata.version) {
            return Err(RegletError::config(format!(
                "profile metadata.version '{}' is not of the form X.Y.Z",
                self.metadata.version
            )));
        }

        let defaults = &self.controls.defaults;
        let mut seen_ids = HashSet::new();
        let mut compiled = Vec::with_capacity(self.controls.items.len());

        for control in &self.controls.items {
            if !ID_RE.is_match(&control.id) {
                return Err(RegletError::config(format!(
                    "control id '{}' does not match [A-Za-z0-9_.-]+",
                    control.id
                )));
            }
            if !seen_ids.insert(control.id.clone()) {
                return Err(RegletError::config(format!("duplicate control id '{}'", control.id)));
            }
            if control.observations.is_empty() {
                return Err(RegletError::config(format!("control '{}' has no observations", control.id)));
            }
            for obs in &control.observations {
                validate_plugin_name(&obs.plugin)?;
            }

            let severity = control
                .severity
                .or(defaults.severity)
                .ok_or_else(|| RegletError::config(format!("control '{}' has no severity (set on control or defaults)", control.id)))?;

            let mut tags = defaults.tags.clone();
            tags.extend(control.tags.iter().cloned());

            compiled.push(CompiledControl {
                id: control.id.clone(),
                name: control.name.clone(),
                description: control.description.clone(),
                severity,
                owner: control.owner.clone().or_else(|| defaults.owner.clone()),
                tags,
                timeout: control.timeout.or(defaults.timeout),
                depends_on: control.depends_on.clone(),
                observations: control.observations.clone(),
            });
        }

        for control in &compiled {
            for dep in &control.depends_on {
                if !seen_ids.contains(dep) {
                    return Err(RegletError::config(format!(
                        "control '{}' depends_on unknown control '{}'",
                        control.id, dep
                    )));
                }
            }
        }

        // Acyclic check reuses the DAG builder: any cycle/missing error
        // here is a profile-compile error, not a runtime one.
        crate::dag::build_dag(&compiled)?;

        Ok(CompiledProfile { metadata: self.metadata, plugins: self.plugins, vars: self.vars, controls: compiled })
    }
}

fn validate_plugin_name(name: &str) -> Result<(), RegletError> {
    if name.is_empty() {
        return Err(RegletError::config("observation plugin name must not be empty"));
    }
    if name.len() > 64 {
        return Err(RegletError::config(format!("plugin name '{name}' exceeds 64 characters")));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(RegletError::config(format!("plugin name '{name}' must not contain path separators")));
    }
    if !PLUGIN_NAME_RE.is_match(name) {
        return Err(RegletError::config(format!("plugin name '{name}' does not match [A-Za-z0-9_-]+")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(plugin: &str) -> Observation {
        Observation { plugin: plugin.to_string(), config: serde_json::Map::new(), expect: vec![] }
    }

    fn control(id: &str, depends_on: &[&str]) -> Control {
        Control {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            severity: Some(Severity::Low),
            owner: None,
            tags: HashSet::new(),
            timeout: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            observations: vec![obs("demo")],
        }
    }

    fn profile(items: Vec<Control>) -> Profile {
        Profile {
            metadata: ProfileMetadata { name: "test".into(), version: "1.0.0".into(), description: String::new() },
            plugins: vec![],
            vars: serde_json::Map::new(),
            controls: Controls { defaults: ControlDefaults::default(), items },
        }
    }

    #[test]
    fn compiles_a_minimal_valid_profile() {
        let compiled = profile(vec![control("a", &[])]).compile().unwrap();
        assert_eq!(compiled.controls.len(), 1);
        assert_eq!(compiled.controls[0].severity, Severity::Low);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = profile(vec![control("a", &[]), control("a", &[])]).compile().unwrap_err();
        assert!(err.to_string().contains("duplicate control id"));
    }

    #[test]
    fn rejects_bad_version() {
        let mut p = profile(vec![control("a", &[])]);
        p.metadata.version = "v1".into();
        assert!(p.compile().is_err());
    }

    #[test]
    fn rejects_dangling_dependency() {
        let err = profile(vec![control("a", &["missing"])]).compile().unwrap_err();
        assert!(err.to_string().contains("unknown control"));
    }

    #[test]
    fn rejects_cycle() {
        let mut a = control("a", &["b"]);
        let b = control("b", &["a"]);
        a.depends_on.insert("b".into());
        let err = profile(vec![a, b]).compile().unwrap_err();
        assert_eq!(err.error_type(), crate::error::ErrorType::Config);
    }

    #[test]
    fn rejects_bad_plugin_name() {
        let mut c = control("a", &[]);
        c.observations = vec![obs("bad/name")];
        let err = profile(vec![c]).compile().unwrap_err();
        assert!(err.to_string().contains("path separators"));
    }

    #[test]
    fn tags_are_unioned_from_defaults() {
        let mut p = profile(vec![control("a", &[])]);
        p.controls.defaults.tags.insert("base".into());
        p.controls.items[0].tags.insert("extra".into());
        let compiled = p.compile().unwrap();
        assert!(compiled.controls[0].tags.contains("base"));
        assert!(compiled.controls[0].tags.contains("extra"));
    }

    #[test]
    fn missing_severity_without_default_is_rejected() {
        let mut c = control("a", &[]);
        c.severity = None;
        let err = profile(vec![c]).compile().unwrap_err();
        assert!(err.to_string().contains("no severity"));
    }
}
