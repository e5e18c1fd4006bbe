//! Control filter (C10): tag/severity/id include-exclude selection plus
//! an optional CEL-like boolean expression (§4.10).

use std::collections::{HashMap, HashSet};

use cel_interpreter::{Context, Program, Value as CelValue};

use crate::error::RegletError;
use crate::profile::{CompiledControl, Severity};

/// Reason strings, one per filter mechanism a control can be excluded
/// by (§6 `check` flags) — spec.md:208 gives the tags-filter string as
/// the literal example; the others follow the same naming convention.
pub const SKIP_REASON: &str = "excluded by --tags filter";
pub const SKIP_CONTROL_FILTER_REASON: &str = "excluded by --control filter";
pub const SKIP_EXCLUDE_CONTROL_FILTER_REASON: &str = "excluded by --exclude-control filter";
pub const SKIP_EXCLUDE_TAGS_FILTER_REASON: &str = "excluded by --exclude-tags filter";
pub const SKIP_EXPRESSION_FILTER_REASON: &str = "excluded by --filter expression";

/// The raw filter inputs as they arrive from the CLI (§6 `check` flags).
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    pub include_tags: HashSet<String>,
    pub include_severities: HashSet<Severity>,
    pub include_ids: HashSet<String>,
    pub exclude_tags: HashSet<String>,
    pub exclude_ids: HashSet<String>,
    pub expression: Option<String>,
    pub include_dependencies: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Included,
    Excluded(String),
}

/// A [`FilterSpec`] with its optional expression compiled once, so a
/// syntax error aborts before any control runs rather than mid-level.
pub struct CompiledFilter {
    spec: FilterSpec,
    program: Option<Program>,
}

impl CompiledFilter {
    pub fn compile(spec: FilterSpec) -> Result<Self, RegletError> {
        let program = match &spec.expression {
            Some(expr) => Some(
                Program::compile(expr)
                    .map_err(|e| RegletError::config(format!("invalid --filter expression '{expr}': {e}")))?,
            ),
            None => None,
        };
        Ok(CompiledFilter { spec, program })
    }

    /// Apply §4.10 to every control, returning one [`Selection`] per
    /// control in the same order as `controls`. Each exclusion carries
    /// the reason specific to the filter mechanism that caused it.
    pub fn apply(&self, controls: &[CompiledControl]) -> Result<Vec<Selection>, RegletError> {
        let mut selected: HashSet<String> = HashSet::new();
        let mut reasons: HashMap<String, String> = HashMap::new();

        for control in controls {
            match self.matches_include(control)? {
                None => {
                    selected.insert(control.id.clone());
                }
                Some(reason) => {
                    reasons.insert(control.id.clone(), reason);
                }
            }
        }

        for control in controls {
            if self.spec.exclude_ids.contains(&control.id) {
                selected.remove(&control.id);
                reasons.insert(control.id.clone(), SKIP_EXCLUDE_CONTROL_FILTER_REASON.to_string());
            } else if control.tags.iter().any(|tag| self.spec.exclude_tags.contains(tag)) {
                selected.remove(&control.id);
                reasons.insert(control.id.clone(), SKIP_EXCLUDE_TAGS_FILTER_REASON.to_string());
            }
        }

        if self.spec.include_dependencies {
            selected = transitive_close(controls, selected);
        }

        Ok(controls
            .iter()
            .map(|control| {
                if selected.contains(&control.id) {
                    Selection::Included
                } else {
                    Selection::Excluded(reasons.get(&control.id).cloned().unwrap_or_else(|| SKIP_REASON.to_string()))
                }
            })
            .collect())
    }

    /// `Ok(None)` means the control is included by every include-side
    /// mechanism; `Ok(Some(reason))` names the first one it failed.
    fn matches_include(&self, control: &CompiledControl) -> Result<Option<String>, RegletError> {
        if !self.spec.include_ids.is_empty() {
            if !self.spec.include_ids.contains(&control.id) {
                return Ok(Some(SKIP_CONTROL_FILTER_REASON.to_string()));
            }
        } else if !self.spec.include_tags.is_empty() || !self.spec.include_severities.is_empty() {
            let tag_match = !self.spec.include_tags.is_empty() && control.tags.iter().any(|t| self.spec.include_tags.contains(t));
            let severity_match = self.spec.include_severities.contains(&control.severity);
            if !(tag_match || severity_match) {
                return Ok(Some(SKIP_REASON.to_string()));
            }
        }

        if let Some(program) = &self.program {
            if !self.evaluate_expression(program, control)? {
                return Ok(Some(SKIP_EXPRESSION_FILTER_REASON.to_string()));
            }
        }

        Ok(None)
    }

    fn evaluate_expression(&self, program: &Program, control: &CompiledControl) -> Result<bool, RegletError> {
        let mut context = Context::default();
        context.add_variable_from_value("id", control.id.clone());
        context.add_variable_from_value("severity", control.severity.to_string());
        context.add_variable_from_value("owner", control.owner.clone().unwrap_or_default());
        let tags: Vec<CelValue> = control.tags.iter().cloned().map(CelValue::from).collect();
        context.add_variable_from_value("tags", tags);

        let result = program
            .execute(&context)
            .map_err(|e| RegletError::config(format!("filter expression evaluation failed: {e}")))?;

        match result {
            CelValue::Bool(matched) => Ok(matched),
            other => Err(RegletError::config(format!("filter expression must evaluate to a boolean, got {other:?}"))),
        }
    }
}

/// Re-include every control transitively depended on by a selected one.
fn transitive_close(controls: &[CompiledControl], mut selected: HashSet<String>) -> HashSet<String> {
    let by_id: HashMap<&str, &CompiledControl> = controls.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut stack: Vec<String> = selected.iter().cloned().collect();
    while let Some(id) = stack.pop() {
        let Some(control) = by_id.get(id.as_str()) else { continue };
        for dep in &control.depends_on {
            if selected.insert(dep.clone()) {
                stack.push(dep.clone());
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Observation;

    fn control(id: &str, severity: Severity, tags: &[&str], depends_on: &[&str]) -> CompiledControl {
        CompiledControl {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            severity,
            owner: Some("team-a".to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            timeout: None,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            observations: vec![Observation { plugin: "demo".to_string(), config: serde_json::Map::new(), expect: vec![] }],
        }
    }

    #[test]
    fn empty_spec_includes_everything() {
        let controls = vec![control("a", Severity::Low, &[], &[])];
        let filter = CompiledFilter::compile(FilterSpec::default()).unwrap();
        assert_eq!(filter.apply(&controls).unwrap(), vec![Selection::Included]);
    }

    #[test]
    fn include_ids_is_exclusive() {
        let controls = vec![control("a", Severity::Low, &["x"], &[]), control("b", Severity::Low, &["x"], &[])];
        let spec = FilterSpec { include_ids: ["a".to_string()].into_iter().collect(), ..Default::default() };
        let filter = CompiledFilter::compile(spec).unwrap();
        let result = filter.apply(&controls).unwrap();
        assert_eq!(result[0], Selection::Included);
        assert_eq!(result[1], Selection::Excluded(SKIP_CONTROL_FILTER_REASON.to_string()));
    }

    #[test]
    fn include_tags_and_severity_are_or_filters() {
        let controls = vec![
            control("a", Severity::Low, &["target"], &[]),
            control("b", Severity::Critical, &["other"], &[]),
            control("c", Severity::Low, &["other"], &[]),
        ];
        let spec = FilterSpec {
            include_tags: ["target".to_string()].into_iter().collect(),
            include_severities: [Severity::Critical].into_iter().collect(),
            ..Default::default()
        };
        let filter = CompiledFilter::compile(spec).unwrap();
        let result = filter.apply(&controls).unwrap();
        assert_eq!(result[0], Selection::Included);
        assert_eq!(result[1], Selection::Included);
        assert_eq!(result[2], Selection::Excluded(SKIP_REASON.to_string()));
    }

    #[test]
    fn exclude_tags_removes_from_selection() {
        let controls = vec![control("a", Severity::Low, &["target", "flaky"], &[])];
        let spec = FilterSpec {
            include_tags: ["target".to_string()].into_iter().collect(),
            exclude_tags: ["flaky".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let filter = CompiledFilter::compile(spec).unwrap();
        assert_eq!(filter.apply(&controls).unwrap(), vec![Selection::Excluded(SKIP_EXCLUDE_TAGS_FILTER_REASON.to_string())]);
    }

    #[test]
    fn include_dependencies_pulls_in_transitive_deps() {
        let controls = vec![
            control("a", Severity::Low, &[], &[]),
            control("b", Severity::Low, &[], &["a"]),
            control("c", Severity::Low, &[], &["b"]),
        ];
        let spec = FilterSpec { include_ids: ["c".to_string()].into_iter().collect(), include_dependencies: true, ..Default::default() };
        let filter = CompiledFilter::compile(spec).unwrap();
        let result = filter.apply(&controls).unwrap();
        assert!(result.iter().all(|s| *s == Selection::Included));
    }

    #[test]
    fn invalid_expression_fails_to_compile() {
        let spec = FilterSpec { expression: Some("severity ==".to_string()), ..Default::default() };
        assert!(CompiledFilter::compile(spec).is_err());
    }

    #[test]
    fn expression_filters_by_severity() {
        let controls = vec![control("a", Severity::Critical, &[], &[]), control("b", Severity::Low, &[], &[])];
        let spec = FilterSpec { expression: Some("severity == 'critical'".to_string()), ..Default::default() };
        let filter = CompiledFilter::compile(spec).unwrap();
        let result = filter.apply(&controls).unwrap();
        assert_eq!(result[0], Selection::Included);
        assert_eq!(result[1], Selection::Excluded(SKIP_EXPRESSION_FILTER_REASON.to_string()));
    }
}
