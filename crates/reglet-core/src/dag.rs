//! Dependency graph (C8): Kahn's-algorithm topological leveling.
//!
//! `build_dag` turns a flat list of controls into execution levels —
//! each level is a set of control ids with no dependency between them,
//! and every id in level N depends only on ids in levels `< N`. The
//! engine (C9) runs one level at a time, in order, fanning out within
//! a level up to `max_concurrent_controls`.

use std::collections::{HashMap, HashSet};

use crate::error::RegletError;
use crate::profile::CompiledControl;

/// Execution plan: ordered levels, each a list of control ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub levels: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn control_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }
}

/// Build the level-ordered execution plan for `controls`.
///
/// `depends_on` edges are assumed already validated to reference only
/// ids present in `controls` (see [`crate::profile::Profile::compile`]);
/// this function re-derives that check defensively and also detects
/// cycles, both surfaced as `config` errors since a bad dependency
/// graph is a profile authoring mistake, not a runtime failure.
pub fn build_dag(controls: &[CompiledControl]) -> Result<ExecutionPlan, RegletError> {
    let ids: HashSet<&str> = controls.iter().map(|c| c.id.as_str()).collect();

    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for control in controls {
        indegree.entry(&control.id).or_insert(0);
        for dep in &control.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(RegletError::config(format!(
                    "control '{}' depends_on unknown control '{}'",
                    control.id, dep
                )));
            }
            *indegree.entry(&control.id).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(&control.id);
        }
    }

    // Deterministic level ordering that preserves the profile's input
    // order within each level, independent of HashMap iteration order.
    let mut remaining = indegree.clone();
    let mut frontier: Vec<&str> = controls.iter().map(|c| c.id.as_str()).filter(|id| remaining.get(id).copied().unwrap_or(0) == 0).collect();

    let mut levels = Vec::new();
    let mut visited = 0usize;

    while !frontier.is_empty() {
        levels.push(frontier.iter().map(|s| s.to_string()).collect());
        visited += frontier.len();

        let mut next_ids: HashSet<&str> = HashSet::new();
        for id in &frontier {
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    let deg = remaining.get_mut(dependent).expect("dependent indexed in indegree map");
                    *deg -= 1;
                    if *deg == 0 {
                        next_ids.insert(dependent);
                    }
                }
            }
        }
        // Re-derive from `controls` rather than the discovery order
        // above, so a control with multiple frontier dependencies still
        // lands at its original profile position within the level.
        frontier = controls.iter().map(|c| c.id.as_str()).filter(|id| next_ids.contains(id)).collect();
    }

    if visited != controls.len() {
        return Err(RegletError::config("control dependency graph contains a cycle"));
    }

    Ok(ExecutionPlan { levels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Observation, Severity};
    use std::collections::HashSet as Set;

    fn ctrl(id: &str, depends_on: &[&str]) -> CompiledControl {
        CompiledControl {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            severity: Severity::Low,
            owner: None,
            tags: Set::new(),
            timeout: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            observations: vec![Observation { plugin: "demo".into(), config: serde_json::Map::new(), expect: vec![] }],
        }
    }

    #[test]
    fn independent_controls_land_in_one_level() {
        let plan = build_dag(&[ctrl("a", &[]), ctrl("b", &[]), ctrl("c", &[])]).unwrap();
        assert_eq!(plan.levels.len(), 1);
        assert_eq!(plan.levels[0], vec!["a", "b", "c"]);
    }

    #[test]
    fn chain_produces_one_level_per_control() {
        let plan = build_dag(&[ctrl("a", &[]), ctrl("b", &["a"]), ctrl("c", &["b"])]).unwrap();
        assert_eq!(plan.levels, vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn diamond_dependency_levels_correctly() {
        let plan = build_dag(&[ctrl("a", &[]), ctrl("b", &["a"]), ctrl("c", &["a"]), ctrl("d", &["b", "c"])]).unwrap();
        assert_eq!(plan.levels[0], vec!["a".to_string()]);
        assert_eq!(plan.levels[1], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(plan.levels[2], vec!["d".to_string()]);
    }

    #[test]
    fn cycle_is_rejected() {
        let err = build_dag(&[ctrl("a", &["b"]), ctrl("b", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = build_dag(&[ctrl("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("unknown control"));
    }

    #[test]
    fn control_count_sums_across_levels() {
        let plan = build_dag(&[ctrl("a", &[]), ctrl("b", &["a"])]).unwrap();
        assert_eq!(plan.control_count(), 2);
    }
}
