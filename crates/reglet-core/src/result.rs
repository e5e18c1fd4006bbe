//! Result types: what an observation, a control, and a full run produce.
//!
//! `Status` aggregation follows §3's rule (`fail > error > pass`, and an
//! empty observation list aggregates to `error`) everywhere a collection
//! of child statuses rolls up into a parent one.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::profile::Severity;
use crate::wire::ErrorDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Error,
    Fail,
}

impl Status {
    /// Roll a collection of child statuses up into one, per §3:
    /// `fail` beats `error` beats `pass`; an empty collection is `error`.
    pub fn aggregate<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        let mut worst = None;
        for status in statuses {
            worst = Some(match worst {
                None => status,
                Some(current) => std::cmp::max(current, status),
            });
        }
        worst.unwrap_or(Status::Error)
    }
}

/// Free-form structured data a plugin's `observe` call returned, flattened
/// per §4.5 step 7 so `data["status"]` (when boolean) drives aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub data: serde_json::Map<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Evidence {
    /// Stamp freshly-flattened data with the time it was observed.
    pub fn new(data: serde_json::Map<String, serde_json::Value>) -> Self {
        Evidence { data, timestamp: chrono::Utc::now() }
    }

    /// The boolean `status` field the engine reads per §4.9 step 5, or
    /// `None` if absent or not a bool (which aggregates to `error`).
    pub fn status_bool(&self) -> Option<bool> {
        self.data.get("status").and_then(|v| v.as_bool())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationResult {
    pub plugin: String,
    pub status: Status,
    #[serde(default)]
    pub evidence: Option<Evidence>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    Ran,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResult {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub status: Status,
    pub outcome: ControlOutcome,
    /// A short sentence summarizing pass/fail/error counts, or the
    /// single error message when exactly one observation errored
    /// (§4.9 step 6). Empty for skipped controls.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub skipped_because_of: Vec<String>,
    pub observations: Vec<ObservationResult>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn from_controls(controls: &[ControlResult]) -> Self {
        let mut summary = Summary { total: controls.len(), ..Default::default() };
        for control in controls {
            match control.outcome {
                ControlOutcome::Skipped => summary.skipped += 1,
                ControlOutcome::Ran => match control.status {
                    Status::Pass => summary.passed += 1,
                    Status::Fail => summary.failed += 1,
                    Status::Error => summary.errored += 1,
                },
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub profile_name: String,
    pub profile_version: String,
    pub status: Status,
    pub summary: Summary,
    pub controls: Vec<ControlResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn controls_by_id(&self) -> HashMap<&str, &ControlResult> {
        self.controls.iter().map(|c| (c.id.as_str(), c)).collect()
    }
}
