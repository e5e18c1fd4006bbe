//! Execution engine (C9): filter, DAG build, level-by-level parallel
//! execution, dependency-skip propagation, and result aggregation (§4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::capability::GrantMap;
use crate::config::EngineConfig;
use crate::dag;
use crate::error::RegletError;
use crate::filter::{CompiledFilter, Selection};
use crate::plugin::ObserveOutcome;
use crate::profile::{CompiledControl, CompiledProfile};
use crate::result::{ControlOutcome, ControlResult, Evidence, ExecutionResult, ObservationResult, Status, Summary};
use crate::runtime::Runtime;
use crate::wire::ErrorDetail;

/// Drives one profile to completion against a loaded [`Runtime`] and a
/// reconciled [`GrantMap`] (produced by the capability manager, §4.7).
pub struct Engine {
    runtime: Arc<Runtime>,
    grants: GrantMap,
    config: EngineConfig,
}

impl Engine {
    pub fn new(runtime: Arc<Runtime>, grants: GrantMap, config: EngineConfig) -> Self {
        Engine { runtime, grants, config }
    }

    /// `execute(profile) -> ExecutionResult`, §4.9 steps 1-8.
    pub async fn execute(&self, profile: &CompiledProfile, filter: &CompiledFilter, parent_token: CancellationToken) -> Result<ExecutionResult, RegletError> {
        let started_at = chrono::Utc::now();
        let started = Instant::now();

        // Step 1: filter marks excluded controls as skipped up front.
        let selections = filter.apply(&profile.controls)?;
        let mut runnable: Vec<CompiledControl> = Vec::new();
        // The final control list reflects completion order, not input
        // order (§4.9 step 8); filtered-out controls complete first, in
        // the order the filter considered them.
        let results: Arc<Mutex<Vec<ControlResult>>> = Arc::new(Mutex::new(Vec::new()));
        for (control, selection) in profile.controls.iter().zip(&selections) {
            match selection {
                Selection::Included => runnable.push(control.clone()),
                Selection::Excluded(reason) => {
                    results.lock().await.push(ControlResult {
                        id: control.id.clone(),
                        name: control.name.clone(),
                        description: control.description.clone(),
                        severity: control.severity,
                        tags: control.tags.clone(),
                        status: Status::Error,
                        outcome: ControlOutcome::Skipped,
                        message: String::new(),
                        skipped_because_of: vec![reason.clone()],
                        observations: Vec::new(),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        // Step 2: DAG over the non-skipped controls only.
        let plan = dag::build_dag(&runnable)?;
        let controls_by_id: HashMap<String, CompiledControl> = runnable.into_iter().map(|c| (c.id.clone(), c)).collect();

        // Steps 3-7: one level at a time, controls within a level run in
        // parallel bounded by `max_concurrent_controls`.
        for level in &plan.levels {
            let concurrency = self.config.max_concurrent_controls;
            stream::iter(level.iter().map(|id| {
                let control = controls_by_id[id].clone();
                let results = results.clone();
                let parent_token = parent_token.clone();
                async move {
                    let outcome = self.run_control(&control, &results, parent_token).await;
                    results.lock().await.push(outcome);
                }
            }))
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;
        }

        // Step 8: finalize, in the completion order the results were
        // appended in above.
        let controls: Vec<ControlResult> = results.lock().await.drain(..).collect();

        let summary = Summary::from_controls(&controls);
        let status = Status::aggregate(controls.iter().filter(|c| c.outcome == ControlOutcome::Ran).map(|c| c.status));

        Ok(ExecutionResult {
            profile_name: profile.metadata.name.clone(),
            profile_version: profile.metadata.version.clone(),
            status,
            summary,
            controls,
            started_at,
            duration: started.elapsed(),
        })
    }

    /// Step 4: resolve dependency-skip, else run observations in parallel.
    async fn run_control(&self, control: &CompiledControl, results: &Arc<Mutex<Vec<ControlResult>>>, parent_token: CancellationToken) -> ControlResult {
        let started = Instant::now();

        if let Some(reason) = self.blocked_reason(control, results).await {
            return ControlResult {
                id: control.id.clone(),
                name: control.name.clone(),
                description: control.description.clone(),
                severity: control.severity,
                tags: control.tags.clone(),
                status: Status::Error,
                outcome: ControlOutcome::Skipped,
                message: String::new(),
                skipped_because_of: vec![reason],
                observations: Vec::new(),
                duration: started.elapsed(),
            };
        }

        let timeout = control.timeout.unwrap_or(self.config.default_control_timeout);
        let concurrency = self.config.max_concurrent_observations;

        // Observation results are restored to the profile's declared
        // order (not completion order) so downstream expression
        // evaluation sees them at stable indices (§4.9 step 5).
        let mut indexed = stream::iter(control.observations.iter().enumerate().map(|(idx, obs)| {
            let plugin_name = obs.plugin.clone();
            let config = obs.config.clone();
            let parent_token = parent_token.clone();
            async move { (idx, self.run_observation(&plugin_name, &config, timeout, parent_token).await) }
        }))
        .buffer_unordered(concurrency)
        .collect::<Vec<(usize, ObservationResult)>>()
        .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        let observations: Vec<ObservationResult> = indexed.into_iter().map(|(_, o)| o).collect();

        let status = Status::aggregate(observations.iter().map(|o| o.status));
        let message = build_control_message(&observations);

        ControlResult {
            id: control.id.clone(),
            name: control.name.clone(),
            description: control.description.clone(),
            severity: control.severity,
            tags: control.tags.clone(),
            status,
            outcome: ControlOutcome::Ran,
            message,
            skipped_because_of: Vec::new(),
            observations,
            duration: started.elapsed(),
        }
    }

    /// §4.9 step 4: a control is blocked if any dependency resolved to
    /// {fail, error, skipped} or hasn't run yet (shouldn't happen given
    /// level ordering, but treated as blocking defensively).
    async fn blocked_reason(&self, control: &CompiledControl, results: &Arc<Mutex<Vec<ControlResult>>>) -> Option<String> {
        let guard = results.lock().await;
        for dep in &control.depends_on {
            match guard.iter().find(|r| &r.id == dep) {
                Some(dep_result) if dep_result.outcome == ControlOutcome::Ran && dep_result.status == Status::Pass => continue,
                Some(dep_result) if dep_result.outcome == ControlOutcome::Skipped => {
                    return Some(format!("dependency '{dep}' was skipped"));
                }
                Some(dep_result) => {
                    return Some(format!("dependency '{dep}' resolved to {:?}", dep_result.status));
                }
                None => return Some(format!("dependency '{dep}' has not completed")),
            }
        }
        None
    }

    /// §4.9 step 5: resolve the plugin (loading on demand), call
    /// `observe`, and map its outcome into an `ObservationResult`.
    async fn run_observation(&self, plugin_name: &str, config: &serde_json::Map<String, serde_json::Value>, timeout: Duration, parent_token: CancellationToken) -> ObservationResult {
        let started = Instant::now();

        let plugin = match self.runtime.get_plugin(plugin_name) {
            Some(plugin) => plugin,
            None => match self.runtime.load_plugin_from_dir(&self.config.plugin_dir, plugin_name) {
                Ok(plugin) => plugin,
                Err(err) => {
                    return ObservationResult {
                        plugin: plugin_name.to_string(),
                        status: Status::Error,
                        evidence: None,
                        error: Some(ErrorDetail::from(err)),
                        duration: started.elapsed(),
                    };
                }
            },
        };

        let grants = self.grants.get(plugin_name).cloned().unwrap_or_default();
        let call_token = parent_token.child_token();
        let observe = plugin.observe(config, grants, call_token.clone());

        let outcome = tokio::select! {
            result = observe => result,
            _ = tokio::time::sleep(timeout) => {
                call_token.cancel();
                Err(RegletError::timeout(format!("observation for plugin '{plugin_name}' exceeded {timeout:?}")).with_code("ETIMEDOUT"))
            }
        };

        match outcome {
            Ok(ObserveOutcome::Evidence(evidence)) => {
                let status = observation_status(&evidence);
                ObservationResult { plugin: plugin_name.to_string(), status, evidence: Some(evidence), error: None, duration: started.elapsed() }
            }
            Ok(ObserveOutcome::PluginError(detail)) => {
                ObservationResult { plugin: plugin_name.to_string(), status: Status::Error, evidence: None, error: Some(detail), duration: started.elapsed() }
            }
            Err(err) => ObservationResult {
                plugin: plugin_name.to_string(),
                status: Status::Error,
                evidence: None,
                error: Some(ErrorDetail::from(err)),
                duration: started.elapsed(),
            },
        }
    }
}

/// §4.9 step 5: `evidence.data.status` of `true`/`false` maps to
/// pass/fail; anything else (absent or non-bool) is `error`, since the
/// plugin never actually reported a compliance verdict.
fn observation_status(evidence: &Evidence) -> Status {
    match evidence.status_bool() {
        Some(true) => Status::Pass,
        Some(false) => Status::Fail,
        None => Status::Error,
    }
}

/// §4.9 step 6: a short summary of pass/fail/error counts, or the
/// single error message verbatim when exactly one observation errored.
fn build_control_message(observations: &[ObservationResult]) -> String {
    let errored: Vec<&ObservationResult> = observations.iter().filter(|o| o.status == Status::Error).collect();
    if errored.len() == 1 {
        if let Some(detail) = &errored[0].error {
            return detail.message.clone();
        }
    }

    let passed = observations.iter().filter(|o| o.status == Status::Pass).count();
    let failed = observations.iter().filter(|o| o.status == Status::Fail).count();
    format!("{passed} passed, {failed} failed, {} errored", errored.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_status_reads_boolean_status() {
        let mut data = serde_json::Map::new();
        data.insert("status".to_string(), serde_json::Value::Bool(true));
        assert_eq!(observation_status(&Evidence::new(data)), Status::Pass);

        let mut data = serde_json::Map::new();
        data.insert("status".to_string(), serde_json::Value::Bool(false));
        assert_eq!(observation_status(&Evidence::new(data)), Status::Fail);

        assert_eq!(observation_status(&Evidence::new(serde_json::Map::new())), Status::Error);
    }

    #[test]
    fn message_counts_pass_fail_error() {
        let obs = |status: Status| ObservationResult { plugin: "p".into(), status, evidence: None, error: None, duration: Duration::ZERO };
        let observations = vec![obs(Status::Pass), obs(Status::Pass), obs(Status::Fail)];
        assert_eq!(build_control_message(&observations), "2 passed, 1 failed, 0 errored");
    }

    #[test]
    fn message_surfaces_single_error_verbatim() {
        let errored = ObservationResult {
            plugin: "p".into(),
            status: Status::Error,
            evidence: None,
            error: Some(ErrorDetail { message: "plugin panicked".into(), error_type: crate::error::ErrorType::Execution, code: None, wrapped: None }),
            duration: Duration::ZERO,
        };
        assert_eq!(build_control_message(&[errored]), "plugin panicked");
    }
}
