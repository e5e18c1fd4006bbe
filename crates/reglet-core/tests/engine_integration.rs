//! Full-stack tests: real `wasmtime` instances loaded from tiny WAT
//! modules, driven through `Runtime`/`Engine` exactly as production
//! plugins would be, covering the diamond-DAG, dependency-skip,
//! tag-filtering, and instance-isolation scenarios (§8 S3, S4, S6, #8).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reglet_core::capability::GrantMap;
use reglet_core::config::EngineConfig;
use reglet_core::engine::Engine;
use reglet_core::filter::{CompiledFilter, FilterSpec};
use reglet_core::host::HostContext;
use reglet_core::profile::{Control, ControlDefaults, Controls, Observation, Profile, ProfileMetadata, Severity};
use reglet_core::result::{ControlOutcome, Status};
use reglet_core::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// A guest module whose `observe` ignores its input and always answers
/// with a fixed `{"status": <value>}` payload. `allocate` always hands
/// back a small fixed scratch offset since nothing here reads the
/// request body.
fn fixed_status_plugin(value: bool) -> Vec<u8> {
    let body = format!(r#"{{"status":{value}}}"#);
    let wat = format!(
        r#"(module
            (memory (export "memory") 1)
            (data (i32.const 1024) "{body}")
            (func (export "allocate") (param i32) (result i32) (i32.const 8))
            (func (export "deallocate") (param i32 i32))
            (func (export "observe") (param i32 i32) (result i64)
                (i64.or (i64.shl (i64.extend_i32_u (i32.const 1024)) (i64.const 32))
                        (i64.extend_i32_u (i32.const {len})))))"#,
        len = body.len()
    );
    wat::parse_str(wat).expect("fixed_status_plugin WAT must parse")
}

/// A guest module that echoes the exact bytes it was given back as its
/// result, using a bump allocator so concurrent instances never share
/// a base offset (each instance starts its own heap at 4096).
fn echo_plugin() -> Vec<u8> {
    let wat = r#"(module
        (memory (export "memory") 2)
        (global $next (mut i32) (i32.const 4096))
        (func (export "allocate") (param $size i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $next))
            (global.set $next (i32.add (global.get $next) (local.get $size)))
            (local.get $ptr))
        (func (export "deallocate") (param i32 i32))
        (func (export "observe") (param $ptr i32) (param $len i32) (result i64)
            (i64.or (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
                    (i64.extend_i32_u (local.get $len)))))"#;
    wat::parse_str(wat).expect("echo_plugin WAT must parse")
}

async fn test_runtime() -> Runtime {
    let host_ctx = Arc::new(HostContext::new(10 * 1024 * 1024, Duration::from_secs(5)).expect("host context"));
    Runtime::new(256, host_ctx).expect("runtime construction")
}

fn control(id: &str, severity: Severity, tags: &[&str], depends_on: &[&str], plugin: &str) -> Control {
    Control {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        severity: Some(severity),
        owner: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        timeout: None,
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        observations: vec![Observation { plugin: plugin.to_string(), config: serde_json::Map::new(), expect: vec![] }],
    }
}

fn profile(items: Vec<Control>) -> Profile {
    Profile {
        metadata: ProfileMetadata { name: "integration".into(), version: "1.0.0".into(), description: String::new() },
        plugins: vec![],
        vars: serde_json::Map::new(),
        controls: Controls { defaults: ControlDefaults::default(), items },
    }
}

async fn run(profile: Profile, spec: FilterSpec, runtime: Runtime) -> reglet_core::result::ExecutionResult {
    let compiled = profile.compile().expect("profile must compile");
    let filter = CompiledFilter::compile(spec).expect("filter must compile");
    let engine = Engine::new(Arc::new(runtime), GrantMap::new(), EngineConfig::default());
    engine.execute(&compiled, &filter, CancellationToken::new()).await.expect("execute must succeed")
}

#[tokio::test]
async fn diamond_dag_all_pass() {
    let runtime = test_runtime().await;
    runtime.load_plugin("pass", &fixed_status_plugin(true)).unwrap();

    let controls = vec![
        control("a", Severity::Low, &[], &[], "pass"),
        control("b", Severity::Low, &[], &["a"], "pass"),
        control("c", Severity::Low, &[], &["a"], "pass"),
        control("d", Severity::Low, &[], &["b", "c"], "pass"),
    ];

    let result = run(profile(controls), FilterSpec::default(), runtime).await;

    assert_eq!(result.status, Status::Pass);
    assert_eq!(result.summary.passed, 4);
    assert_eq!(result.summary.total, 4);
    assert!(result.controls.iter().all(|c| c.outcome == ControlOutcome::Ran));
}

#[tokio::test]
async fn failing_root_skips_its_dependents() {
    let runtime = test_runtime().await;
    runtime.load_plugin("pass", &fixed_status_plugin(true)).unwrap();
    runtime.load_plugin("fail", &fixed_status_plugin(false)).unwrap();

    let controls = vec![
        control("a", Severity::Low, &[], &[], "fail"),
        control("b", Severity::Low, &[], &["a"], "pass"),
        control("c", Severity::Low, &[], &["a"], "pass"),
        control("d", Severity::Low, &[], &["b", "c"], "pass"),
    ];

    let result = run(profile(controls), FilterSpec::default(), runtime).await;
    let by_id = result.controls_by_id();

    assert_eq!(by_id["a"].status, Status::Fail);
    assert_eq!(by_id["a"].outcome, ControlOutcome::Ran);

    for dependent in ["b", "c", "d"] {
        let cr = by_id[dependent];
        assert_eq!(cr.outcome, ControlOutcome::Skipped);
        assert!(cr.skipped_because_of.iter().any(|m| m.contains("dependency 'a'")), "{dependent}: {:?}", cr.skipped_because_of);
    }
}

#[tokio::test]
async fn include_tags_filter_skips_non_matching_controls() {
    let runtime = test_runtime().await;
    runtime.load_plugin("pass", &fixed_status_plugin(true)).unwrap();

    let controls = vec![
        control("t1", Severity::Low, &["target"], &[], "pass"),
        control("t2", Severity::Low, &["target"], &[], "pass"),
        control("o1", Severity::Low, &["other"], &[], "pass"),
        control("o2", Severity::Low, &["other"], &[], "pass"),
        control("o3", Severity::Low, &["other"], &[], "pass"),
    ];

    let spec = FilterSpec { include_tags: HashSet::from(["target".to_string()]), ..Default::default() };
    let result = run(profile(controls), spec, runtime).await;

    assert_eq!(result.summary.total, 5);
    assert_eq!(result.summary.passed, 2);
    assert_eq!(result.summary.skipped, 3);
    let by_id = result.controls_by_id();
    for excluded in ["o1", "o2", "o3"] {
        assert_eq!(by_id[excluded].outcome, ControlOutcome::Skipped);
        assert!(by_id[excluded].skipped_because_of.iter().any(|m| m.contains("excluded by --tags filter")));
    }
}

#[tokio::test]
async fn concurrent_observe_calls_never_see_each_others_memory() {
    let host_ctx = Arc::new(HostContext::new(10 * 1024 * 1024, Duration::from_secs(5)).unwrap());
    let runtime = Runtime::new(256, host_ctx).unwrap();
    let plugin = runtime.load_plugin("echo", &echo_plugin()).unwrap();

    let calls = (0..16).map(|i| {
        let plugin = plugin.clone();
        let status = i % 2 == 0;
        async move {
            let mut config = serde_json::Map::new();
            config.insert("status".to_string(), serde_json::Value::Bool(status));
            let outcome = plugin.observe(&config, Default::default(), CancellationToken::new()).await.expect("observe must succeed");
            (status, outcome)
        }
    });

    let results = futures::future::join_all(calls).await;
    for (expected, outcome) in results {
        match outcome {
            reglet_core::plugin::ObserveOutcome::Evidence(evidence) => {
                assert_eq!(evidence.status_bool(), Some(expected));
            }
            reglet_core::plugin::ObserveOutcome::PluginError(detail) => panic!("unexpected plugin error: {detail:?}"),
        }
    }
}
