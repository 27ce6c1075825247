#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use xcalc::core::WriteBehindPool;
use xcalc::{
    CacheEntry, CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobSpecification,
    CalculationNode, ComputationTarget, ComputationTargetSpecification, ComputedValue,
    FunctionError, FunctionInvocationStatistics, FunctionRepository, InMemoryTargetResolver,
    InMemoryValueCacheSource, InvocationResult, JobCancelHandle, SyncFunction, ValueCache, ValueCacheSource,
    ValueSpecification,
};

const CYCLE: &str = "cycle-1";
const CONFIG: &str = "Default";

fn target() -> ComputationTargetSpecification {
    ComputationTargetSpecification::primitive("P", "1")
}

fn out(name: &str) -> ValueSpecification {
    ValueSpecification::new(name, target())
}

fn job(items: Vec<CalculationJobItem>) -> CalculationJob {
    CalculationJob::new(
        CalculationJobSpecification::new(CYCLE, CONFIG, Utc::now(), 1),
        CacheSelectHint::all_shared(),
        items,
    )
}

fn item(function_id: &str, inputs: &[&str], outputs: &[&str]) -> CalculationJobItem {
    CalculationJobItem::new(
        function_id,
        target(),
        inputs.iter().map(|n| out(n)),
        outputs.iter().map(|n| out(n)),
    )
}

/// Emits `value` for every requested output.
fn constant(value: f64) -> SyncFunction {
    SyncFunction::new(move |_, _, target, desired| {
        Ok(desired
            .iter()
            .map(|req| {
                ComputedValue::of(
                    ValueSpecification::new(req.value_name.clone(), target.specification.clone()),
                    json!(value),
                )
            })
            .collect())
    })
}

/// Adds one to its single input.
fn increment() -> SyncFunction {
    SyncFunction::new(|_, inputs, target, desired| {
        let x = inputs.values().next().and_then(|(_, v)| v.as_f64()).unwrap_or_default();
        Ok(desired
            .iter()
            .map(|req| {
                ComputedValue::of(
                    ValueSpecification::new(req.value_name.clone(), target.specification.clone()),
                    json!(x + 1.0),
                )
            })
            .collect())
    })
}

struct Fixture {
    caches: Arc<InMemoryValueCacheSource>,
    statistics: Arc<FunctionInvocationStatistics>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            caches: Arc::new(InMemoryValueCacheSource::new()),
            statistics: Arc::new(FunctionInvocationStatistics::new()),
        }
    }

    fn node(&self, functions: FunctionRepository, write_behind: bool) -> CalculationNode {
        let node = CalculationNode::new(
            "test-node",
            self.caches.clone(),
            Arc::new(functions),
            Arc::new(InMemoryTargetResolver::strict()),
        )
        .with_statistics(self.statistics.clone());
        if write_behind {
            node.with_write_behind(WriteBehindPool::new(2))
        } else {
            node
        }
    }

    fn cache(&self) -> Arc<dyn ValueCache> {
        self.caches.get_cache(CYCLE, CONFIG)
    }
}

#[tokio::test]
async fn test_throwing_second_item_keeps_first_result() {
    for write_behind in [false, true] {
        let fixture = Fixture::new();
        let functions = FunctionRepository::new()
            .with("A", constant(5.0))
            .with(
                "B",
                SyncFunction::new(|_, _, _, _| Err(FunctionError::execution("ArithmeticError", "divide by zero"))),
            );
        let mut node = fixture.node(functions, write_behind);
        let result = node
            .execute_job(&job(vec![item("A", &[], &["o1"]), item("B", &["o1"], &["o2"])]))
            .await
            .expect("job was not cancelled");

        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].result, InvocationResult::Success);
        assert_eq!(result.items[1].result, InvocationResult::FunctionThrewException);
        assert_eq!(result.items[1].exception_class.as_deref(), Some("ArithmeticError"));
        assert_eq!(result.items[1].exception_message.as_deref(), Some("divide by zero"));
        assert!(result.items[1].stack_trace.is_some());
        assert_eq!(result.compute_node_id, "test-node");

        let cache = fixture.cache();
        assert_eq!(cache.get_value(&out("o1")), Some(CacheEntry::value(json!(5.0))));
        assert_eq!(cache.get_value(&out("o2")), Some(CacheEntry::EVALUATION_ERROR));
    }
}

#[tokio::test]
async fn test_every_declared_output_gets_an_entry() {
    let fixture = Fixture::new();
    let functions = FunctionRepository::new()
        .with("Const", constant(1.0))
        .with("Partial", SyncFunction::new(|_, _, target, _| {
            Ok(vec![ComputedValue::of(
                ValueSpecification::new("p1", target.specification.clone()),
                json!(2.0),
            )])
        }))
        .with("Fail", SyncFunction::new(|_, _, _, _| Err(FunctionError::execution("Boom", "no"))))
        .with("Panic", SyncFunction::new(|_, _, _, _| panic!("function blew up")));
    let unresolvable = CalculationJobItem::new(
        "Const",
        ComputationTargetSpecification::security("TICKER", "UNKNOWN"),
        [],
        [ValueSpecification::new("u1", ComputationTargetSpecification::security("TICKER", "UNKNOWN"))],
    );
    let items = vec![
        item("Const", &[], &["c1", "c2"]),
        item("Partial", &[], &["p1", "p2"]),
        item("Fail", &[], &["f1"]),
        item("Panic", &[], &["x1", "x2"]),
        item("Unregistered", &[], &["n1"]),
        item("Const", &["never-written"], &["m1"]),
        unresolvable,
    ];
    let outputs: Vec<ValueSpecification> =
        items.iter().flat_map(|i| i.outputs.iter().cloned()).collect();

    let mut node = fixture.node(functions, true);
    let result = node.execute_job(&job(items)).await.unwrap();

    let cache = fixture.cache();
    for spec in &outputs {
        assert!(cache.get_value(spec).is_some(), "{} has no entry", spec);
    }
    assert_eq!(cache.get_value(&out("c2")), Some(CacheEntry::value(json!(1.0))));
    assert_eq!(cache.get_value(&out("p2")), Some(CacheEntry::EVALUATION_ERROR));

    let results: Vec<_> = result.items.iter().map(|i| i.result).collect();
    assert_eq!(
        results,
        vec![
            InvocationResult::Success,
            InvocationResult::Success,
            InvocationResult::FunctionThrewException,
            InvocationResult::FunctionThrewException,
            InvocationResult::FunctionThrewException,
            InvocationResult::MissingInputs,
            InvocationResult::FunctionThrewException,
        ]
    );
    assert!(result.items[2].stack_trace.is_some());
    assert_eq!(result.items[3].exception_class.as_deref(), Some("Panic"));
    assert!(result.items[3].stack_trace.is_none());
    assert_eq!(result.items[4].exception_class.as_deref(), Some("FunctionNotFound"));
    assert_eq!(result.items[6].exception_class.as_deref(), Some("TargetResolution"));
}

#[tokio::test]
async fn test_missing_market_data_input_fails_item() {
    let fixture = Fixture::new();
    fixture
        .cache()
        .put_shared_value(ComputedValue::new(out("spot"), CacheEntry::MissingMarketData));
    let functions = FunctionRepository::new()
        .with("Strict", increment())
        .with("Tolerant", increment().tolerating_missing_inputs());
    let mut node = fixture.node(functions, false);

    let result = node
        .execute_job(&job(vec![
            item("Strict", &["spot"], &["s1", "s2"]),
            item("Tolerant", &["spot"], &["t1"]),
        ]))
        .await
        .unwrap();

    let strict = &result.items[0];
    assert_eq!(strict.result, InvocationResult::MissingInputs);
    assert_eq!(strict.missing_inputs, [out("spot")].into_iter().collect());
    assert!(strict.stack_trace.is_none());
    let cache = fixture.cache();
    assert_eq!(cache.get_value(&out("s1")), Some(CacheEntry::EVALUATION_ERROR));
    assert_eq!(cache.get_value(&out("s2")), Some(CacheEntry::EVALUATION_ERROR));

    assert_eq!(result.items[1].result, InvocationResult::Success);
    assert_eq!(cache.get_value(&out("t1")), Some(CacheEntry::value(json!(1.0))));
    assert_eq!(fixture.statistics.invocation_count("Strict"), 0);
    assert_eq!(fixture.statistics.invocation_count("Tolerant"), 1);
}

#[tokio::test]
async fn test_cancelled_job_writes_only_processed_items() {
    for write_behind in [false, true] {
        let fixture = Fixture::new();
        let handle: Arc<Mutex<Option<JobCancelHandle>>> = Arc::new(Mutex::new(None));
        let cancel_from = handle.clone();
        let functions = FunctionRepository::new()
            .with("Const", constant(3.0))
            .with(
                "CancelAfter",
                SyncFunction::new(move |_, _, target, _| {
                    if let Some(handle) = cancel_from.lock().as_ref() {
                        handle.cancel();
                    }
                    Ok(vec![ComputedValue::of(
                        ValueSpecification::new("k1", target.specification.clone()),
                        json!(1.0),
                    )])
                }),
            );
        let job = job(vec![
            item("Const", &[], &["i0"]),
            item("CancelAfter", &[], &["k1"]),
            item("Const", &[], &["i2"]),
            item("Const", &[], &["i3"]),
        ]);
        *handle.lock() = Some(job.cancel_handle());

        let mut node = fixture.node(functions, write_behind);
        assert!(node.execute_job(&job).await.is_none());

        let cache = fixture.cache();
        assert_eq!(cache.get_value(&out("i0")), Some(CacheEntry::value(json!(3.0))));
        assert_eq!(cache.get_value(&out("k1")), Some(CacheEntry::value(json!(1.0))));
        assert_eq!(cache.get_value(&out("i2")), None);
        assert_eq!(cache.get_value(&out("i3")), None);
    }
}

#[tokio::test]
async fn test_undeclared_and_duplicate_outputs() {
    let fixture = Fixture::new();
    let functions = FunctionRepository::new().with(
        "Chatty",
        SyncFunction::new(|_, _, target, _| {
            let spec = |name: &str| ValueSpecification::new(name, target.specification.clone());
            Ok(vec![
                ComputedValue::of(spec("d1"), json!(1.0)),
                ComputedValue::of(spec("d1"), json!(99.0)),
                ComputedValue::of(spec("extra"), json!("side value")),
            ])
        }),
    );
    let mut node = fixture.node(functions, true);
    node.execute_job(&job(vec![item("Chatty", &[], &["d1"])])).await.unwrap();

    let cache = fixture.cache();
    assert_eq!(cache.get_value(&out("d1")), Some(CacheEntry::value(json!(1.0))));
    assert_eq!(cache.get_value(&out("extra")), Some(CacheEntry::value(json!("side value"))));
}

#[tokio::test]
async fn test_context_and_statistics() {
    let fixture = Fixture::new();
    fixture
        .cache()
        .put_shared_value(ComputedValue::of(out("in"), json!(41.0)));
    let functions = FunctionRepository::new().with(
        "Logged",
        SyncFunction::new(|ctx, inputs, target, _| {
            ctx.warn(format!("running in {}", ctx.calc_config()));
            let scale = ctx.parameters()["scale"].as_f64().unwrap_or(1.0);
            let x = inputs.get_f64("in").unwrap_or_default();
            Ok(vec![ComputedValue::of(
                ValueSpecification::new("scaled", target.specification.clone()),
                json!(x * scale),
            )])
        }),
    );
    let logged = item("Logged", &["in"], &["scaled"])
        .with_parameters(json!({ "scale": 2.0 }))
        .with_log_mode(xcalc::ExecutionLogMode::Full);
    let mut node = fixture.node(functions, false);
    let result = node.execute_job(&job(vec![logged])).await.unwrap();

    let log = &result.items[0].execution_log;
    assert!(log.has_warn);
    assert_eq!(
        log.events.as_ref().map(|e| e[0].message.clone()),
        Some("running in Default".to_string())
    );
    assert_eq!(fixture.cache().get_value(&out("scaled")), Some(CacheEntry::value(json!(82.0))));

    let record = fixture.statistics.get(CONFIG, "Logged").unwrap();
    assert_eq!(record.invocations, 1);
    assert_eq!(record.input_samples, 1);
    assert!(record.input_bytes > 0);
    assert_eq!(record.output_values, 1);
}

#[tokio::test]
async fn test_registered_targets_reach_functions() {
    let fixture = Fixture::new();
    let acme = ComputationTargetSpecification::security("TICKER", "ACME");
    let resolver = InMemoryTargetResolver::new()
        .with(ComputationTarget::new(acme.clone()).with_name("Acme Corp"));
    let functions = FunctionRepository::new().with(
        "Name",
        SyncFunction::new(|_, _, target, _| {
            Ok(vec![ComputedValue::of(
                ValueSpecification::new("Name", target.specification.clone()),
                json!(target.name.clone().unwrap_or_default()),
            )])
        }),
    );
    let mut node = CalculationNode::new(
        "named",
        fixture.caches.clone(),
        Arc::new(functions),
        Arc::new(resolver),
    );
    let name = ValueSpecification::new("Name", acme.clone());
    let job = job(vec![CalculationJobItem::new("Name", acme, [], [name.clone()])]);
    let result = common::with_timeout("named job", node.execute_job(&job)).await.unwrap();
    assert!(result.items[0].is_success());
    assert_eq!(fixture.cache().get_value(&name), Some(CacheEntry::value(json!("Acme Corp"))));
}

#[tokio::test]
async fn test_default_resolver_accepts_unregistered_targets() {
    let fixture = Fixture::new();
    let position = ComputationTargetSpecification::position("POS", "ACME");
    let functions = FunctionRepository::new().with("Const", constant(3.0));
    let mut node = CalculationNode::new(
        "lenient",
        fixture.caches.clone(),
        Arc::new(functions),
        Arc::new(InMemoryTargetResolver::new()),
    );
    let pv = ValueSpecification::new("PV", position.clone());
    let job = job(vec![CalculationJobItem::new("Const", position, [], [pv.clone()])]);
    let result = common::with_timeout("lenient job", node.execute_job(&job)).await.unwrap();

    assert_eq!(result.items[0].result, InvocationResult::Success);
    assert_eq!(fixture.cache().get_value(&pv), Some(CacheEntry::value(json!(3.0))));
}
