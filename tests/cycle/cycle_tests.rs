#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use xcalc::executor::GraphExecutionRequest;
use xcalc::{
    CacheEntry, CacheWriteMode, CompiledView, ComputationCycle, ComputationResultModel,
    CycleContext, CycleError, CycleState, DependencyGraph, DependencyNode, EngineConfig,
    FunctionBlacklist, FunctionRepository, GraphExecution, GraphExecutor,
    InMemoryMarketDataSnapshot, InMemoryValueCacheSource, InvocationResult, NodeState,
    SyncFunction, ValueSpecification,
};

use common::{
    book, book_pv, functions, portfolio_graph, position, pv, security, spot, spot_req,
    with_timeout, CollectingListener, Harness,
};

fn snapshot(prices: &[(&str, f64)]) -> InMemoryMarketDataSnapshot {
    prices
        .iter()
        .fold(InMemoryMarketDataSnapshot::new(Utc::now()), |snapshot, (ticker, price)| {
            snapshot.with(spot_req(ticker), json!(price))
        })
}

fn single_config_view(tickers: &[&str]) -> Arc<CompiledView> {
    Arc::new(
        CompiledView::builder("Portfolio")
            .graph(portfolio_graph("Default", tickers))
            .build(),
    )
}

fn value_of(model: &ComputationResultModel, calc_config: &str, spec: &ValueSpecification) -> CacheEntry {
    model
        .value(calc_config, spec)
        .map(|r| r.value.clone())
        .unwrap_or_else(|| panic!("no result for {} in {}", spec, calc_config))
}

#[tokio::test]
async fn test_full_cycle_publishes_terminal_values() {
    for mode in [CacheWriteMode::Immediate, CacheWriteMode::WriteBehind] {
        let harness = Harness::new(mode);
        let view = single_config_view(&["ACME", "BETA", "GAMMA"]);
        let cycle = harness.cycle(&view);
        assert_eq!(cycle.state(), CycleState::AwaitingExecution);
        assert!(cycle.duration().is_none());

        let market = snapshot(&[("ACME", 10.0), ("BETA", 20.0), ("GAMMA", 30.0)]);
        with_timeout("cycle", cycle.execute(None, &market)).await.unwrap();

        assert_eq!(cycle.state(), CycleState::Executed);
        assert!(cycle.duration().is_some());
        let model = cycle.result_model();
        assert_eq!(model.cycle_id, cycle.cycle_id());
        assert!(model.calculation_time.is_some());
        assert_eq!(value_of(&model, "Default", &pv("ACME")), CacheEntry::value(json!(100.0)));
        assert_eq!(value_of(&model, "Default", &pv("GAMMA")), CacheEntry::value(json!(300.0)));
        assert_eq!(value_of(&model, "Default", &book_pv()), CacheEntry::value(json!(600.0)));
        assert_eq!(model.market_data().count(), 3);
        assert!(model.requirements(&book_pv()).is_some());

        let book_result = model.value("Default", &book_pv()).unwrap();
        assert!(book_result.compute_node_id.is_some());
        assert_eq!(book_result.invocation_result, Some(InvocationResult::Success));
        assert_eq!(cycle.node_state("Default", "book-pv"), Some(NodeState::Executed));
        assert_eq!(cycle.node_state("Default", "md-ACME"), Some(NodeState::Executed));
        assert_eq!(harness.invocations.invocation_count("PositionPV"), 3);
        assert_eq!(harness.invocations.invocation_count("Sum"), 1);

        cycle.release().unwrap();
        assert_eq!(cycle.state(), CycleState::Destroyed);
        assert!(!harness.caches.has_caches_for(cycle.cycle_id()));
    }
}

#[tokio::test]
async fn test_execute_twice_is_illegal() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let view = single_config_view(&["ACME"]);
    let cycle = harness.cycle(&view);
    let market = snapshot(&[("ACME", 1.0)]);
    cycle.execute(None, &market).await.unwrap();

    let err = cycle.execute(None, &market).await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::IllegalState {
            expected: CycleState::AwaitingExecution,
            actual: CycleState::Executed,
        }
    ));
    assert_eq!(cycle.state(), CycleState::Executed);
    cycle.release().unwrap();
}

#[tokio::test]
async fn test_release_twice_fails() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let view = single_config_view(&["ACME"]);
    let cycle = harness.cycle(&view);
    cycle.execute(None, &snapshot(&[("ACME", 1.0)])).await.unwrap();
    cycle.release().unwrap();

    let err = cycle.release().unwrap_err();
    assert!(matches!(err, CycleError::AlreadyReleased(ref id) if id == cycle.cycle_id()));
    assert_eq!(cycle.state(), CycleState::Destroyed);
}

#[tokio::test]
async fn test_release_without_execution() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let cycle = harness.cycle(&single_config_view(&["ACME"]));
    cycle.release().unwrap();
    assert_eq!(cycle.state(), CycleState::Destroyed);
    let err = cycle.execute(None, &snapshot(&[])).await.unwrap_err();
    assert!(matches!(err, CycleError::IllegalState { actual: CycleState::Destroyed, .. }));
}

fn slow_functions() -> FunctionRepository {
    functions().with(
        "PositionPV",
        SyncFunction::new(|_, _, target, _| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(vec![xcalc::ComputedValue::of(
                ValueSpecification::new("PV", target.specification.clone()),
                json!(0.0),
            )])
        }),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupt_stops_waiting_and_allows_release() {
    let harness = Harness::with_functions(CacheWriteMode::Immediate, slow_functions());
    let view = single_config_view(&["ACME", "BETA", "GAMMA", "DELTA"]);
    let cycle = harness.cycle(&view);

    let interrupt = cycle.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupt.trigger();
    });
    let market = snapshot(&[("ACME", 1.0), ("BETA", 2.0), ("GAMMA", 3.0), ("DELTA", 4.0)]);
    let err = with_timeout("interrupted cycle", cycle.execute(None, &market))
        .await
        .unwrap_err();

    assert!(matches!(err, CycleError::Interrupted));
    assert_eq!(cycle.state(), CycleState::ExecutionInterrupted);
    assert!(cycle.duration().is_none());
    cycle.release().unwrap();
    assert_eq!(cycle.state(), CycleState::Destroyed);
}

#[tokio::test]
async fn test_interrupt_on_current_thread_runtime() {
    let harness = Harness::with_functions(CacheWriteMode::Immediate, slow_functions());
    let view = single_config_view(&["ACME", "BETA", "GAMMA", "DELTA"]);
    let cycle = harness.cycle(&view);

    let interrupt = cycle.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupt.trigger();
    });
    let market = snapshot(&[("ACME", 1.0), ("BETA", 2.0), ("GAMMA", 3.0), ("DELTA", 4.0)]);
    let started = std::time::Instant::now();
    let err = with_timeout("interrupted cycle", cycle.execute(None, &market))
        .await
        .unwrap_err();

    assert!(matches!(err, CycleError::Interrupted));
    // Four sequential 300ms bodies would take well over a second.
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(cycle.state(), CycleState::ExecutionInterrupted);
    cycle.release().unwrap();
    assert_eq!(cycle.state(), CycleState::Destroyed);
}

/// Executor whose "Broken" calc-config fails to dispatch while every other
/// calc-config runs until it is cancelled.
#[derive(Default)]
struct BrokenDispatchExecutor {
    cancelled: Mutex<Vec<(String, CancellationToken)>>,
}

impl GraphExecutor for BrokenDispatchExecutor {
    fn execute(&self, request: GraphExecutionRequest) -> GraphExecution {
        let calc_config = request.graph.calc_config().to_string();
        let cancel = CancellationToken::new();
        let handle = if calc_config == "Broken" {
            let name = calc_config.clone();
            tokio::spawn(async move {
                Err(CycleError::DispatchFailed {
                    calc_config: name,
                    reason: "no calculation node available".into(),
                })
            })
        } else {
            self.cancelled.lock().push((calc_config.clone(), cancel.clone()));
            let token = cancel.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                Ok(())
            })
        };
        GraphExecution::new(calc_config, handle, cancel)
    }
}

#[tokio::test]
async fn test_dispatch_failure_interrupts_the_cycle() {
    let executor = Arc::new(BrokenDispatchExecutor::default());
    let context = CycleContext::builder(Arc::new(InMemoryValueCacheSource::new()), executor.clone())
        .config(common::config(CacheWriteMode::Immediate))
        .build();
    let view = Arc::new(
        CompiledView::builder("Portfolio")
            .graph(portfolio_graph("Broken", &["ACME"]))
            .graph(portfolio_graph("Stalled", &["ACME"]))
            .build(),
    );
    let cycle = ComputationCycle::builder(context, view).build();

    let err = with_timeout("failed cycle", cycle.execute(None, &snapshot(&[("ACME", 1.0)])))
        .await
        .unwrap_err();

    assert!(matches!(err, CycleError::DispatchFailed { ref calc_config, .. } if calc_config == "Broken"));
    assert_eq!(cycle.state(), CycleState::ExecutionInterrupted);
    let others = executor.cancelled.lock();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].0, "Stalled");
    assert!(others[0].1.is_cancelled());
    drop(others);

    cycle.release().unwrap();
    assert_eq!(cycle.state(), CycleState::Destroyed);
}

#[tokio::test]
async fn test_previous_cycle_must_be_executed() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let view = single_config_view(&["ACME"]);
    let first = harness.cycle(&view);
    let second = harness.cycle(&view);

    let err = second
        .execute(Some(&first), &snapshot(&[("ACME", 1.0)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CycleError::InvalidPreviousCycle(CycleState::AwaitingExecution)
    ));
    assert_eq!(second.state(), CycleState::AwaitingExecution);

    first.execute(None, &snapshot(&[("ACME", 1.0)])).await.unwrap();
    first.release().unwrap();
    let err = second
        .execute(Some(&first), &snapshot(&[("ACME", 1.0)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::InvalidPreviousCycle(CycleState::Destroyed)));
}

#[tokio::test]
async fn test_missing_market_data_propagates_as_errors() {
    let graph = DependencyGraph::builder("Default")
        .node(DependencyNode::market_data("md-ACME", security("ACME"), [spot("ACME")]))
        .node(
            DependencyNode::new("pv-ACME", "PositionPV", position("ACME"))
                .with_input(spot("ACME"))
                .with_output(pv("ACME")),
        )
        .node(
            DependencyNode::new("book-pv", "Sum", book())
                .with_input(pv("ACME"))
                .with_output(book_pv()),
        )
        .terminal(spot("ACME"))
        .terminal(pv("ACME"))
        .terminal(book_pv())
        .build()
        .unwrap();
    let view = Arc::new(CompiledView::builder("Portfolio").graph(graph).build());
    let harness = Harness::new(CacheWriteMode::WriteBehind);
    let cycle = harness.cycle(&view);

    with_timeout("cycle", cycle.execute(None, &snapshot(&[]))).await.unwrap();

    let model = cycle.result_model();
    let spot_result = model.value("Default", &spot("ACME")).unwrap();
    assert_eq!(spot_result.value, CacheEntry::MissingMarketData);
    assert!(spot_result.execution_log.has_warn);
    assert_eq!(model.market_data().count(), 0);

    let pv_result = model.value("Default", &pv("ACME")).unwrap();
    assert_eq!(pv_result.value, CacheEntry::EVALUATION_ERROR);
    assert_eq!(pv_result.invocation_result, Some(InvocationResult::MissingInputs));
    assert!(pv_result.missing_inputs.contains(&spot("ACME")));
    assert_eq!(value_of(&model, "Default", &book_pv()), CacheEntry::EVALUATION_ERROR);
    assert_eq!(cycle.node_state("Default", "pv-ACME"), Some(NodeState::Failed));
    assert_eq!(harness.invocations.invocation_count("PositionPV"), 0);
    cycle.release().unwrap();
}

#[tokio::test]
async fn test_blacklisted_nodes_are_suppressed() {
    let blacklist = Arc::new(FunctionBlacklist::new());
    blacklist.block_function("PositionPV");
    let harness = Harness::with_blacklist(CacheWriteMode::Immediate, blacklist);
    let view = single_config_view(&["ACME", "BETA"]);
    let cycle = harness.cycle(&view);

    with_timeout("cycle", cycle.execute(None, &snapshot(&[("ACME", 1.0), ("BETA", 2.0)])))
        .await
        .unwrap();

    let model = cycle.result_model();
    assert_eq!(value_of(&model, "Default", &pv("ACME")), CacheEntry::SUPPRESSED);
    assert_eq!(value_of(&model, "Default", &pv("BETA")), CacheEntry::SUPPRESSED);
    assert_eq!(cycle.node_state("Default", "pv-ACME"), Some(NodeState::Suppressed));
    assert_eq!(harness.invocations.invocation_count("PositionPV"), 0);
    // Suppressed inputs are missing inputs downstream.
    assert_eq!(value_of(&model, "Default", &book_pv()), CacheEntry::EVALUATION_ERROR);

    let raw = cycle
        .query_computation_caches("Default", &[pv("ACME"), spot("ACME")])
        .unwrap();
    assert_eq!(raw[0].1, Some(CacheEntry::SUPPRESSED));
    assert_eq!(raw[1].1, Some(CacheEntry::value(json!(1.0))));
    cycle.release().unwrap();
}

#[tokio::test]
async fn test_listener_receives_fragments() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let listener = Arc::new(CollectingListener::default());
    let view = single_config_view(&["ACME", "BETA", "GAMMA"]);
    let cycle = harness.cycle_with_listener(&view, listener.clone());
    cycle
        .execute(None, &snapshot(&[("ACME", 1.0), ("BETA", 2.0), ("GAMMA", 3.0)]))
        .await
        .unwrap();

    let fragments = listener.fragments.lock();
    assert!(fragments.len() >= 2);
    assert!(fragments.iter().all(|f| f.cycle_id == cycle.cycle_id() && !f.is_empty()));
    let mut merged = cycle.result_model().template();
    for fragment in fragments.iter() {
        merged.merge(fragment);
    }
    let full = cycle.result_model();
    assert_eq!(
        merged.all_results().count(),
        full.all_results().count()
    );
    assert_eq!(merged.value("Default", &book_pv()), full.value("Default", &book_pv()));
}

#[tokio::test]
async fn test_failing_listener_does_not_fail_the_cycle() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let view = single_config_view(&["ACME"]);
    let listener = Arc::new(|_: &ComputationResultModel| -> anyhow::Result<()> {
        Err(anyhow::anyhow!("listener unavailable"))
    });
    let cycle = harness.cycle_with_listener(&view, listener);
    cycle.execute(None, &snapshot(&[("ACME", 2.0)])).await.unwrap();

    assert_eq!(cycle.state(), CycleState::Executed);
    assert_eq!(
        value_of(&cycle.result_model(), "Default", &pv("ACME")),
        CacheEntry::value(json!(20.0))
    );
}

#[tokio::test]
async fn test_queries_by_calc_config() {
    let harness = Harness::new(CacheWriteMode::WriteBehind);
    let view = single_config_view(&["ACME"]);
    let cycle = harness.cycle(&view);
    cycle.execute(None, &snapshot(&[("ACME", 3.0)])).await.unwrap();

    let err = cycle.query_computation_caches("Other", &[pv("ACME")]).unwrap_err();
    assert!(matches!(err, CycleError::UnknownCalcConfig(ref name) if name == "Other"));
    assert!(cycle.query_results("Other", &[pv("ACME")]).is_none());

    let results = cycle
        .query_results("Default", &[pv("ACME"), spot("ACME")])
        .unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[&pv("ACME")];
    assert_eq!(result.value, CacheEntry::value(json!(30.0)));
    assert!(result.compute_node_id.is_some());
    assert_eq!(result.invocation_result, Some(InvocationResult::Success));

    let raw = cycle.query_computation_caches("Default", &[pv("NOPE")]).unwrap();
    assert_eq!(raw[0].1, None);
    cycle.release().unwrap();
}

#[tokio::test]
async fn test_market_data_shift_applies_to_one_config() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let view = Arc::new(
        CompiledView::builder("Portfolio")
            .graph(portfolio_graph("Base", &["ACME"]))
            .graph(portfolio_graph("Bumped", &["ACME"]))
            .market_data_shift("Bumped", "* 2")
            .build(),
    );
    let cycle = harness.cycle(&view);
    cycle.execute(None, &snapshot(&[("ACME", 5.0)])).await.unwrap();

    let model = cycle.result_model();
    assert_eq!(value_of(&model, "Base", &pv("ACME")), CacheEntry::value(json!(50.0)));
    assert_eq!(value_of(&model, "Bumped", &pv("ACME")), CacheEntry::value(json!(100.0)));
    let market: Vec<_> = model.market_data().map(|r| r.value.clone()).collect();
    assert_eq!(market, vec![CacheEntry::value(json!(5.0))]);
    cycle.release().unwrap();
}

#[tokio::test]
async fn test_release_dumps_caches_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::with_config(EngineConfig {
        dump_cache_dir: Some(dir.path().to_path_buf()),
        ..common::config(CacheWriteMode::Immediate)
    });
    let view = Arc::new(
        CompiledView::builder("Portfolio")
            .graph(portfolio_graph("Default", &["ACME"]))
            .dump_computation_caches(true)
            .build(),
    );
    let cycle = harness.cycle(&view);
    cycle.execute(None, &snapshot(&[("ACME", 4.0)])).await.unwrap();
    cycle.release().unwrap();

    let dumped: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(dumped.len(), 1);
    let name = dumped[0].file_name().unwrap().to_string_lossy().to_string();
    assert_eq!(name, format!("{}-Default.txt", cycle.cycle_id()));
    let text = std::fs::read_to_string(&dumped[0]).unwrap();
    assert!(text.contains("40"));
    assert_eq!(text.lines().count(), 3);
}
