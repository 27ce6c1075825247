#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use xcalc::{
    CacheEntry, CacheSelectHint, CacheWriteMode, CompiledView, ComputationCycle, ComputedValue,
    CycleContext, ExecutionLogMode, ExecutionLogModeSource, FunctionBlacklist,
    FunctionInvocationStatistics, InMemoryLogModeSource, InMemoryMarketDataSnapshot,
    InMemoryTargetResolver, InMemoryValueCacheSource, LocalGraphExecutor, NodeState, ValueCache,
    ValueCacheSource, ValueSpecification,
};

use common::{book_pv, functions, portfolio_graph, pv, spot_req, with_timeout, Harness};

fn view() -> Arc<CompiledView> {
    Arc::new(
        CompiledView::builder("Portfolio")
            .graph(portfolio_graph("Default", &["ACME", "BETA"]))
            .build(),
    )
}

fn market(acme: f64, beta: f64) -> InMemoryMarketDataSnapshot {
    InMemoryMarketDataSnapshot::new(Utc::now())
        .with(spot_req("ACME"), json!(acme))
        .with(spot_req("BETA"), json!(beta))
}

async fn executed(
    harness: &Harness,
    previous: Option<&ComputationCycle>,
    snapshot: &InMemoryMarketDataSnapshot,
) -> ComputationCycle {
    let cycle = harness.cycle(&view());
    with_timeout("cycle", cycle.execute(previous, snapshot)).await.unwrap();
    cycle
}

#[tokio::test]
async fn test_identical_market_data_reuses_everything() {
    for mode in [CacheWriteMode::Immediate, CacheWriteMode::WriteBehind] {
        let harness = Harness::new(mode);
        let snapshot = market(1.0, 2.0);
        let first = executed(&harness, None, &snapshot).await;
        assert_eq!(harness.invocations.invocation_count("PositionPV"), 2);
        assert_eq!(harness.invocations.invocation_count("Sum"), 1);

        let second = executed(&harness, Some(&first), &snapshot).await;
        assert_eq!(harness.invocations.invocation_count("PositionPV"), 2);
        assert_eq!(harness.invocations.invocation_count("Sum"), 1);

        for node in ["pv-ACME", "pv-BETA", "book-pv"] {
            assert_eq!(second.node_state("Default", node), Some(NodeState::Executed));
        }
        let model = second.result_model();
        assert_eq!(model.value("Default", &pv("ACME")).unwrap().value, CacheEntry::value(json!(10.0)));
        assert_eq!(model.value("Default", &book_pv()).unwrap().value, CacheEntry::value(json!(30.0)));
        // Reused values keep the execution details of the job that produced them.
        assert!(model.value("Default", &book_pv()).unwrap().compute_node_id.is_some());

        first.release().unwrap();
        let raw = second.query_computation_caches("Default", &[book_pv()]).unwrap();
        assert_eq!(raw[0].1, Some(CacheEntry::value(json!(30.0))));
        second.release().unwrap();
    }
}

#[tokio::test]
async fn test_single_tick_recomputes_affected_nodes_only() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let first = executed(&harness, None, &market(1.0, 2.0)).await;
    let second = executed(&harness, Some(&first), &market(1.0, 3.0)).await;

    assert_eq!(harness.invocations.invocation_count("PositionPV"), 3);
    assert_eq!(harness.invocations.invocation_count("Sum"), 2);
    let model = second.result_model();
    assert_eq!(model.value("Default", &pv("ACME")).unwrap().value, CacheEntry::value(json!(10.0)));
    assert_eq!(model.value("Default", &pv("BETA")).unwrap().value, CacheEntry::value(json!(30.0)));
    assert_eq!(model.value("Default", &book_pv()).unwrap().value, CacheEntry::value(json!(40.0)));

    first.release().unwrap();
    second.release().unwrap();
}

#[tokio::test]
async fn test_previous_failure_is_carried_over_as_suppressed() {
    let blacklist = Arc::new(FunctionBlacklist::new());
    blacklist.block_node("pv-ACME");
    let harness = Harness::with_blacklist(CacheWriteMode::Immediate, blacklist.clone());
    let snapshot = market(1.0, 2.0);
    let first = executed(&harness, None, &snapshot).await;
    assert_eq!(first.node_state("Default", "pv-ACME"), Some(NodeState::Suppressed));
    assert_eq!(first.node_state("Default", "book-pv"), Some(NodeState::Failed));

    blacklist.unblock_node("pv-ACME");
    let second = executed(&harness, Some(&first), &snapshot).await;

    assert_eq!(harness.invocations.invocation_count("PositionPV"), 1);
    assert_eq!(second.node_state("Default", "pv-ACME"), Some(NodeState::Suppressed));
    assert_eq!(second.node_state("Default", "book-pv"), Some(NodeState::Failed));
    let model = second.result_model();
    assert_eq!(model.value("Default", &pv("ACME")).unwrap().value, CacheEntry::SUPPRESSED);
    assert_eq!(model.value("Default", &book_pv()).unwrap().value, CacheEntry::SUPPRESSED);
    assert_eq!(model.value("Default", &pv("BETA")).unwrap().value, CacheEntry::value(json!(20.0)));

    first.release().unwrap();
    second.release().unwrap();
}

#[tokio::test]
async fn test_full_logging_is_not_reused_from_indicator_runs() {
    let harness = Harness::new(CacheWriteMode::Immediate);
    let snapshot = market(1.0, 2.0);
    let first = executed(&harness, None, &snapshot).await;

    let log_modes = Arc::new(InMemoryLogModeSource::new());
    log_modes.set_full(book_pv());
    assert_eq!(log_modes.log_mode(&[book_pv()].into()), ExecutionLogMode::Full);
    let second = ComputationCycle::builder(harness.context.clone(), view())
        .log_modes(log_modes)
        .build();
    with_timeout("cycle", second.execute(Some(&first), &snapshot)).await.unwrap();

    assert_eq!(harness.invocations.invocation_count("PositionPV"), 2);
    assert_eq!(harness.invocations.invocation_count("Sum"), 2);
    let book = second.result_model();
    let book = book.value("Default", &book_pv()).unwrap();
    assert_eq!(book.execution_log.mode, ExecutionLogMode::Full);
    assert!(book.execution_log.events.is_some());

    first.release().unwrap();
    second.release().unwrap();
}

/// Cache source that silently drops writes of one value while `forget` is set.
struct ForgetfulSource {
    inner: InMemoryValueCacheSource,
    dropped: ValueSpecification,
    forget: Arc<AtomicBool>,
}

struct ForgetfulCache {
    inner: Arc<dyn ValueCache>,
    dropped: ValueSpecification,
    forget: Arc<AtomicBool>,
}

impl ForgetfulCache {
    fn keeps(&self, value: &ComputedValue) -> bool {
        !(self.forget.load(Ordering::SeqCst) && value.specification == self.dropped)
    }
}

impl ValueCache for ForgetfulCache {
    fn get_value(&self, spec: &ValueSpecification) -> Option<CacheEntry> {
        self.inner.get_value(spec)
    }

    fn get_value_with_hint(&self, spec: &ValueSpecification, hint: &CacheSelectHint) -> Option<CacheEntry> {
        self.inner.get_value_with_hint(spec, hint)
    }

    fn put_value(&self, value: ComputedValue) {
        if self.keeps(&value) {
            self.inner.put_value(value);
        }
    }

    fn put_shared_value(&self, value: ComputedValue) {
        if self.keeps(&value) {
            self.inner.put_shared_value(value);
        }
    }
}

impl ValueCacheSource for ForgetfulSource {
    fn get_cache(&self, cycle_id: &str, calc_config: &str) -> Arc<dyn ValueCache> {
        Arc::new(ForgetfulCache {
            inner: self.inner.get_cache(cycle_id, calc_config),
            dropped: self.dropped.clone(),
            forget: self.forget.clone(),
        })
    }

    fn release_caches(&self, cycle_id: &str) {
        self.inner.release_caches(cycle_id);
    }
}

#[tokio::test]
async fn test_reused_output_absent_from_previous_cache_is_an_error() {
    let forget = Arc::new(AtomicBool::new(true));
    let caches: Arc<dyn ValueCacheSource> = Arc::new(ForgetfulSource {
        inner: InMemoryValueCacheSource::new(),
        dropped: pv("ACME"),
        forget: forget.clone(),
    });
    let config = common::config(CacheWriteMode::Immediate);
    let invocations = Arc::new(FunctionInvocationStatistics::new());
    let executor = LocalGraphExecutor::from_config(
        &config,
        caches.clone(),
        Arc::new(functions()),
        Arc::new(InMemoryTargetResolver::new()),
        invocations.clone(),
    );
    let context = CycleContext::builder(caches, Arc::new(executor))
        .config(config)
        .build();
    let snapshot = market(1.0, 2.0);

    let first = ComputationCycle::builder(context.clone(), view()).build();
    with_timeout("cycle", first.execute(None, &snapshot)).await.unwrap();
    assert_eq!(first.node_state("Default", "pv-ACME"), Some(NodeState::Executed));
    assert_eq!(first.query_computation_caches("Default", &[pv("ACME")]).unwrap()[0].1, None);

    forget.store(false, Ordering::SeqCst);
    let second = ComputationCycle::builder(context, view()).build();
    with_timeout("cycle", second.execute(Some(&first), &snapshot)).await.unwrap();

    assert_eq!(invocations.invocation_count("PositionPV"), 2);
    assert_eq!(second.node_state("Default", "pv-ACME"), Some(NodeState::Executed));
    let model = second.result_model();
    assert_eq!(model.value("Default", &pv("ACME")).unwrap().value, CacheEntry::EVALUATION_ERROR);
    let raw = second.query_computation_caches("Default", &[pv("ACME"), pv("BETA")]).unwrap();
    assert_eq!(raw[0].1, Some(CacheEntry::EVALUATION_ERROR));
    assert_eq!(raw[1].1, Some(CacheEntry::value(json!(20.0))));

    first.release().unwrap();
    second.release().unwrap();
}
