use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use xcalc::{
    CompiledView, ComputationCycle, ComputationTargetSpecification, ComputedValue, CycleContext,
    DependencyGraph, DependencyNode, EngineConfig, FunctionError, FunctionInvocationStatistics,
    FunctionRepository, InMemoryMarketDataSnapshot, InMemoryTargetResolver,
    InMemoryValueCacheSource, LocalGraphExecutor, SyncFunction, ValueSpecification,
};

fn portfolio_graph(calc_config: &str) -> anyhow::Result<DependencyGraph> {
    let book = ComputationTargetSpecification::primitive("BOOK", "Demo");
    let mut builder = DependencyGraph::builder(calc_config);
    let mut pvs = Vec::new();
    for (ticker, quantity) in [("ACME", 100.0), ("BETA", 250.0)] {
        let security = ComputationTargetSpecification::security("TICKER", ticker);
        let position = ComputationTargetSpecification::position("POS", ticker);
        let spot = ValueSpecification::new("Spot", security.clone());
        let pv = ValueSpecification::new("PV", position.clone());
        builder = builder
            .node(DependencyNode::market_data(format!("md-{}", ticker), security, [spot.clone()]))
            .node(
                DependencyNode::new(format!("pv-{}", ticker), "PositionPV", position)
                    .with_input(spot)
                    .with_output(pv.clone())
                    .with_parameters(json!({ "quantity": quantity })),
            )
            .terminal(pv.clone());
        pvs.push(pv);
    }
    let total = ValueSpecification::new("PV", book.clone());
    builder = builder
        .node(
            DependencyNode::new("book-pv", "Sum", book)
                .with_inputs(pvs)
                .with_output(total.clone()),
        )
        .terminal(total);
    Ok(builder.build()?)
}

fn functions() -> FunctionRepository {
    FunctionRepository::new()
        .with(
            "PositionPV",
            SyncFunction::new(|ctx, inputs, target, _| {
                let spot = inputs
                    .get_f64("Spot")
                    .ok_or_else(|| FunctionError::execution("InvalidInput", "Spot is not numeric"))?;
                let quantity = ctx.parameters()["quantity"].as_f64().unwrap_or(1.0);
                Ok(vec![ComputedValue::of(
                    ValueSpecification::new("PV", target.specification.clone()),
                    json!(spot * quantity),
                )])
            }),
        )
        .with(
            "Sum",
            SyncFunction::new(|_, inputs, target, _| {
                let total: f64 = inputs.values().filter_map(|(_, v)| v.as_f64()).sum();
                Ok(vec![ComputedValue::of(
                    ValueSpecification::new("PV", target.specification.clone()),
                    json!(total),
                )])
            }),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== xcalc computation cycles ===\n");

    let view = Arc::new(
        CompiledView::builder("Demo Portfolio")
            .graph(portfolio_graph("Base")?)
            .graph(portfolio_graph("Bumped")?)
            .market_data_shift("Bumped", "* 1.01")
            .build(),
    );

    let config = EngineConfig::default();
    let caches = Arc::new(InMemoryValueCacheSource::new());
    let invocations = Arc::new(FunctionInvocationStatistics::new());
    let executor = LocalGraphExecutor::from_config(
        &config,
        caches.clone(),
        Arc::new(functions()),
        Arc::new(InMemoryTargetResolver::new()),
        invocations.clone(),
    );
    let context = CycleContext::builder(caches.clone(), Arc::new(executor))
        .config(config)
        .build();

    let spot = |ticker: &str| {
        ValueSpecification::new("Spot", ComputationTargetSpecification::security("TICKER", ticker))
            .to_requirement()
    };
    let snapshot = InMemoryMarketDataSnapshot::new(Utc::now())
        .with(spot("ACME"), json!(12.5))
        .with(spot("BETA"), json!(40.0));

    let first = ComputationCycle::builder(context.clone(), view.clone()).build();
    first.execute(None, &snapshot).await?;
    println!("[cycle 1] {} ({:?})", first.cycle_id(), first.duration());
    println!("{}\n", serde_json::to_string_pretty(&first.result_model())?);

    // Only BETA ticks: ACME's position PV is carried over.
    snapshot.set(spot("BETA"), json!(41.0));
    let second = ComputationCycle::builder(context, view).build();
    second.execute(Some(&first), &snapshot).await?;
    first.release()?;
    println!("[cycle 2] {} ({:?})", second.cycle_id(), second.duration());
    println!("{}\n", serde_json::to_string_pretty(&second.result_model())?);
    second.release()?;

    println!(
        "PositionPV invoked {} times, Sum invoked {} times, {} caches left",
        invocations.invocation_count("PositionPV"),
        invocations.invocation_count("Sum"),
        caches.cache_count()
    );
    Ok(())
}
