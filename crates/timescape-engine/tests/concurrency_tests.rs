//! Snapshot consistency under concurrent registration, timeouts and cancellation

use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use timescape_engine::prelude::*;
use timescape_test_utils::{register_pricing, register_v1_v2, test_engine, PRICING};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_half_built_graph() {
    let t = test_engine(EngineConfig::default());
    let artifact: ArtifactId = "ledger".into();
    let mut previous = t
        .engine
        .register(VersionDescriptor::new("ledger", "ledger", json!(0)))
        .await
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&t.engine);
            let artifact = artifact.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut last_generation = 0;
                let mut observed = 0usize;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snapshot = engine.snapshot(&artifact).unwrap();
                    assert!(snapshot.generation() >= last_generation, "snapshots went backwards");
                    last_generation = snapshot.generation();
                    assert!(snapshot.is_acyclic());
                    for node in snapshot.nodes_ordered() {
                        for edge in snapshot.outgoing(node.version().version_id()) {
                            assert!(snapshot.version(edge.to()).is_some(), "dangling edge");
                        }
                    }
                    let latest = snapshot.latest().unwrap();
                    assert_eq!(snapshot.nodes_ordered().last().unwrap().version(), latest);
                    observed += 1;
                    if finished {
                        return observed;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for i in 1..40 {
        let next = t
            .engine
            .register(VersionDescriptor::new("ledger", "ledger", json!(i)))
            .await
            .unwrap();
        t.engine
            .register_transformer(TransformerDescriptor::new(
                "ledger",
                previous.clone(),
                next.clone(),
                Arc::new(Identity),
            ))
            .await
            .unwrap();
        previous = next;
    }
    done.store(true, Ordering::Release);

    for reader in join_all(readers).await {
        assert!(reader.unwrap() > 0);
    }
    let snapshot = t.engine.snapshot(&artifact).unwrap();
    assert_eq!(snapshot.len(), 40);
    assert_eq!(snapshot.edge_count(), 39);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_get_distinct_ids() {
    let t = test_engine(EngineConfig::default());

    let writes = (0..20).map(|i| {
        let engine = Arc::clone(&t.engine);
        tokio::spawn(async move {
            engine
                .register(VersionDescriptor::new("inbox", "inbox", json!({ "n": i })))
                .await
                .unwrap()
        })
    });
    let ids: HashSet<VersionId> = join_all(writes)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(ids.len(), 20);
    assert_eq!(t.engine.versions(&"inbox".into()).len(), 20);
    assert_eq!(t.engine.history(&"inbox".into()).len(), 20);
    t.engine.verify_integrity(&"inbox".into()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn artifacts_register_independently() {
    let t = test_engine(EngineConfig::default());

    let writes = (0..8).map(|i| {
        let engine = Arc::clone(&t.engine);
        tokio::spawn(async move {
            let artifact = format!("svc-{i}");
            for n in 0..5 {
                engine
                    .register(VersionDescriptor::new(artifact.as_str(), "svc", json!(n)))
                    .await
                    .unwrap();
            }
            artifact
        })
    });
    for artifact in join_all(writes).await {
        let artifact = ArtifactId::from(artifact.unwrap());
        assert_eq!(t.engine.snapshot(&artifact).unwrap().len(), 5);
    }
    assert_eq!(t.engine.artifacts().len(), 8);
}

#[tokio::test]
async fn in_flight_route_keeps_its_snapshot() {
    let t = test_engine(EngineConfig::default());
    let (v1, v2) = register_v1_v2(&t.engine).await;
    let route = t.engine.route(&PRICING.into(), &Selector::Id(v1)).unwrap();

    // A newer version lands while the request is in flight.
    register_pricing_v3(&t.engine, &v2).await;
    assert_eq!(route.target.version_id(), &v2);
    let request = t
        .engine
        .forward(&route, json!({ "price": "1.00" }), &ExecutionContext::new())
        .await
        .unwrap();
    assert_eq!(request, json!({ "priceInCents": 100 }));
}

async fn register_pricing_v3(engine: &TimescapeEngine, v2: &VersionId) {
    let v3 = engine.register(timescape_test_utils::price_v3()).await.unwrap();
    engine
        .register_transformer(
            TransformerDescriptor::new(
                PRICING,
                v2.clone(),
                v3,
                timescape_test_utils::cents_to_amount(),
            )
            .with_backward(timescape_test_utils::amount_to_cents())
            .breaking(),
        )
        .await
        .unwrap();
}

struct Stall;

#[async_trait::async_trait]
impl Transform for Stall {
    async fn apply(&self, payload: Payload) -> Result<Payload, TransformFailure> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(payload)
    }
}

#[tokio::test(start_paused = true)]
async fn stuck_transform_times_out() {
    let t = test_engine(EngineConfig::default().with_hop_timeout(Duration::from_millis(100)));
    let a = t
        .engine
        .register(VersionDescriptor::new("slow", "slow", json!(1)))
        .await
        .unwrap();
    let b = t
        .engine
        .register(VersionDescriptor::new("slow", "slow", json!(2)))
        .await
        .unwrap();
    t.engine
        .register_transformer(TransformerDescriptor::new("slow", a.clone(), b.clone(), Arc::new(Stall)))
        .await
        .unwrap();

    let err = t
        .engine
        .transform_request(json!({}), &"slow".into(), &a, &b, &ExecutionContext::new())
        .await
        .unwrap_err();
    match &err {
        EngineError::TransformerExecution { from, to, cause } => {
            assert_eq!((from, to), (&a, &b));
            assert_eq!(*cause, HopFailure::TimedOut(Duration::from_millis(100)));
        }
        other => panic!("expected a timeout, got {other}"),
    }
    assert_eq!(err.status_hint(), 502);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn cancelled_request_runs_no_hops() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;
    let route = t.engine.route(&p.artifact, &Selector::Id(p.v1.clone())).unwrap();

    let flag = CancellationFlag::new();
    flag.cancel();
    let ctx = ExecutionContext::new().with_cancellation(flag);
    let err = t
        .engine
        .forward(&route, json!({ "price": "2.00" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { completed_hops: 0 }));
    assert_eq!(err.status_hint(), 499);
}
