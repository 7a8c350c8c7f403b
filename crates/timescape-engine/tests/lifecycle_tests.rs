//! Lifecycle transitions, deployment pins and timeline audits

use chrono::Duration;
use pretty_assertions::assert_eq;
use timescape_engine::prelude::*;
use timescape_store::EventKind;
use timescape_test_utils::{epoch, register_pricing, test_engine, PRICING};
use timescape_version::Lifecycle;

#[tokio::test]
async fn active_cold_decommissioned() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;

    assert!(t.engine.mark_cold(&p.artifact, &p.v3).await.unwrap());
    assert!(!t.engine.mark_cold(&p.artifact, &p.v3).await.unwrap());
    // Cold is only a flag; routing is unaffected.
    assert_eq!(t.engine.deployed(&p.artifact).unwrap().version_id(), &p.v3);

    assert!(t.engine.decommission(&p.artifact, &p.v3).await.unwrap());
    assert!(!t.engine.decommission(&p.artifact, &p.v3).await.unwrap());

    assert_eq!(
        t.engine.resolve(&p.artifact, &Selector::Latest).unwrap().version_id(),
        &p.v2
    );
    assert_eq!(t.engine.deployed(&p.artifact).unwrap().version_id(), &p.v2);

    // Still resolvable for audit.
    assert_eq!(
        t.engine.resolve(&p.artifact, &Selector::Id(p.v3.clone())).unwrap().version_id(),
        &p.v3
    );
    assert_eq!(
        t.engine.resolve(&p.artifact, &Selector::Tag("v3".into())).unwrap().version_id(),
        &p.v3
    );
    assert_eq!(
        t.engine
            .resolve(&p.artifact, &Selector::At(epoch() + Duration::days(30)))
            .unwrap()
            .version_id(),
        &p.v3
    );
}

#[tokio::test]
async fn undefined_transitions_are_rejected() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;

    let err = t.engine.decommission(&p.artifact, &p.v1).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::IllegalTransition {
            from: Lifecycle::Active,
            to: Lifecycle::Decommissioned
        }
    ));
    assert_eq!(err.status_hint(), 409);

    t.engine.mark_cold(&p.artifact, &p.v1).await.unwrap();
    t.engine.decommission(&p.artifact, &p.v1).await.unwrap();
    assert!(t.engine.deploy(&p.artifact, &p.v1).await.is_err());

    let missing = VersionId::new(1, "pricing", 42).unwrap();
    assert!(t
        .engine
        .mark_cold(&p.artifact, &missing)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn deployment_pin_drives_routing() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;

    assert!(t.engine.deploy(&p.artifact, &p.v2).await.unwrap());
    assert!(!t.engine.deploy(&p.artifact, &p.v2).await.unwrap());

    let route = t.engine.route(&p.artifact, &Selector::Tag("v1".into())).unwrap();
    assert_eq!(route.target.version_id(), &p.v2);
    assert_eq!(route.chain.len(), 1);

    // A V3 client against a V2 handler: edges are directed, so no path.
    let err = t.engine.route(&p.artifact, &Selector::Latest).unwrap_err();
    assert!(matches!(err, EngineError::TransformationGap { .. }));

    // Decommissioning the pinned version drops the pin.
    t.engine.mark_cold(&p.artifact, &p.v2).await.unwrap();
    t.engine.decommission(&p.artifact, &p.v2).await.unwrap();
    assert_eq!(t.engine.deployed(&p.artifact).unwrap().version_id(), &p.v3);
}

#[tokio::test]
async fn timestamp_resolution_matches_timeline() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;

    for (offset_hours, expected) in [(36, Some(&p.v1)), (48, Some(&p.v2)), (100, Some(&p.v3)), (1, None)] {
        let at = epoch() + Duration::hours(offset_hours);
        let live = t.engine.resolve(&p.artifact, &Selector::At(at)).ok();
        assert_eq!(live.as_ref().map(|v| v.version_id()), expected, "resolver at +{offset_hours}h");
        assert_eq!(
            t.engine.version_active_at(&p.artifact, at).as_ref(),
            expected,
            "timeline at +{offset_hours}h"
        );
    }

    let parsed = t
        .engine
        .resolve_str(&p.artifact, Some("2024-01-02T12:00:00Z"))
        .unwrap();
    assert_eq!(parsed.version_id(), &p.v1);
}

#[tokio::test]
async fn history_is_ordered_and_chained() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;
    t.clock.advance(Duration::minutes(5));
    t.engine.mark_cold(&p.artifact, &p.v1).await.unwrap();
    t.clock.advance(Duration::minutes(5));
    t.engine.decommission(&p.artifact, &p.v1).await.unwrap();

    let history = t.engine.history(&p.artifact);
    let kinds: Vec<&str> = history
        .iter()
        .map(|e| match e.kind {
            EventKind::VersionRegistered { .. } => "version",
            EventKind::TransformerRegistered { .. } => "transformer",
            EventKind::MarkedCold => "cold",
            EventKind::Decommissioned => "decommissioned",
            EventKind::Deployed => "deployed",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["version", "version", "transformer", "version", "transformer", "cold", "decommissioned"]
    );
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(history.windows(2).all(|w| w[1].prev_hash == w[0].hash));
    t.engine.verify_integrity(&p.artifact).unwrap();

    // Before the lifecycle events every version was active.
    let before = t.engine.state_at(&p.artifact, epoch());
    assert_eq!(
        before,
        vec![
            (p.v1.clone(), Lifecycle::Active),
            (p.v2.clone(), Lifecycle::Active),
            (p.v3.clone(), Lifecycle::Active),
        ]
    );
    let after = t.engine.state_at(&p.artifact, epoch() + Duration::hours(1));
    assert_eq!(after[0], (p.v1.clone(), Lifecycle::Decommissioned));

    assert_eq!(t.engine.lineage(&p.artifact, &p.v3), vec![p.v2.clone(), p.v1.clone()]);
    assert_eq!(t.engine.artifacts(), vec![ArtifactId::from(PRICING)]);
}

#[tokio::test]
async fn resolved_state_spans_artifacts() {
    let t = test_engine(EngineConfig::default());
    let p = register_pricing(&t.engine).await;
    t.engine.deploy(&p.artifact, &p.v2).await.unwrap();
    let feed = t
        .engine
        .register(VersionDescriptor::new("feed", "feed", serde_json::json!({ "v": 1 })))
        .await
        .unwrap();

    let state = t
        .engine
        .resolve_state([
            (p.artifact.clone(), Selector::Tag("v1".into())),
            (ArtifactId::from("feed"), Selector::Latest),
        ])
        .unwrap();
    assert_eq!(state.len(), 2);
    assert_eq!(state.get(&p.artifact), Some(&p.v1));
    assert_eq!(state.get(&"feed".into()), Some(&feed));

    assert_eq!(t.engine.deployed(&p.artifact).unwrap().version_id(), &p.v2);
    assert_eq!(
        t.engine.resolve_str(&p.artifact, Some("latest")).unwrap().version_id(),
        &p.v3
    );

    let err = t
        .engine
        .resolve_state([(ArtifactId::from("ghost"), Selector::Latest)])
        .unwrap_err();
    assert!(matches!(err, EngineError::ArtifactNotFound(_)));
}
