//! Testing utilities for the Timescape workspace
//!
//! Shared fixtures: a manually driven clock, engine builders and the
//! three-version pricing artifact used across integration tests.
//!
//! | version | request shape                                   |
//! |---------|-------------------------------------------------|
//! | V1      | `{"price": "29.99"}`                            |
//! | V2      | `{"priceInCents": 2999}`                        |
//! | V3      | `{"amount": {"cents": 2999, "currency": "USD"}}`|

#![allow(missing_docs)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use timescape_engine::{EngineConfig, TimescapeEngine};
use timescape_store::{transform_fn, ManualClock, MemoryBackend, Transform, TransformFailure, TransformerDescriptor};
use timescape_version::{ArtifactId, VersionDescriptor, VersionId};

pub const PRICING: &str = "pricing";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

/// Engine over a fresh memory backend and a clock parked at [`epoch`]
pub struct TestEngine {
    pub engine: Arc<TimescapeEngine>,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<MemoryBackend>,
}

pub fn test_engine(config: EngineConfig) -> TestEngine {
    let clock = fixed_clock();
    let backend = Arc::new(MemoryBackend::new());
    let engine = TimescapeEngine::builder()
        .config(config)
        .backend(backend.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    TestEngine {
        engine: Arc::new(engine),
        clock,
        backend,
    }
}

fn take(payload: Value, field: &str) -> Result<(Map<String, Value>, Value), TransformFailure> {
    let Value::Object(mut map) = payload else {
        return Err(TransformFailure::new("payload is not an object"));
    };
    let value = map
        .remove(field)
        .ok_or_else(|| TransformFailure::new(format!("missing field `{field}`")))?;
    Ok((map, value))
}

/// V1 -> V2: `price` string to integer `priceInCents`
pub fn price_to_cents() -> Arc<dyn Transform> {
    transform_fn(|payload| {
        let (mut map, price) = take(payload, "price")?;
        let dollars: f64 = price
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TransformFailure::new(format!("price {price} is not a decimal string")))?;
        #[allow(clippy::cast_possible_truncation)]
        let cents = (dollars * 100.0).round() as i64;
        map.insert("priceInCents".to_string(), json!(cents));
        Ok(Value::Object(map))
    })
}

/// V2 -> V1: integer `priceInCents` to two-decimal `price`
pub fn cents_to_price() -> Arc<dyn Transform> {
    transform_fn(|payload| {
        let (mut map, cents) = take(payload, "priceInCents")?;
        let cents = cents
            .as_i64()
            .ok_or_else(|| TransformFailure::new(format!("priceInCents {cents} is not an integer")))?;
        let sign = if cents < 0 { "-" } else { "" };
        let magnitude = cents.unsigned_abs();
        map.insert(
            "price".to_string(),
            json!(format!("{sign}{}.{:02}", magnitude / 100, magnitude % 100)),
        );
        Ok(Value::Object(map))
    })
}

/// V2 -> V3: wrap cents into an `amount` object
pub fn cents_to_amount() -> Arc<dyn Transform> {
    transform_fn(|payload| {
        let (mut map, cents) = take(payload, "priceInCents")?;
        map.insert("amount".to_string(), json!({ "cents": cents, "currency": "USD" }));
        Ok(Value::Object(map))
    })
}

/// V3 -> V2: unwrap `amount.cents`
pub fn amount_to_cents() -> Arc<dyn Transform> {
    transform_fn(|payload| {
        let (mut map, amount) = take(payload, "amount")?;
        let cents = amount
            .get("cents")
            .cloned()
            .ok_or_else(|| TransformFailure::new("amount has no cents"))?;
        map.insert("priceInCents".to_string(), cents);
        Ok(Value::Object(map))
    })
}

pub fn price_v1() -> VersionDescriptor {
    VersionDescriptor::new(PRICING, "pricing", json!({ "request": { "price": "string" } }))
        .with_tag("v1")
        .created_at(epoch() + Duration::days(1))
}

pub fn price_v2() -> VersionDescriptor {
    VersionDescriptor::new(PRICING, "pricing", json!({ "request": { "priceInCents": "integer" } }))
        .with_tag("v2")
        .breaking()
        .created_at(epoch() + Duration::days(2))
}

pub fn price_v3() -> VersionDescriptor {
    VersionDescriptor::new(
        PRICING,
        "pricing",
        json!({ "request": { "amount": { "cents": "integer", "currency": "string" } } }),
    )
    .with_tag("v3")
    .breaking()
    .created_at(epoch() + Duration::days(3))
}

/// Registered pricing versions
pub struct Pricing {
    pub artifact: ArtifactId,
    pub v1: VersionId,
    pub v2: VersionId,
    pub v3: VersionId,
}

/// Register V1 and V2 joined by the breaking price transformer
pub async fn register_v1_v2(engine: &TimescapeEngine) -> (VersionId, VersionId) {
    let v1 = engine.register(price_v1()).await.unwrap();
    let v2 = engine.register(price_v2()).await.unwrap();
    engine
        .register_transformer(
            TransformerDescriptor::new(PRICING, v1.clone(), v2.clone(), price_to_cents())
                .with_backward(cents_to_price())
                .breaking(),
        )
        .await
        .unwrap();
    (v1, v2)
}

/// Register the full V1 -> V2 -> V3 chain
pub async fn register_pricing(engine: &TimescapeEngine) -> Pricing {
    let (v1, v2) = register_v1_v2(engine).await;
    let v3 = engine.register(price_v3()).await.unwrap();
    engine
        .register_transformer(
            TransformerDescriptor::new(PRICING, v2.clone(), v3.clone(), cents_to_amount())
                .with_backward(amount_to_cents())
                .breaking(),
        )
        .await
        .unwrap();
    Pricing {
        artifact: PRICING.into(),
        v1,
        v2,
        v3,
    }
}
