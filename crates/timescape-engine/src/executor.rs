//! Chain Executor
//!
//! Folds a payload through a planned [`Chain`]. Hop N's output is hop N+1's
//! input, so hops run strictly in sequence; each one is an await point
//! bounded by the per-hop timeout.
//!
//! # Failure model
//!
//! - The first failing or timed-out hop aborts the chain with
//!   [`EngineError::TransformerExecution`] naming that transformer's
//!   `(from, to)` edge.
//! - No retries. Transforms are pure, so an aborted chain leaves nothing to
//!   clean up.
//! - Cancellation is cooperative and checked before every hop.

use crate::error::{EngineError, HopFailure, Result};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timescape_graph::Chain;
use timescape_store::Transformer;
use timescape_version::Payload;
use tracing::{debug, warn};

/// Shared flag a transport sets when the client goes away
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; remaining hops are skipped
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Request-scoped execution settings
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancel: CancellationFlag,
    request_id: Option<String>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe `flag` between hops
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Correlation id for logs
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

/// Which function of each transformer a run applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Request path: `forward`, chain order
    Forward,
    /// Response path: `backward`, reverse chain order
    Backward,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        })
    }
}

/// Executes chains with a fixed per-hop timeout
#[derive(Debug, Clone, Copy)]
pub struct ChainExecutor {
    hop_timeout: Duration,
}

impl ChainExecutor {
    #[must_use]
    pub fn new(hop_timeout: Duration) -> Self {
        Self { hop_timeout }
    }

    #[inline]
    #[must_use]
    pub fn hop_timeout(&self) -> Duration {
        self.hop_timeout
    }

    /// Convert a request payload from `chain.from()` to `chain.to()`
    ///
    /// # Errors
    /// [`EngineError::TransformerExecution`] or [`EngineError::Cancelled`]
    pub async fn apply_forward(&self, payload: Payload, chain: &Chain, ctx: &ExecutionContext) -> Result<Payload> {
        self.run(payload, chain, Direction::Forward, ctx).await
    }

    /// Convert a response payload from `chain.to()` back to `chain.from()`
    ///
    /// # Errors
    /// [`EngineError::TransformerExecution`] or [`EngineError::Cancelled`]
    pub async fn apply_backward(&self, payload: Payload, chain: &Chain, ctx: &ExecutionContext) -> Result<Payload> {
        self.run(payload, chain, Direction::Backward, ctx).await
    }

    async fn run(
        &self,
        mut payload: Payload,
        chain: &Chain,
        direction: Direction,
        ctx: &ExecutionContext,
    ) -> Result<Payload> {
        let started = Instant::now();
        let mut hops: Vec<&Arc<Transformer>> = chain.hops().iter().collect();
        if direction == Direction::Backward {
            hops.reverse();
        }

        for (completed, hop) in hops.into_iter().enumerate() {
            if ctx.cancellation().is_cancelled() {
                debug!(
                    artifact = %chain.artifact_id(),
                    request = ctx.request_id().unwrap_or("-"),
                    %direction,
                    completed,
                    "chain cancelled"
                );
                return Err(EngineError::Cancelled {
                    completed_hops: completed,
                });
            }
            payload = self.apply_hop(payload, hop, direction, ctx).await?;
        }

        debug!(
            artifact = %chain.artifact_id(),
            request = ctx.request_id().unwrap_or("-"),
            %direction,
            hops = chain.len(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "chain applied"
        );
        Ok(payload)
    }

    async fn apply_hop(
        &self,
        payload: Payload,
        hop: &Transformer,
        direction: Direction,
        ctx: &ExecutionContext,
    ) -> Result<Payload> {
        let transform = match direction {
            Direction::Forward => hop.forward(),
            Direction::Backward => hop.backward(),
        };

        let outcome = tokio::time::timeout(self.hop_timeout, transform.apply(payload)).await;
        let cause = match outcome {
            Ok(Ok(next)) => {
                debug!(from = %hop.from(), to = %hop.to(), %direction, "hop applied");
                return Ok(next);
            }
            Ok(Err(failure)) => HopFailure::Failed(failure.0),
            Err(_) => HopFailure::TimedOut(self.hop_timeout),
        };

        warn!(
            from = %hop.from(),
            to = %hop.to(),
            %direction,
            request = ctx.request_id().unwrap_or("-"),
            %cause,
            "hop failed"
        );
        Err(EngineError::TransformerExecution {
            from: hop.from().clone(),
            to: hop.to().clone(),
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use timescape_graph::{plan, VersionGraph};
    use timescape_store::{transform_fn, Transform, TransformFailure, TransformerDescriptor};
    use timescape_version::{Version, VersionDescriptor, VersionId};

    fn vid(seq: u32) -> VersionId {
        VersionId::new(3, "doc", seq).unwrap()
    }

    /// Appends `tag` on forward, pops it on backward
    fn marker(tag: &'static str) -> (Arc<dyn Transform>, Arc<dyn Transform>) {
        let forward = transform_fn(move |mut p| {
            if let Some(trail) = p["trail"].as_array_mut() {
                trail.push(json!(tag));
            }
            Ok(p)
        });
        let backward = transform_fn(move |mut p| {
            let popped = p["trail"].as_array_mut().and_then(Vec::pop);
            if popped != Some(json!(tag)) {
                return Err(TransformFailure::new(format!("expected {tag} on top")));
            }
            Ok(p)
        });
        (forward, backward)
    }

    fn chain_of(edges: Vec<(u32, u32, Arc<dyn Transform>, Arc<dyn Transform>)>, nodes: u32) -> Chain {
        let versions = (0..nodes).map(|i| {
            let desc = VersionDescriptor::new("doc", "doc", json!({ "v": i }));
            Arc::new(Version::from_descriptor(&desc, vid(i), Utc.timestamp_opt(i64::from(i), 0).unwrap()))
        });
        let transformers = edges.into_iter().map(|(from, to, forward, backward)| {
            let desc = TransformerDescriptor::new("doc", vid(from), vid(to), forward).with_backward(backward);
            Arc::new(Transformer::from_descriptor(desc, Utc::now()).unwrap())
        });
        let graph = VersionGraph::build("doc".into(), versions, transformers).unwrap();
        plan(&graph, &vid(0), &vid(nodes - 1), 10).unwrap()
    }

    fn two_hops() -> Chain {
        let (f1, b1) = marker("a");
        let (f2, b2) = marker("b");
        chain_of(vec![(0, 1, f1, b1), (1, 2, f2, b2)], 3)
    }

    #[tokio::test]
    async fn forward_in_order_backward_in_reverse() {
        let executor = ChainExecutor::new(Duration::from_secs(1));
        let chain = two_hops();
        let ctx = ExecutionContext::new();

        let forward = executor.apply_forward(json!({ "trail": [] }), &chain, &ctx).await.unwrap();
        assert_eq!(forward, json!({ "trail": ["a", "b"] }));

        // Backward pops "b" before "a"; wrong order would fail the marker check.
        let back = executor.apply_backward(forward, &chain, &ctx).await.unwrap();
        assert_eq!(back, json!({ "trail": [] }));
    }

    #[tokio::test]
    async fn failing_hop_names_its_edge() {
        let (f1, b1) = marker("a");
        let broken = transform_fn(|_| Err(TransformFailure::new("bad input")));
        let chain = chain_of(vec![(0, 1, f1, b1), (1, 2, broken.clone(), broken)], 3);

        let err = ChainExecutor::new(Duration::from_secs(1))
            .apply_forward(json!({ "trail": [] }), &chain, &ExecutionContext::new())
            .await
            .unwrap_err();
        match err {
            EngineError::TransformerExecution { from, to, cause } => {
                assert_eq!((from, to), (vid(1), vid(2)));
                assert_eq!(cause, HopFailure::Failed("bad input".to_string()));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    struct Stall;

    #[async_trait::async_trait]
    impl Transform for Stall {
        async fn apply(&self, payload: Payload) -> std::result::Result<Payload, TransformFailure> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(payload)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_hop_times_out() {
        let stall: Arc<dyn Transform> = Arc::new(Stall);
        let chain = chain_of(vec![(0, 1, stall.clone(), stall)], 2);

        let err = ChainExecutor::new(Duration::from_millis(50))
            .apply_forward(json!({}), &chain, &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::TransformerExecution {
                cause: HopFailure::TimedOut(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_between_hops() {
        let flag = CancellationFlag::new();
        let trip = flag.clone();
        let forward = transform_fn(move |p| {
            trip.cancel();
            Ok(p)
        });
        let (f2, b2) = marker("b");
        let chain = chain_of(vec![(0, 1, forward.clone(), forward), (1, 2, f2, b2)], 3);

        let ctx = ExecutionContext::new().with_cancellation(flag);
        let err = ChainExecutor::new(Duration::from_secs(1))
            .apply_forward(json!({ "trail": [] }), &chain, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { completed_hops: 1 }));
    }

    #[tokio::test]
    async fn empty_chain_passes_through() {
        let chain = Chain::empty("doc".into(), vid(0));
        let out = ChainExecutor::new(Duration::from_millis(1))
            .apply_forward(json!({ "x": 1 }), &chain, &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "x": 1 }));
    }
}
