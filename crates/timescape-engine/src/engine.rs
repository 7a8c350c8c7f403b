//! Timescape Engine facade
//!
//! Ties the registry, transformer store, timeline, snapshots, planner and
//! executor together behind one handle.
//!
//! # Write path
//!
//! Every write for an artifact runs under that artifact's async mutex:
//!
//! 1. validate the input and build the candidate snapshot off the current one
//!    (cycle and conflict checks happen here, before anything is stored)
//! 2. seal the timeline event
//! 3. commit version/transformer record and event in one backend batch
//! 4. index the committed records and publish the candidate snapshot
//!
//! A failure in steps 1-3 leaves no trace. Readers never take the mutex;
//! they load the current snapshot pointer and work against it.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{ChainExecutor, ExecutionContext};
use crate::resolver::{self, ResolvedState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use timescape_graph::{plan, Chain, GraphSnapshots, VersionGraph};
use timescape_store::{
    Clock, CommitBatch, EventDraft, EventKind, MemoryBackend, Registration, StorageBackend, SystemClock,
    Timeline, TimelineEvent, Transformer, TransformerDescriptor, TransformerId, TransformerRecord,
    TransformerStore, VersionRegistry,
};
use timescape_version::{ArtifactId, Lifecycle, Payload, Selector, Version, VersionDescriptor, VersionId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Resolved routing decision for one request
#[derive(Debug, Clone)]
pub struct Route {
    /// Version the client wrote the request against
    pub source: Arc<Version>,
    /// Version the handler runs
    pub target: Arc<Version>,
    /// Conversion from `source` to `target`
    pub chain: Chain,
}

impl Route {
    /// True when no conversion is needed
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Builder for [`TimescapeEngine`]
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn StorageBackend>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and assemble the engine
    ///
    /// # Errors
    /// [`EngineError::Config`] for an invalid configuration
    pub fn build(self) -> Result<TimescapeEngine> {
        self.config.validate()?;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        info!(
            max_hops = self.config.max_hops,
            hop_timeout_ms = self.config.hop_timeout_ms,
            "timescape engine ready"
        );
        Ok(TimescapeEngine {
            executor: ChainExecutor::new(self.config.hop_timeout()),
            config: self.config,
            registry: VersionRegistry::new(Arc::clone(&backend)),
            transformers: TransformerStore::new(Arc::clone(&backend)),
            timeline: Timeline::new(Arc::clone(&backend)),
            backend,
            clock,
            snapshots: GraphSnapshots::new(),
            writers: DashMap::new(),
        })
    }
}

/// Versioned handler resolution engine
///
/// Construct once and share by `Arc`; there is no global state.
pub struct TimescapeEngine {
    config: EngineConfig,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    registry: VersionRegistry,
    transformers: TransformerStore,
    timeline: Timeline,
    snapshots: GraphSnapshots,
    executor: ChainExecutor,
    /// One writer per artifact
    writers: DashMap<ArtifactId, Arc<Mutex<()>>>,
}

impl TimescapeEngine {
    /// Engine over a [`MemoryBackend`] and the system clock
    ///
    /// # Errors
    /// [`EngineError::Config`] for an invalid configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn executor(&self) -> &ChainExecutor {
        &self.executor
    }

    fn writer(&self, artifact_id: &ArtifactId) -> Arc<Mutex<()>> {
        Arc::clone(&self.writers.entry(artifact_id.clone()).or_default())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a version
    ///
    /// Re-registering identical content under the same id is a no-op that
    /// returns the existing id. Without an explicit id a TSV is minted from
    /// `created_at`, `name` and the next free sequence number; a descriptor
    /// whose content already sits in that `(millis, name)` slot maps to the
    /// existing version.
    ///
    /// # Errors
    /// - [`EngineError::InvalidDescriptor`] for malformed input
    /// - [`EngineError::RegistrationConflict`] for an id reused with other content
    /// - [`EngineError::VersionNotFound`] for an unknown parent
    /// - [`EngineError::TimelineOutOfOrder`] if the clock went backwards
    /// - [`EngineError::Storage`] if the commit fails
    #[tracing::instrument(skip_all, fields(artifact = %descriptor.artifact_id))]
    pub async fn register(&self, descriptor: VersionDescriptor) -> Result<VersionId> {
        descriptor.validate()?;
        let artifact_id = descriptor.artifact_id.clone();
        let lock = self.writer(&artifact_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let created_at = descriptor.created_at.unwrap_or(now);
        let version_id = match &descriptor.version_id {
            Some(id) => id.clone(),
            None => self.mint_id(&artifact_id, &descriptor.name, created_at)?,
        };
        let minted = descriptor.version_id.is_none();
        let version = Version::from_descriptor(&descriptor, version_id, created_at);

        if let Registration::Unchanged(existing) = self.registry.check(&version)? {
            debug!(version = %existing.version_id(), "identical re-registration");
            return Ok(existing.version_id().clone());
        }
        if minted {
            if let Some(existing) = self.registry.find_in_slot(&version) {
                debug!(version = %existing.version_id(), "identical re-registration in slot");
                return Ok(existing.version_id().clone());
            }
        }

        let current = self.snapshots.load_or_empty(&artifact_id);
        let version = Arc::new(version);
        let candidate = current
            .with_version(Arc::clone(&version))
            .map_err(|e| EngineError::from_graph(&artifact_id, e))?;

        let parents = match &descriptor.parents {
            Some(parents) => {
                if let Some(missing) = parents.iter().find(|p| current.node(p).is_none()) {
                    return Err(EngineError::VersionNotFound {
                        artifact_id,
                        selector: missing.to_string(),
                    });
                }
                parents.clone()
            }
            None => current
                .latest()
                .map(|v| vec![v.version_id().clone()])
                .unwrap_or_default(),
        };

        let draft = EventDraft::new(
            artifact_id.clone(),
            version.version_id().clone(),
            EventKind::VersionRegistered {
                created_at,
                content_hash: *version.content_hash(),
                tag: version.tag().map(str::to_string),
            },
            now,
        )
        .by(descriptor.actor_id.clone())
        .with_payload(json!({ "breaking": version.is_breaking() }))
        .with_parents(parents);
        let event = self.timeline.seal(draft)?;

        self.backend
            .commit(CommitBatch {
                versions: vec![(*version).clone()],
                timeline: vec![event.clone()],
                ..CommitBatch::default()
            })
            .await?;

        self.registry.insert_committed(Arc::clone(&version));
        self.timeline.push_committed(event);
        self.snapshots.publish(Arc::new(candidate));

        info!(
            version = %version.version_id(),
            tag = version.tag().unwrap_or("-"),
            breaking = version.is_breaking(),
            "version registered"
        );
        Ok(version.version_id().clone())
    }

    fn mint_id(&self, artifact_id: &ArtifactId, name: &str, created_at: DateTime<Utc>) -> Result<VersionId> {
        let millis = u64::try_from(created_at.timestamp_millis()).map_err(|_| {
            EngineError::InvalidDescriptor(format!("created_at {created_at} predates the unix epoch"))
        })?;
        let seq = self.registry.next_seq(artifact_id, millis, name).ok_or_else(|| {
            EngineError::InvalidDescriptor(format!("no sequence number left for {name} at {millis}"))
        })?;
        Ok(VersionId::new(millis, name, seq)?)
    }

    /// Register a transformer edge between two registered versions
    ///
    /// # Errors
    /// - [`EngineError::ArtifactNotFound`] for an unknown artifact
    /// - [`EngineError::VersionNotFound`] for an unknown endpoint
    /// - [`EngineError::InvalidDescriptor`] for a self-loop, or a breaking
    ///   edge without a backward transform
    /// - [`EngineError::TransformerConflict`] if the pair is taken
    /// - [`EngineError::CycleDetected`] if the edge would close a cycle
    /// - [`EngineError::Storage`] if the commit fails
    #[tracing::instrument(skip_all, fields(artifact = %descriptor.artifact_id, from = %descriptor.from, to = %descriptor.to))]
    pub async fn register_transformer(&self, descriptor: TransformerDescriptor) -> Result<TransformerId> {
        let artifact_id = descriptor.artifact_id.clone();
        let lock = self.writer(&artifact_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let ordinal = u64::try_from(self.timeline.len(&artifact_id)).unwrap_or(u64::MAX);
        let transformer = Transformer::from_descriptor(descriptor, now)?.at_ordinal(ordinal);
        let current = self.snapshot(&artifact_id)?;
        self.transformers
            .check(&artifact_id, transformer.from(), transformer.to())?;

        let transformer = Arc::new(transformer);
        let candidate = current
            .with_transformer(Arc::clone(&transformer))
            .map_err(|e| {
                let err = EngineError::from_graph(&artifact_id, e);
                if matches!(err, EngineError::CycleDetected { .. }) {
                    warn!(%err, "transformer rejected");
                }
                err
            })?;

        let draft = EventDraft::new(
            artifact_id.clone(),
            transformer.from().clone(),
            EventKind::TransformerRegistered {
                transformer_id: transformer.id(),
                to: transformer.to().clone(),
                breaking: transformer.is_breaking(),
            },
            now,
        );
        let event = self.timeline.seal(draft)?;

        self.backend
            .commit(CommitBatch {
                transformers: vec![transformer.record()],
                timeline: vec![event.clone()],
                ..CommitBatch::default()
            })
            .await?;

        self.transformers.insert_committed(Arc::clone(&transformer));
        self.timeline.push_committed(event);
        self.snapshots.publish(Arc::new(candidate));

        info!(id = %transformer.id(), breaking = transformer.is_breaking(), "transformer registered");
        Ok(transformer.id())
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Current snapshot of an artifact
    ///
    /// # Errors
    /// [`EngineError::ArtifactNotFound`] for an unknown artifact
    pub fn snapshot(&self, artifact_id: &ArtifactId) -> Result<Arc<VersionGraph>> {
        self.snapshots
            .load(artifact_id)
            .ok_or_else(|| EngineError::ArtifactNotFound(artifact_id.clone()))
    }

    /// Resolve a selector to a version
    ///
    /// # Errors
    /// [`EngineError::ArtifactNotFound`] or [`EngineError::VersionNotFound`]
    pub fn resolve(&self, artifact_id: &ArtifactId, selector: &Selector) -> Result<Arc<Version>> {
        let snapshot = self.snapshot(artifact_id)?;
        resolver::resolve(&snapshot, selector)
    }

    /// Resolve the wire form of a selector (`None` means latest)
    ///
    /// # Errors
    /// [`EngineError::InvalidSelector`] plus the errors of [`Self::resolve`]
    pub fn resolve_str(&self, artifact_id: &ArtifactId, selector: Option<&str>) -> Result<Arc<Version>> {
        let selector = Selector::parse(selector)?;
        self.resolve(artifact_id, &selector)
    }

    /// Version handlers of `artifact_id` currently run
    ///
    /// # Errors
    /// [`EngineError::ArtifactNotFound`] or [`EngineError::VersionNotFound`]
    pub fn deployed(&self, artifact_id: &ArtifactId) -> Result<Arc<Version>> {
        let snapshot = self.snapshot(artifact_id)?;
        resolver::deployed(&snapshot)
    }

    /// Resolve one selector per artifact for a single request
    ///
    /// # Errors
    /// The first resolution error
    pub fn resolve_state<I>(&self, requests: I) -> Result<ResolvedState>
    where
        I: IntoIterator<Item = (ArtifactId, Selector)>,
    {
        let mut state = ResolvedState::new();
        for (artifact_id, selector) in requests {
            let version = self.resolve(&artifact_id, &selector)?;
            state.insert(artifact_id, version.version_id().clone());
        }
        Ok(state)
    }

    /// Plan the chain from `from` to `to` against the current snapshot
    ///
    /// # Errors
    /// [`EngineError::ArtifactNotFound`], [`EngineError::VersionNotFound`]
    /// or [`EngineError::TransformationGap`]
    pub fn plan(&self, artifact_id: &ArtifactId, from: &VersionId, to: &VersionId) -> Result<Chain> {
        let snapshot = self.snapshot(artifact_id)?;
        self.plan_in(&snapshot, from, to)
    }

    fn plan_in(&self, snapshot: &VersionGraph, from: &VersionId, to: &VersionId) -> Result<Chain> {
        plan(snapshot, from, to, self.config.max_hops).map_err(|e| {
            let err = EngineError::from_plan(snapshot.artifact_id(), e);
            if matches!(err, EngineError::TransformationGap { .. }) {
                warn!(%err, "transformation gap");
            }
            err
        })
    }

    /// Resolve the request's version, the deployed version and the chain
    /// between them from one snapshot
    ///
    /// # Errors
    /// Any resolution or planning error
    pub fn route(&self, artifact_id: &ArtifactId, selector: &Selector) -> Result<Route> {
        let snapshot = self.snapshot(artifact_id)?;
        let source = resolver::resolve(&snapshot, selector)?;
        let target = resolver::deployed(&snapshot)?;
        let chain = self.plan_in(&snapshot, source.version_id(), target.version_id())?;
        debug!(
            artifact = %artifact_id,
            source = %source.version_id(),
            target = %target.version_id(),
            hops = chain.len(),
            "routed"
        );
        Ok(Route { source, target, chain })
    }

    /// Convert a request payload written against `from` for a handler at `to`
    ///
    /// # Errors
    /// Planning errors, [`EngineError::TransformerExecution`] or
    /// [`EngineError::Cancelled`]
    pub async fn transform_request(
        &self,
        payload: Payload,
        artifact_id: &ArtifactId,
        from: &VersionId,
        to: &VersionId,
        ctx: &ExecutionContext,
    ) -> Result<Payload> {
        let chain = self.plan(artifact_id, from, to)?;
        self.executor.apply_forward(payload, &chain, ctx).await
    }

    /// Convert a response produced by a handler at `to` back for a client at `from`
    ///
    /// `from`/`to` are the same pair passed to [`Self::transform_request`].
    ///
    /// # Errors
    /// As [`Self::transform_request`]
    pub async fn transform_response(
        &self,
        payload: Payload,
        artifact_id: &ArtifactId,
        from: &VersionId,
        to: &VersionId,
        ctx: &ExecutionContext,
    ) -> Result<Payload> {
        let chain = self.plan(artifact_id, from, to)?;
        self.executor.apply_backward(payload, &chain, ctx).await
    }

    /// Apply a route's chain to a request
    ///
    /// # Errors
    /// [`EngineError::TransformerExecution`] or [`EngineError::Cancelled`]
    pub async fn forward(&self, route: &Route, payload: Payload, ctx: &ExecutionContext) -> Result<Payload> {
        self.executor.apply_forward(payload, &route.chain, ctx).await
    }

    /// Apply a route's chain backwards to a response
    ///
    /// # Errors
    /// [`EngineError::TransformerExecution`] or [`EngineError::Cancelled`]
    pub async fn backward(&self, route: &Route, payload: Payload, ctx: &ExecutionContext) -> Result<Payload> {
        self.executor.apply_backward(payload, &route.chain, ctx).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Flag a version as cold; returns `false` if it already was
    ///
    /// # Errors
    /// [`EngineError::IllegalTransition`] unless the version is active or cold
    pub async fn mark_cold(&self, artifact_id: &ArtifactId, version_id: &VersionId) -> Result<bool> {
        self.transition(artifact_id, version_id, Lifecycle::Cold, EventKind::MarkedCold)
            .await
    }

    /// Remove a cold version from routing; returns `false` if already done
    ///
    /// # Errors
    /// [`EngineError::IllegalTransition`] unless the version is cold or
    /// decommissioned
    pub async fn decommission(&self, artifact_id: &ArtifactId, version_id: &VersionId) -> Result<bool> {
        self.transition(artifact_id, version_id, Lifecycle::Decommissioned, EventKind::Decommissioned)
            .await
    }

    async fn transition(
        &self,
        artifact_id: &ArtifactId,
        version_id: &VersionId,
        to: Lifecycle,
        kind: EventKind,
    ) -> Result<bool> {
        let lock = self.writer(artifact_id);
        let _guard = lock.lock().await;

        let current = self.snapshot(artifact_id)?;
        let (next, changed) = current
            .with_lifecycle(version_id, to)
            .map_err(|e| EngineError::from_graph(artifact_id, e))?;
        if !changed {
            return Ok(false);
        }
        self.record(artifact_id, version_id, kind, next).await?;
        info!(artifact = %artifact_id, version = %version_id, state = %to, "lifecycle changed");
        Ok(true)
    }

    /// Pin the version handlers run; returns `false` if already pinned
    ///
    /// # Errors
    /// - [`EngineError::VersionNotFound`] for an unknown version
    /// - [`EngineError::IllegalTransition`] for a decommissioned version
    pub async fn deploy(&self, artifact_id: &ArtifactId, version_id: &VersionId) -> Result<bool> {
        let lock = self.writer(artifact_id);
        let _guard = lock.lock().await;

        let current = self.snapshot(artifact_id)?;
        if current.pinned() == Some(version_id) {
            return Ok(false);
        }
        let next = current
            .with_deployed(version_id)
            .map_err(|e| EngineError::from_graph(artifact_id, e))?;
        self.record(artifact_id, version_id, EventKind::Deployed, next).await?;
        info!(artifact = %artifact_id, version = %version_id, "deployed");
        Ok(true)
    }

    /// Commit a lifecycle event and publish its snapshot
    async fn record(
        &self,
        artifact_id: &ArtifactId,
        version_id: &VersionId,
        kind: EventKind,
        next: VersionGraph,
    ) -> Result<()> {
        let draft = EventDraft::new(artifact_id.clone(), version_id.clone(), kind, self.clock.now());
        let event = self.timeline.seal(draft)?;
        self.backend
            .commit(CommitBatch {
                timeline: vec![event.clone()],
                ..CommitBatch::default()
            })
            .await?;
        self.timeline.push_committed(event);
        self.snapshots.publish(Arc::new(next));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Full ordered timeline of an artifact
    #[must_use]
    pub fn history(&self, artifact_id: &ArtifactId) -> Vec<TimelineEvent> {
        self.timeline.history(artifact_id)
    }

    /// Version that timestamp resolution picks for `at`, from the timeline
    #[must_use]
    pub fn version_active_at(&self, artifact_id: &ArtifactId, at: DateTime<Utc>) -> Option<VersionId> {
        self.timeline.version_active_at(artifact_id, at)
    }

    /// Registered versions and their lifecycle as of `at`
    #[must_use]
    pub fn state_at(&self, artifact_id: &ArtifactId, at: DateTime<Utc>) -> Vec<(VersionId, Lifecycle)> {
        self.timeline.state_at(artifact_id, at)
    }

    /// Ancestors of a version, nearest first
    #[must_use]
    pub fn lineage(&self, artifact_id: &ArtifactId, version_id: &VersionId) -> Vec<VersionId> {
        self.timeline.lineage(artifact_id, version_id)
    }

    /// Recheck the timeline hash chain
    ///
    /// # Errors
    /// [`EngineError::Storage`] at the first broken link
    pub fn verify_integrity(&self, artifact_id: &ArtifactId) -> Result<()> {
        Ok(self.timeline.verify_integrity(artifact_id)?)
    }

    /// Versions of an artifact ordered by `created_at`
    #[must_use]
    pub fn versions(&self, artifact_id: &ArtifactId) -> Vec<Arc<Version>> {
        self.registry.list_versions(artifact_id)
    }

    /// Transformer records the backend holds for an artifact
    ///
    /// # Errors
    /// [`EngineError::Storage`] if the read fails
    pub async fn transformer_records(&self, artifact_id: &ArtifactId) -> Result<Vec<TransformerRecord>> {
        Ok(self.backend.list_transformers(artifact_id).await?)
    }

    /// Artifacts with at least one registered version
    #[must_use]
    pub fn artifacts(&self) -> Vec<ArtifactId> {
        self.snapshots.artifacts()
    }

    // ------------------------------------------------------------------
    // Restart
    // ------------------------------------------------------------------

    /// Rebuild an artifact's state from the backend
    ///
    /// Versions, timeline and lifecycle come back; transformer functions
    /// cannot be persisted and must be re-attached with
    /// [`Self::restore_transformer`]. Returns the number of versions loaded.
    /// Everything is read and checked before any of it is indexed, so a
    /// failed restore leaves the engine as it was.
    ///
    /// # Errors
    /// [`EngineError::Storage`] for read failures or a broken hash chain
    pub async fn restore(&self, artifact_id: &ArtifactId) -> Result<usize> {
        let lock = self.writer(artifact_id);
        let _guard = lock.lock().await;

        let versions: Vec<Arc<Version>> = self
            .registry
            .load(artifact_id)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();
        let events = self.timeline.load(artifact_id).await?;
        if versions.is_empty() {
            return Ok(0);
        }

        let mut graph = VersionGraph::build(
            artifact_id.clone(),
            versions.iter().cloned(),
            self.transformers.for_artifact(artifact_id),
        )
        .map_err(|e| EngineError::from_graph(artifact_id, e))?;

        for event in &events {
            graph = match event.kind {
                EventKind::MarkedCold => graph.with_lifecycle(&event.version, Lifecycle::Cold).map(|(g, _)| g),
                EventKind::Decommissioned => graph
                    .with_lifecycle(&event.version, Lifecycle::Decommissioned)
                    .map(|(g, _)| g),
                EventKind::Deployed => graph.with_deployed(&event.version),
                EventKind::VersionRegistered { .. } | EventKind::TransformerRegistered { .. } => continue,
            }
            .map_err(|e| EngineError::from_graph(artifact_id, e))?;
        }

        let count = versions.len();
        for version in versions {
            self.registry.insert_committed(version);
        }
        self.timeline.install(artifact_id.clone(), events);
        self.snapshots.publish(Arc::new(graph));
        info!(artifact = %artifact_id, versions = count, "artifact restored");
        Ok(count)
    }

    /// Re-attach functions to a transformer persisted before a restart
    ///
    /// Writes nothing to the backend or timeline.
    ///
    /// # Errors
    /// - [`EngineError::ArtifactNotFound`] if the artifact was not restored
    /// - [`EngineError::InvalidDescriptor`] if no matching record exists
    /// - The graph errors of [`Self::register_transformer`]
    pub async fn restore_transformer(&self, descriptor: TransformerDescriptor) -> Result<TransformerId> {
        let artifact_id = descriptor.artifact_id.clone();
        let lock = self.writer(&artifact_id);
        let _guard = lock.lock().await;

        let current = self.snapshot(&artifact_id)?;
        let endpoints = [descriptor.from.clone(), descriptor.to.clone()];
        let record = self
            .backend
            .get_transformers_for_versions(&artifact_id, &endpoints)
            .await?
            .into_iter()
            .find(|r| r.from == descriptor.from && r.to == descriptor.to)
            .ok_or_else(|| {
                EngineError::InvalidDescriptor(format!(
                    "no persisted transformer {} -> {} for {artifact_id}",
                    descriptor.from, descriptor.to
                ))
            })?;

        let transformer = Transformer::restore(descriptor, &record)?;
        self.transformers
            .check(&artifact_id, transformer.from(), transformer.to())?;
        let transformer = Arc::new(transformer);
        let candidate = current
            .with_transformer(Arc::clone(&transformer))
            .map_err(|e| EngineError::from_graph(&artifact_id, e))?;

        self.transformers.insert_committed(Arc::clone(&transformer));
        self.snapshots.publish(Arc::new(candidate));
        debug!(artifact = %artifact_id, id = %transformer.id(), "transformer restored");
        Ok(transformer.id())
    }
}

impl Debug for TimescapeEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimescapeEngine")
            .field("config", &self.config)
            .field("backend", &self.backend)
            .field("registry", &self.registry)
            .field("transformers", &self.transformers)
            .finish_non_exhaustive()
    }
}
