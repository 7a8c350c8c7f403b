//! Transformer edges and the transformer store
//!
//! A [`Transformer`] is a directed conversion edge `from -> to` carrying a
//! forward and a backward [`Transform`]. The store keys edges by
//! `(artifact, from, to)`, so edge lookup during planning is O(1), and keeps
//! a per-artifact list in registration order for deterministic traversal.

use crate::backend::StorageBackend;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;
use timescape_version::{ArtifactId, Payload, VersionId};
use ulid::Ulid;

/// Unique transformer identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransformerId(pub Ulid);

impl TransformerId {
    /// Generate new transformer ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TransformerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransformerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by a transform function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransformFailure(pub String);

impl TransformFailure {
    /// Create from any message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One direction of a payload conversion
///
/// Implementations must be deterministic and free of side effects: the
/// executor never retries and may abandon a call between hops.
#[async_trait::async_trait]
pub trait Transform: Send + Sync {
    /// Convert `payload`
    async fn apply(&self, payload: Payload) -> Result<Payload, TransformFailure>;
}

/// Adapter for plain synchronous closures
pub struct FnTransform<F>(F);

impl<F> FnTransform<F>
where
    F: Fn(Payload) -> Result<Payload, TransformFailure> + Send + Sync + 'static,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(Payload) -> Result<Payload, TransformFailure> + Send + Sync + 'static,
{
    async fn apply(&self, payload: Payload) -> Result<Payload, TransformFailure> {
        (self.0)(payload)
    }
}

/// Passes the payload through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait::async_trait]
impl Transform for Identity {
    async fn apply(&self, payload: Payload) -> Result<Payload, TransformFailure> {
        Ok(payload)
    }
}

/// Box a closure as a shareable transform
pub fn transform_fn<F>(f: F) -> Arc<dyn Transform>
where
    F: Fn(Payload) -> Result<Payload, TransformFailure> + Send + Sync + 'static,
{
    Arc::new(FnTransform::new(f))
}

/// Registration input for a transformer
#[derive(Clone)]
pub struct TransformerDescriptor {
    pub artifact_id: ArtifactId,
    pub from: VersionId,
    pub to: VersionId,
    pub breaking: bool,
    pub forward: Arc<dyn Transform>,
    /// Non-breaking edges may omit this; it then defaults to [`Identity`]
    pub backward: Option<Arc<dyn Transform>>,
}

impl TransformerDescriptor {
    /// Start a descriptor with a forward transform
    #[must_use]
    pub fn new(
        artifact_id: impl Into<ArtifactId>,
        from: VersionId,
        to: VersionId,
        forward: Arc<dyn Transform>,
    ) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            from,
            to,
            breaking: false,
            forward,
            backward: None,
        }
    }

    /// With a backward transform
    #[must_use]
    pub fn with_backward(mut self, backward: Arc<dyn Transform>) -> Self {
        self.backward = Some(backward);
        self
    }

    /// Mark as breaking
    #[must_use]
    pub fn breaking(mut self) -> Self {
        self.breaking = true;
        self
    }
}

impl Debug for TransformerDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerDescriptor")
            .field("artifact_id", &self.artifact_id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("breaking", &self.breaking)
            .field("has_backward", &self.backward.is_some())
            .finish_non_exhaustive()
    }
}

/// Directed conversion edge between two versions of one artifact
pub struct Transformer {
    id: TransformerId,
    artifact_id: ArtifactId,
    from: VersionId,
    to: VersionId,
    forward: Arc<dyn Transform>,
    backward: Arc<dyn Transform>,
    breaking: bool,
    backward_defaulted: bool,
    registered_at: DateTime<Utc>,
    ordinal: u64,
}

impl Transformer {
    /// Build an edge from a descriptor
    ///
    /// # Errors
    /// - [`StoreError::InvalidTransformer`] for a self-loop
    /// - [`StoreError::InvalidTransformer`] for a breaking edge without a
    ///   backward transform
    pub fn from_descriptor(
        descriptor: TransformerDescriptor,
        registered_at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        if descriptor.from == descriptor.to {
            return Err(StoreError::InvalidTransformer(format!(
                "transformer cannot connect {} to itself",
                descriptor.from
            )));
        }

        let backward_defaulted = descriptor.backward.is_none();
        let backward = match descriptor.backward {
            Some(backward) => backward,
            None if descriptor.breaking => {
                return Err(StoreError::InvalidTransformer(format!(
                    "breaking transformer {} -> {} needs an explicit backward transform",
                    descriptor.from, descriptor.to
                )))
            }
            None => Arc::new(Identity),
        };

        Ok(Self {
            id: TransformerId::new(),
            artifact_id: descriptor.artifact_id,
            from: descriptor.from,
            to: descriptor.to,
            forward: descriptor.forward,
            backward,
            breaking: descriptor.breaking,
            backward_defaulted,
            registered_at,
            ordinal: 0,
        })
    }

    /// Re-attach functions to a persisted record after a restart
    ///
    /// Keeps the record's id, registration time and ordinal.
    ///
    /// # Errors
    /// - [`StoreError::InvalidTransformer`] if the descriptor does not
    ///   describe the record's edge
    /// - Any error of [`Transformer::from_descriptor`]
    pub fn restore(descriptor: TransformerDescriptor, record: &TransformerRecord) -> Result<Self, StoreError> {
        if descriptor.artifact_id != record.artifact_id
            || descriptor.from != record.from
            || descriptor.to != record.to
            || descriptor.breaking != record.breaking
        {
            return Err(StoreError::InvalidTransformer(format!(
                "descriptor {} -> {} does not match persisted transformer {}",
                descriptor.from, descriptor.to, record.id
            )));
        }
        let mut transformer = Self::from_descriptor(descriptor, record.registered_at)?;
        transformer.id = record.id;
        transformer.ordinal = record.ordinal;
        Ok(transformer)
    }

    /// Place the edge in its artifact's registration order
    #[must_use]
    pub fn at_ordinal(mut self, ordinal: u64) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Position among the artifact's transformer registrations
    #[inline]
    #[must_use]
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TransformerId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    #[inline]
    #[must_use]
    pub fn from(&self) -> &VersionId {
        &self.from
    }

    #[inline]
    #[must_use]
    pub fn to(&self) -> &VersionId {
        &self.to
    }

    #[inline]
    #[must_use]
    pub fn forward(&self) -> &Arc<dyn Transform> {
        &self.forward
    }

    #[inline]
    #[must_use]
    pub fn backward(&self) -> &Arc<dyn Transform> {
        &self.backward
    }

    #[inline]
    #[must_use]
    pub fn is_breaking(&self) -> bool {
        self.breaking
    }

    /// Persistable metadata (functions are not serialisable)
    #[must_use]
    pub fn record(&self) -> TransformerRecord {
        TransformerRecord {
            id: self.id,
            artifact_id: self.artifact_id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            breaking: self.breaking,
            backward_defaulted: self.backward_defaulted,
            registered_at: self.registered_at,
            ordinal: self.ordinal,
        }
    }
}

impl Debug for Transformer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("id", &self.id)
            .field("artifact_id", &self.artifact_id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("breaking", &self.breaking)
            .field("backward_defaulted", &self.backward_defaulted)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

/// Transformer metadata as persisted by a [`StorageBackend`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformerRecord {
    pub id: TransformerId,
    pub artifact_id: ArtifactId,
    pub from: VersionId,
    pub to: VersionId,
    pub breaking: bool,
    /// No backward function was supplied; identity stands in
    pub backward_defaulted: bool,
    pub registered_at: DateTime<Utc>,
    /// Orders edges that leave the same version
    #[serde(default)]
    pub ordinal: u64,
}

type EdgeKey = (ArtifactId, VersionId, VersionId);

/// Durable store of transformer edges
///
/// Writes are expected under a single writer per artifact; reads are
/// lock-free against the concurrent maps.
pub struct TransformerStore {
    backend: Arc<dyn StorageBackend>,
    edges: DashMap<EdgeKey, Arc<Transformer>>,
    by_artifact: DashMap<ArtifactId, Vec<Arc<Transformer>>>,
}

impl TransformerStore {
    /// Create a store persisting through `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            edges: DashMap::new(),
            by_artifact: DashMap::new(),
        }
    }

    /// Reject a second transformer for the same ordered pair
    ///
    /// # Errors
    /// Returns [`StoreError::TransformerConflict`] if the pair is taken.
    pub fn check(&self, artifact_id: &ArtifactId, from: &VersionId, to: &VersionId) -> Result<(), StoreError> {
        let key = (artifact_id.clone(), from.clone(), to.clone());
        match self.edges.get(&key) {
            Some(existing) => Err(StoreError::TransformerConflict {
                artifact_id: artifact_id.clone(),
                from: from.clone(),
                to: to.clone(),
                existing: existing.id(),
            }),
            None => Ok(()),
        }
    }

    /// Persist and index a transformer
    ///
    /// # Errors
    /// - [`StoreError::TransformerConflict`] if the pair is taken
    /// - [`StoreError::Backend`] if persistence fails
    pub async fn register(&self, transformer: Transformer) -> Result<Arc<Transformer>, StoreError> {
        self.check(transformer.artifact_id(), transformer.from(), transformer.to())?;
        self.backend.store_transformer(&transformer.record()).await?;
        let transformer = Arc::new(transformer);
        self.insert_committed(Arc::clone(&transformer));
        Ok(transformer)
    }

    /// Index a transformer whose record the backend already holds
    pub fn insert_committed(&self, transformer: Arc<Transformer>) {
        let key = (
            transformer.artifact_id().clone(),
            transformer.from().clone(),
            transformer.to().clone(),
        );
        self.by_artifact
            .entry(transformer.artifact_id().clone())
            .or_default()
            .push(Arc::clone(&transformer));
        self.edges.insert(key, transformer);
    }

    /// Exact edge lookup
    #[must_use]
    pub fn get(&self, artifact_id: &ArtifactId, from: &VersionId, to: &VersionId) -> Option<Arc<Transformer>> {
        self.edges
            .get(&(artifact_id.clone(), from.clone(), to.clone()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All edges of an artifact in registration order
    #[must_use]
    pub fn for_artifact(&self, artifact_id: &ArtifactId) -> Vec<Arc<Transformer>> {
        self.by_artifact
            .get(artifact_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of indexed edges
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check if no edge is indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Debug for TransformerStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerStore")
            .field("edges", &self.edges.len())
            .finish_non_exhaustive()
    }
}
