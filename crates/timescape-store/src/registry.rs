//! Version Registry
//!
//! Durable store of immutable version metadata per artifact. Lookups hit a
//! concurrent in-process index; writes go through the [`StorageBackend`]
//! first and are indexed only once persisted.

use crate::backend::StorageBackend;
use crate::error::StoreError;
use dashmap::DashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use timescape_version::{ArtifactId, Version, VersionId};

/// Outcome of a registration check
#[derive(Debug, Clone)]
pub enum Registration {
    /// Id unseen; the version may be written
    New,
    /// Identical content already registered under this id
    Unchanged(Arc<Version>),
}

/// Registry of immutable versions
///
/// Writes are expected under a single writer per artifact (the engine
/// serialises them); reads never block on writers.
pub struct VersionRegistry {
    backend: Arc<dyn StorageBackend>,
    versions: DashMap<(ArtifactId, VersionId), Arc<Version>>,
    /// Insertion order per artifact, used for `created_at` ties
    order: DashMap<ArtifactId, Vec<Arc<Version>>>,
}

impl VersionRegistry {
    /// Create a registry persisting through `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            versions: DashMap::new(),
            order: DashMap::new(),
        }
    }

    /// Classify `version` against what is already registered
    ///
    /// # Errors
    /// Returns [`StoreError::RegistrationConflict`] if the id exists with a
    /// different content hash.
    pub fn check(&self, version: &Version) -> Result<Registration, StoreError> {
        let key = (version.artifact_id().clone(), version.version_id().clone());
        match self.versions.get(&key) {
            None => Ok(Registration::New),
            Some(existing) if existing.content_hash() == version.content_hash() => {
                Ok(Registration::Unchanged(Arc::clone(existing.value())))
            }
            Some(existing) => Err(StoreError::RegistrationConflict {
                artifact_id: version.artifact_id().clone(),
                version_id: version.version_id().clone(),
                existing: *existing.content_hash(),
                incoming: *version.content_hash(),
            }),
        }
    }

    /// Register a version on its own (no timeline entry, no graph rebuild)
    ///
    /// Idempotent for identical content.
    ///
    /// # Errors
    /// - [`StoreError::RegistrationConflict`] on differing content
    /// - [`StoreError::Backend`] if persistence fails
    pub async fn register(&self, version: Version) -> Result<Arc<Version>, StoreError> {
        if let Registration::Unchanged(existing) = self.check(&version)? {
            return Ok(existing);
        }
        self.backend.store_version(&version).await?;
        let version = Arc::new(version);
        self.insert_committed(Arc::clone(&version));
        Ok(version)
    }

    /// Index a version the backend already holds
    pub fn insert_committed(&self, version: Arc<Version>) {
        let key = (version.artifact_id().clone(), version.version_id().clone());
        if self.versions.insert(key, Arc::clone(&version)).is_none() {
            self.order
                .entry(version.artifact_id().clone())
                .or_default()
                .push(version);
        }
    }

    /// Exact lookup
    #[must_use]
    pub fn get(&self, artifact_id: &ArtifactId, version_id: &VersionId) -> Option<Arc<Version>> {
        self.versions
            .get(&(artifact_id.clone(), version_id.clone()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Check if the artifact has any version
    #[must_use]
    pub fn contains_artifact(&self, artifact_id: &ArtifactId) -> bool {
        self.order.contains_key(artifact_id)
    }

    /// All versions ordered by `created_at`, ties in registration order
    #[must_use]
    pub fn list_versions(&self, artifact_id: &ArtifactId) -> Vec<Arc<Version>> {
        let mut versions = self
            .order
            .get(artifact_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        // Stable sort keeps registration order among equal timestamps.
        versions.sort_by_key(|v| v.created_at());
        versions
    }

    /// Next free `seq` for minting `tsv:<millis>-<name>-<seq>`
    ///
    /// `None` once the slot holds `u32::MAX`.
    #[must_use]
    pub fn next_seq(&self, artifact_id: &ArtifactId, epoch_millis: u64, name: &str) -> Option<u32> {
        let highest = self.order.get(artifact_id).and_then(|entry| {
            entry
                .value()
                .iter()
                .filter(|v| v.version_id().same_slot(epoch_millis, name))
                .map(|v| v.version_id().seq())
                .max()
        });
        match highest {
            Some(seq) => seq.checked_add(1),
            None => Some(0),
        }
    }

    /// Existing version in the `(millis, name)` slot with the same content
    #[must_use]
    pub fn find_in_slot(&self, candidate: &Version) -> Option<Arc<Version>> {
        let id = candidate.version_id();
        self.order.get(candidate.artifact_id()).and_then(|entry| {
            entry
                .value()
                .iter()
                .find(|v| {
                    v.version_id().same_slot(id.epoch_millis(), id.name())
                        && v.content_hash() == candidate.content_hash()
                })
                .cloned()
        })
    }

    /// Read the stored versions of an artifact in registration order
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] if the backend read fails.
    pub async fn load(&self, artifact_id: &ArtifactId) -> Result<Vec<Version>, StoreError> {
        self.backend.list_versions(artifact_id).await
    }

    /// Rebuild the index for `artifact_id` from the backend
    ///
    /// Returns the number of versions loaded.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] if the backend read fails.
    pub async fn hydrate(&self, artifact_id: &ArtifactId) -> Result<usize, StoreError> {
        let stored = self.load(artifact_id).await?;
        let count = stored.len();
        for version in stored {
            self.insert_committed(Arc::new(version));
        }
        tracing::debug!(artifact = %artifact_id, count, "registry hydrated");
        Ok(count)
    }
}

impl Debug for VersionRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionRegistry")
            .field("versions", &self.versions.len())
            .field("backend", &self.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use timescape_version::VersionDescriptor;

    fn make(seq: u32, secs: i64, content: serde_json::Value) -> Version {
        let id = VersionId::new(1_000, "cart", seq).unwrap();
        let desc = VersionDescriptor::new("cart", "cart", content);
        Version::from_descriptor(&desc, id, Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn registry() -> (Arc<MemoryBackend>, VersionRegistry) {
        let backend = Arc::new(MemoryBackend::new());
        let registry = VersionRegistry::new(backend.clone());
        (backend, registry)
    }

    #[tokio::test]
    async fn register_and_get() {
        let (backend, registry) = registry();
        let v = make(0, 10, json!({"a": 1}));
        registry.register(v.clone()).await.unwrap();

        let found = registry.get(&"cart".into(), v.version_id()).unwrap();
        assert_eq!(*found, v);
        assert_eq!(backend.version_count(), 1);
        assert!(registry.get(&"cart".into(), &VersionId::new(1, "x", 0).unwrap()).is_none());
    }

    #[tokio::test]
    async fn identical_reregistration_is_noop() {
        let (backend, registry) = registry();
        registry.register(make(0, 10, json!({"a": 1}))).await.unwrap();
        registry.register(make(0, 10, json!({"a": 1}))).await.unwrap();
        assert_eq!(backend.version_count(), 1);
        assert_eq!(registry.list_versions(&"cart".into()).len(), 1);
    }

    #[tokio::test]
    async fn differing_content_conflicts() {
        let (_, registry) = registry();
        registry.register(make(0, 10, json!({"a": 1}))).await.unwrap();
        let err = registry.register(make(0, 10, json!({"a": 2}))).await.unwrap_err();
        assert!(matches!(err, StoreError::RegistrationConflict { .. }));
    }

    #[tokio::test]
    async fn list_orders_by_created_at_then_registration() {
        let (_, registry) = registry();
        registry.register(make(0, 30, json!(0))).await.unwrap();
        registry.register(make(1, 10, json!(1))).await.unwrap();
        registry.register(make(2, 30, json!(2))).await.unwrap();
        let seqs: Vec<u32> = registry
            .list_versions(&"cart".into())
            .iter()
            .map(|v| v.version_id().seq())
            .collect();
        assert_eq!(seqs, vec![1, 0, 2]);
    }

    #[tokio::test]
    async fn next_seq_counts_slot() {
        let (_, registry) = registry();
        assert_eq!(registry.next_seq(&"cart".into(), 1_000, "cart"), Some(0));
        registry.register(make(0, 10, json!(0))).await.unwrap();
        registry.register(make(1, 11, json!(1))).await.unwrap();
        assert_eq!(registry.next_seq(&"cart".into(), 1_000, "cart"), Some(2));
        assert_eq!(registry.next_seq(&"cart".into(), 2_000, "cart"), Some(0));
    }

    #[tokio::test]
    async fn next_seq_is_none_for_a_full_slot() {
        let (_, registry) = registry();
        registry.register(make(u32::MAX, 10, json!(0))).await.unwrap();
        assert_eq!(registry.next_seq(&"cart".into(), 1_000, "cart"), None);
        assert_eq!(registry.next_seq(&"cart".into(), 1_000, "basket"), Some(0));
    }

    #[tokio::test]
    async fn hydrate_restores_index() {
        let (backend, registry) = registry();
        registry.register(make(0, 10, json!(0))).await.unwrap();

        let fresh = VersionRegistry::new(backend);
        assert!(!fresh.contains_artifact(&"cart".into()));
        assert_eq!(fresh.hydrate(&"cart".into()).await.unwrap(), 1);
        assert!(fresh.contains_artifact(&"cart".into()));
    }
}
