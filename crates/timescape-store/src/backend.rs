//! Pluggable persistence contract
//!
//! The engine is storage-agnostic. A backend must preserve insertion order
//! for timeline reads and offer exact-match lookup for versions and
//! transformers. [`MemoryBackend`] is the single-process default.

use crate::error::StoreError;
use crate::timeline::TimelineEvent;
use crate::transformer::TransformerRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use timescape_version::{ArtifactId, Version, VersionId};

/// Everything one registration writes
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub versions: Vec<Version>,
    pub transformers: Vec<TransformerRecord>,
    pub timeline: Vec<TimelineEvent>,
}

impl CommitBatch {
    /// Create empty batch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if nothing would be written
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.transformers.is_empty() && self.timeline.is_empty()
    }
}

/// Persistence contract consumed by the stores
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Persist a version
    async fn store_version(&self, version: &Version) -> Result<(), StoreError>;

    /// Exact `(artifact, id)` lookup
    async fn get_version(
        &self,
        artifact_id: &ArtifactId,
        version_id: &VersionId,
    ) -> Result<Option<Version>, StoreError>;

    /// All versions of an artifact in insertion order
    async fn list_versions(&self, artifact_id: &ArtifactId) -> Result<Vec<Version>, StoreError>;

    /// Persist transformer metadata
    async fn store_transformer(&self, record: &TransformerRecord) -> Result<(), StoreError>;

    /// All transformer records of an artifact in insertion order
    async fn list_transformers(&self, artifact_id: &ArtifactId) -> Result<Vec<TransformerRecord>, StoreError>;

    /// Transformers whose endpoints both lie in `versions`, insertion order
    async fn get_transformers_for_versions(
        &self,
        artifact_id: &ArtifactId,
        versions: &[VersionId],
    ) -> Result<Vec<TransformerRecord>, StoreError>;

    /// Append a timeline entry
    async fn store_timeline_entry(&self, event: &TimelineEvent) -> Result<(), StoreError>;

    /// Timeline entries of an artifact in insertion order
    async fn timeline_entries(&self, artifact_id: &ArtifactId) -> Result<Vec<TimelineEvent>, StoreError>;

    /// Write a registration's records
    ///
    /// The default writes one record at a time and is therefore not atomic;
    /// backends with transactions should override it.
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        for version in &batch.versions {
            self.store_version(version).await?;
        }
        for record in &batch.transformers {
            self.store_transformer(record).await?;
        }
        for event in &batch.timeline {
            self.store_timeline_entry(event).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    versions: HashMap<(ArtifactId, VersionId), Version>,
    version_order: HashMap<ArtifactId, Vec<VersionId>>,
    transformers: HashMap<ArtifactId, Vec<TransformerRecord>>,
    timeline: HashMap<ArtifactId, Vec<TimelineEvent>>,
}

impl MemoryState {
    fn put_version(&mut self, version: &Version) {
        let key = (version.artifact_id().clone(), version.version_id().clone());
        if self.versions.insert(key, version.clone()).is_none() {
            self.version_order
                .entry(version.artifact_id().clone())
                .or_default()
                .push(version.version_id().clone());
        }
    }

    fn put_transformer(&mut self, record: &TransformerRecord) {
        self.transformers
            .entry(record.artifact_id.clone())
            .or_default()
            .push(record.clone());
    }

    fn put_event(&mut self, event: &TimelineEvent) {
        self.timeline
            .entry(event.artifact_id.clone())
            .or_default()
            .push(event.clone());
    }
}

/// In-process backend; `commit` applies a batch under one write lock
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    fail_next_commit: AtomicBool,
}

impl MemoryBackend {
    /// Create empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without writing anything
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of stored versions across artifacts
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.state.read().versions.len()
    }

    /// Number of stored timeline entries across artifacts
    #[must_use]
    pub fn timeline_len(&self) -> usize {
        self.state.read().timeline.values().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn store_version(&self, version: &Version) -> Result<(), StoreError> {
        self.state.write().put_version(version);
        Ok(())
    }

    async fn get_version(
        &self,
        artifact_id: &ArtifactId,
        version_id: &VersionId,
    ) -> Result<Option<Version>, StoreError> {
        Ok(self
            .state
            .read()
            .versions
            .get(&(artifact_id.clone(), version_id.clone()))
            .cloned())
    }

    async fn list_versions(&self, artifact_id: &ArtifactId) -> Result<Vec<Version>, StoreError> {
        let state = self.state.read();
        Ok(state
            .version_order
            .get(artifact_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.versions.get(&(artifact_id.clone(), id.clone())).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn store_transformer(&self, record: &TransformerRecord) -> Result<(), StoreError> {
        self.state.write().put_transformer(record);
        Ok(())
    }

    async fn list_transformers(&self, artifact_id: &ArtifactId) -> Result<Vec<TransformerRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .transformers
            .get(artifact_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_transformers_for_versions(
        &self,
        artifact_id: &ArtifactId,
        versions: &[VersionId],
    ) -> Result<Vec<TransformerRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .transformers
            .get(artifact_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| versions.contains(&r.from) && versions.contains(&r.to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn store_timeline_entry(&self, event: &TimelineEvent) -> Result<(), StoreError> {
        self.state.write().put_event(event);
        Ok(())
    }

    async fn timeline_entries(&self, artifact_id: &ArtifactId) -> Result<Vec<TimelineEvent>, StoreError> {
        Ok(self
            .state
            .read()
            .timeline
            .get(artifact_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".to_string()));
        }
        let mut state = self.state.write();
        for version in &batch.versions {
            state.put_version(version);
        }
        for record in &batch.transformers {
            state.put_transformer(record);
        }
        for event in &batch.timeline {
            state.put_event(event);
        }
        Ok(())
    }
}
