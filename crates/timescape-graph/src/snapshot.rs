//! Snapshot publication
//!
//! Each artifact owns a [`SnapshotCell`] holding the current
//! `Arc<VersionGraph>`. Readers copy the pointer out under a read lock that
//! is released immediately; writers build the next graph off-lock and swap
//! the pointer in. A reader that loaded before a swap finishes against the
//! graph it holds.

use crate::graph::VersionGraph;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use timescape_version::ArtifactId;
use tracing::trace;

/// Atomically swappable pointer to one artifact's current graph
#[derive(Debug)]
pub struct SnapshotCell {
    current: RwLock<Arc<VersionGraph>>,
}

impl SnapshotCell {
    #[must_use]
    pub fn new(graph: VersionGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn load(&self) -> Arc<VersionGraph> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot, returning the previous one
    pub fn swap(&self, next: Arc<VersionGraph>) -> Arc<VersionGraph> {
        std::mem::replace(&mut *self.current.write(), next)
    }
}

/// Per-artifact snapshot cells
#[derive(Debug, Default)]
pub struct GraphSnapshots {
    cells: DashMap<ArtifactId, Arc<SnapshotCell>>,
}

impl GraphSnapshots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of `artifact_id`, if it has one
    #[must_use]
    pub fn load(&self, artifact_id: &ArtifactId) -> Option<Arc<VersionGraph>> {
        self.cells.get(artifact_id).map(|cell| cell.load())
    }

    /// Current snapshot, or an empty graph for an unseen artifact
    ///
    /// The empty graph is not published.
    #[must_use]
    pub fn load_or_empty(&self, artifact_id: &ArtifactId) -> Arc<VersionGraph> {
        self.load(artifact_id)
            .unwrap_or_else(|| Arc::new(VersionGraph::empty(artifact_id.clone())))
    }

    /// Make `graph` the current snapshot of its artifact
    ///
    /// Callers must serialise publishes per artifact; the cell itself only
    /// guarantees that readers never observe a partially written pointer.
    pub fn publish(&self, graph: Arc<VersionGraph>) {
        let artifact_id = graph.artifact_id().clone();
        let generation = graph.generation();
        let cell = self
            .cells
            .entry(artifact_id.clone())
            .or_insert_with(|| Arc::new(SnapshotCell::new(VersionGraph::empty(artifact_id.clone()))))
            .clone();
        let previous = cell.swap(graph);
        trace!(
            artifact = %artifact_id,
            from = previous.generation(),
            to = generation,
            "published snapshot"
        );
    }

    /// Artifacts with a published snapshot
    #[must_use]
    pub fn artifacts(&self) -> Vec<ArtifactId> {
        self.cells.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use timescape_version::{Version, VersionDescriptor, VersionId};

    fn with_versions(n: u32) -> VersionGraph {
        let versions = (0..n).map(|i| {
            let desc = VersionDescriptor::new("search", "search", json!({ "v": i }));
            let id = VersionId::new(9, "search", i).unwrap();
            Arc::new(Version::from_descriptor(&desc, id, Utc.timestamp_opt(i64::from(i), 0).unwrap()))
        });
        VersionGraph::build("search".into(), versions, Vec::new()).unwrap()
    }

    #[test]
    fn unseen_artifact_has_no_snapshot() {
        let snapshots = GraphSnapshots::new();
        let artifact: ArtifactId = "search".into();
        assert!(snapshots.load(&artifact).is_none());
        assert!(snapshots.load_or_empty(&artifact).is_empty());
        assert!(snapshots.artifacts().is_empty());
    }

    #[test]
    fn held_snapshot_survives_publish() {
        let snapshots = GraphSnapshots::new();
        let artifact: ArtifactId = "search".into();
        snapshots.publish(Arc::new(with_versions(1)));

        let held = snapshots.load(&artifact).unwrap();
        snapshots.publish(Arc::new(with_versions(3)));

        assert_eq!(held.len(), 1);
        assert_eq!(snapshots.load(&artifact).unwrap().len(), 3);
    }
}
