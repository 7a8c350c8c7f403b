//! Version Resolver
//!
//! Maps a [`Selector`] onto a concrete version of one snapshot. Resolution is
//! pure: it reads the snapshot it is handed and nothing else, so a request
//! that captured a snapshot resolves consistently for its whole lifetime.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use timescape_graph::VersionGraph;
use timescape_version::{ArtifactId, Selector, Version, VersionId};

/// Resolve `selector` against `graph`
///
/// - `Id`: exact lookup, any lifecycle
/// - `Tag`: newest version carrying the tag, any lifecycle
/// - `At`: greatest `created_at <= at`, any lifecycle
/// - `Latest`: newest routable version
///
/// # Errors
/// [`EngineError::VersionNotFound`] when nothing matches
pub fn resolve(graph: &VersionGraph, selector: &Selector) -> Result<Arc<Version>> {
    let found = match selector {
        Selector::Id(id) => graph.version(id),
        Selector::Tag(tag) => graph.by_tag(tag),
        Selector::At(at) => graph.latest_at(*at),
        Selector::Latest => graph.latest(),
    };
    found.cloned().ok_or_else(|| EngineError::VersionNotFound {
        artifact_id: graph.artifact_id().clone(),
        selector: selector.to_string(),
    })
}

/// Version handlers currently run: the deployment pin, else latest
///
/// # Errors
/// [`EngineError::VersionNotFound`] when every version is decommissioned
pub fn deployed(graph: &VersionGraph) -> Result<Arc<Version>> {
    graph
        .deployed()
        .cloned()
        .ok_or_else(|| EngineError::VersionNotFound {
            artifact_id: graph.artifact_id().clone(),
            selector: "deployed".to_string(),
        })
}

/// Request-scoped mapping from artifact to resolved version
///
/// Built once per request and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedState(BTreeMap<ArtifactId, VersionId>);

impl ResolvedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact_id: ArtifactId, version_id: VersionId) -> Option<VersionId> {
        self.0.insert(artifact_id, version_id)
    }

    #[must_use]
    pub fn get(&self, artifact_id: &ArtifactId) -> Option<&VersionId> {
        self.0.get(artifact_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactId, &VersionId)> {
        self.0.iter()
    }
}
