//! Chain planning
//!
//! Breadth-first search over a snapshot's outgoing edges. Edges are visited in
//! registration order, so the first path found is the one with the fewest
//! hops and, among those, the one discovered first. The result does not
//! depend on timing or hash ordering.

use crate::error::PlanError;
use crate::graph::VersionGraph;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use timescape_store::Transformer;
use timescape_version::{ArtifactId, VersionId};
use tracing::debug;

/// Hops kept inline; real graphs are near-linear and chains stay short
pub type Hops = SmallVec<[Arc<Transformer>; 4]>;

/// Ordered transformers leading from one version to another
///
/// Forward execution walks `hops` front to back applying `forward`;
/// backward execution walks them back to front applying `backward`.
#[derive(Debug, Clone)]
pub struct Chain {
    artifact_id: ArtifactId,
    from: VersionId,
    to: VersionId,
    hops: Hops,
}

impl Chain {
    /// Chain that converts nothing
    #[must_use]
    pub fn empty(artifact_id: ArtifactId, version: VersionId) -> Self {
        Self {
            artifact_id,
            from: version.clone(),
            to: version,
            hops: SmallVec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    /// Version the request was written against
    #[inline]
    #[must_use]
    pub fn from(&self) -> &VersionId {
        &self.from
    }

    /// Version the handler runs
    #[inline]
    #[must_use]
    pub fn to(&self) -> &VersionId {
        &self.to
    }

    #[inline]
    #[must_use]
    pub fn hops(&self) -> &[Arc<Transformer>] {
        &self.hops
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Versions visited, `from` first
    #[must_use]
    pub fn path(&self) -> Vec<&VersionId> {
        std::iter::once(&self.from)
            .chain(self.hops.iter().map(|hop| hop.to()))
            .collect()
    }
}

/// Plan the chain converting `from`-shaped payloads into `to`-shaped ones
///
/// # Errors
/// - [`PlanError::UnknownVersion`] if either endpoint is not in `graph`
/// - [`PlanError::NoPath`] if `to` is unreachable
/// - [`PlanError::HopLimit`] if the shortest path exceeds `max_hops`
pub fn plan(graph: &VersionGraph, from: &VersionId, to: &VersionId, max_hops: usize) -> Result<Chain, PlanError> {
    for endpoint in [from, to] {
        if graph.node(endpoint).is_none() {
            return Err(PlanError::UnknownVersion(endpoint.clone()));
        }
    }
    if from == to {
        return Ok(Chain::empty(graph.artifact_id().clone(), from.clone()));
    }

    // Edge used to first reach each version; also serves as the visited set.
    let mut reached_by: HashMap<&VersionId, &Arc<Transformer>> = HashMap::new();
    let mut queue: VecDeque<&VersionId> = VecDeque::from([from]);

    'search: while let Some(current) = queue.pop_front() {
        for edge in graph.outgoing(current) {
            let next = edge.to();
            if next == from || reached_by.contains_key(next) {
                continue;
            }
            reached_by.insert(next, edge);
            if next == to {
                break 'search;
            }
            queue.push_back(next);
        }
    }

    let mut hops: Hops = SmallVec::new();
    let mut cursor = to;
    while cursor != from {
        let Some(&edge) = reached_by.get(cursor) else {
            debug!(artifact = %graph.artifact_id(), %from, %to, "no transformer path");
            return Err(PlanError::NoPath {
                from: from.clone(),
                to: to.clone(),
            });
        };
        hops.push(Arc::clone(edge));
        cursor = edge.from();
    }
    hops.reverse();

    if hops.len() > max_hops {
        debug!(
            artifact = %graph.artifact_id(),
            %from,
            %to,
            required = hops.len(),
            max_hops,
            "chain exceeds hop limit"
        );
        return Err(PlanError::HopLimit {
            from: from.clone(),
            to: to.clone(),
            required: hops.len(),
            max_hops,
        });
    }

    debug!(artifact = %graph.artifact_id(), %from, %to, hops = hops.len(), "planned chain");
    Ok(Chain {
        artifact_id: graph.artifact_id().clone(),
        from: from.clone(),
        to: to.clone(),
        hops,
    })
}
