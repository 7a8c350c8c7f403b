//! Version Graph - copy-on-write snapshot
//!
//! One [`VersionGraph`] per artifact. Every registration derives a new value
//! from the previous one (`with_version`, `with_transformer`, ...); the
//! persistent `im` collections share structure, so deriving is cheap and an
//! existing snapshot is never mutated. Readers holding an old `Arc` keep a
//! complete, consistent view.

use crate::error::GraphError;
use chrono::{DateTime, Utc};
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graphmap::DiGraphMap;
use std::sync::Arc;
use timescape_store::Transformer;
use timescape_version::{latest_at, ArtifactId, Lifecycle, Version, VersionError, VersionId};

/// A registered version inside one snapshot
#[derive(Debug, Clone)]
pub struct Node {
    version: Arc<Version>,
    /// Registration order within the artifact
    seq: u64,
    lifecycle: Lifecycle,
}

impl Node {
    #[inline]
    #[must_use]
    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }

    #[inline]
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Resolution order: `created_at`, then registration order
    #[inline]
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.version.created_at(), self.seq)
    }
}

/// Immutable per-artifact graph of versions (nodes) and transformers (edges)
///
/// # Invariants
/// - Acyclic
/// - Every edge connects two nodes of this graph
/// - At most one edge per ordered `(from, to)` pair
#[derive(Debug, Clone)]
pub struct VersionGraph {
    artifact_id: ArtifactId,
    generation: u64,
    nodes: im::OrdMap<VersionId, Node>,
    next_seq: u64,
    edges: im::HashMap<(VersionId, VersionId), Arc<Transformer>>,
    /// Outgoing edges per node by ordinal, then insertion
    outgoing: im::OrdMap<VersionId, im::Vector<Arc<Transformer>>>,
    deployed: Option<VersionId>,
}

impl VersionGraph {
    /// Graph with no versions
    #[must_use]
    pub fn empty(artifact_id: ArtifactId) -> Self {
        Self {
            artifact_id,
            generation: 0,
            nodes: im::OrdMap::new(),
            next_seq: 0,
            edges: im::HashMap::new(),
            outgoing: im::OrdMap::new(),
            deployed: None,
        }
    }

    /// Build a graph from registry and transformer-store contents
    ///
    /// `versions` must be in registration order and `transformers` in
    /// edge-registration order.
    ///
    /// # Errors
    /// Propagates the first [`GraphError`] of the incremental build.
    pub fn build<V, T>(artifact_id: ArtifactId, versions: V, transformers: T) -> Result<Self, GraphError>
    where
        V: IntoIterator<Item = Arc<Version>>,
        T: IntoIterator<Item = Arc<Transformer>>,
    {
        let mut graph = Self::empty(artifact_id);
        for version in versions {
            graph = graph.with_version(version)?;
        }
        for transformer in transformers {
            graph = graph.with_transformer(transformer)?;
        }
        Ok(graph)
    }

    /// Derive a snapshot with one more node
    ///
    /// # Errors
    /// - [`GraphError::ArtifactMismatch`] for a foreign version
    /// - [`GraphError::DuplicateVersion`] if the id is present
    pub fn with_version(&self, version: Arc<Version>) -> Result<Self, GraphError> {
        if version.artifact_id() != &self.artifact_id {
            return Err(GraphError::ArtifactMismatch {
                expected: self.artifact_id.clone(),
                found: version.artifact_id().clone(),
            });
        }
        if self.nodes.contains_key(version.version_id()) {
            return Err(GraphError::DuplicateVersion(version.version_id().clone()));
        }

        let mut next = self.derive();
        next.nodes.insert(
            version.version_id().clone(),
            Node {
                version,
                seq: next.next_seq,
                lifecycle: Lifecycle::Active,
            },
        );
        next.next_seq += 1;
        Ok(next)
    }

    /// Derive a snapshot with one more edge
    ///
    /// # Errors
    /// - [`GraphError::UnknownVersion`] if an endpoint is missing
    /// - [`GraphError::DuplicateEdge`] if the pair is taken
    /// - [`GraphError::CycleDetected`] if `to` already reaches `from`
    pub fn with_transformer(&self, transformer: Arc<Transformer>) -> Result<Self, GraphError> {
        let from = transformer.from().clone();
        let to = transformer.to().clone();
        if transformer.artifact_id() != &self.artifact_id {
            return Err(GraphError::ArtifactMismatch {
                expected: self.artifact_id.clone(),
                found: transformer.artifact_id().clone(),
            });
        }
        for endpoint in [&from, &to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::UnknownVersion(endpoint.clone()));
            }
        }
        if self.edges.contains_key(&(from.clone(), to.clone())) {
            return Err(GraphError::DuplicateEdge { from, to });
        }
        if from == to || self.reaches(&to, &from) {
            return Err(GraphError::CycleDetected { from, to });
        }

        let mut next = self.derive();
        let mut out = next.outgoing.get(&from).cloned().unwrap_or_default();
        let at = out
            .iter()
            .position(|t| t.ordinal() > transformer.ordinal())
            .unwrap_or(out.len());
        out.insert(at, Arc::clone(&transformer));
        next.outgoing.insert(from.clone(), out);
        next.edges.insert((from, to), transformer);
        Ok(next)
    }

    /// Derive a snapshot with a lifecycle change
    ///
    /// Returns the new snapshot and whether anything changed.
    /// Decommissioning the pinned deployment clears the pin.
    ///
    /// # Errors
    /// - [`GraphError::UnknownVersion`] if the id is missing
    /// - [`GraphError::Lifecycle`] for an undefined transition
    pub fn with_lifecycle(&self, version_id: &VersionId, to: Lifecycle) -> Result<(Self, bool), GraphError> {
        let node = self
            .nodes
            .get(version_id)
            .ok_or_else(|| GraphError::UnknownVersion(version_id.clone()))?;
        if !node.lifecycle.transition(to)? {
            return Ok((self.clone(), false));
        }

        let mut next = self.derive();
        let mut node = node.clone();
        node.lifecycle = to;
        next.nodes.insert(version_id.clone(), node);
        if !to.is_routable() && next.deployed.as_ref() == Some(version_id) {
            next.deployed = None;
        }
        Ok((next, true))
    }

    /// Derive a snapshot pinning the deployed version
    ///
    /// # Errors
    /// - [`GraphError::UnknownVersion`] if the id is missing
    /// - [`GraphError::Lifecycle`] if the version is decommissioned
    pub fn with_deployed(&self, version_id: &VersionId) -> Result<Self, GraphError> {
        let node = self
            .nodes
            .get(version_id)
            .ok_or_else(|| GraphError::UnknownVersion(version_id.clone()))?;
        if !node.lifecycle.is_routable() {
            return Err(GraphError::Lifecycle(VersionError::IllegalTransition {
                from: node.lifecycle,
                to: Lifecycle::Active,
            }));
        }
        let mut next = self.derive();
        next.deployed = Some(version_id.clone());
        Ok(next)
    }

    fn derive(&self) -> Self {
        let mut next = self.clone();
        next.generation += 1;
        next
    }

    /// True if a directed path `from ->* to` exists
    fn reaches<'a>(&'a self, from: &'a VersionId, to: &'a VersionId) -> bool {
        let graph = self.as_graphmap();
        graph.contains_node(from) && graph.contains_node(to) && has_path_connecting(&graph, from, to, None)
    }

    fn as_graphmap(&self) -> DiGraphMap<&VersionId, ()> {
        let mut graph = DiGraphMap::with_capacity(self.nodes.len(), self.edges.len());
        for id in self.nodes.keys() {
            graph.add_node(id);
        }
        for (from, to) in self.edges.keys() {
            graph.add_edge(from, to, ());
        }
        graph
    }

    /// Owning artifact
    #[inline]
    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    /// Number of derivations since the empty graph
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of versions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if there are no versions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of transformers
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Node by id
    #[must_use]
    pub fn node(&self, version_id: &VersionId) -> Option<&Node> {
        self.nodes.get(version_id)
    }

    /// Version by id (any lifecycle)
    #[must_use]
    pub fn version(&self, version_id: &VersionId) -> Option<&Arc<Version>> {
        self.nodes.get(version_id).map(Node::version)
    }

    /// Lifecycle of a version
    #[must_use]
    pub fn lifecycle(&self, version_id: &VersionId) -> Option<Lifecycle> {
        self.nodes.get(version_id).map(Node::lifecycle)
    }

    /// Nodes in resolution order (`created_at`, then registration)
    #[must_use]
    pub fn nodes_ordered(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.order_key());
        nodes
    }

    /// Edge for an ordered pair
    #[must_use]
    pub fn edge(&self, from: &VersionId, to: &VersionId) -> Option<&Arc<Transformer>> {
        self.edges.get(&(from.clone(), to.clone()))
    }

    /// Outgoing edges of `from` in registration order
    pub fn outgoing(&self, from: &VersionId) -> impl Iterator<Item = &Arc<Transformer>> + '_ {
        self.outgoing.get(from).into_iter().flat_map(|edges| edges.iter())
    }

    /// Newest routable version
    #[must_use]
    pub fn latest(&self) -> Option<&Arc<Version>> {
        latest_at(
            self.nodes.values().filter(|n| n.lifecycle.is_routable()),
            None,
            Node::order_key,
        )
        .map(Node::version)
    }

    /// Version with the greatest `created_at <= at` (any lifecycle)
    #[must_use]
    pub fn latest_at(&self, at: DateTime<Utc>) -> Option<&Arc<Version>> {
        latest_at(self.nodes.values(), Some(at), Node::order_key).map(Node::version)
    }

    /// Newest version carrying `tag` (any lifecycle)
    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Option<&Arc<Version>> {
        latest_at(
            self.nodes.values().filter(|n| n.version.tag() == Some(tag)),
            None,
            Node::order_key,
        )
        .map(Node::version)
    }

    /// Pinned deployment, if any
    #[must_use]
    pub fn pinned(&self) -> Option<&VersionId> {
        self.deployed.as_ref()
    }

    /// Version handlers currently run: the pin, or latest when unpinned
    #[must_use]
    pub fn deployed(&self) -> Option<&Arc<Version>> {
        match &self.deployed {
            Some(id) => self.version(id),
            None => self.latest(),
        }
    }

    /// Full acyclicity check (the derivations already guarantee it)
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.as_graphmap())
    }
}
