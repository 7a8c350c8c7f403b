//! Graph and planning errors

use timescape_version::{ArtifactId, VersionError, VersionId};

/// Errors raised while deriving a new snapshot
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node belongs to another artifact
    #[error("version of {found} cannot join the graph of {expected}")]
    ArtifactMismatch { expected: ArtifactId, found: ArtifactId },

    /// Node id already present
    #[error("version {0} is already in the graph")]
    DuplicateVersion(VersionId),

    /// Referenced version is not a node
    #[error("version {0} is not registered")]
    UnknownVersion(VersionId),

    /// Edge for the ordered pair already present
    #[error("an edge {from} -> {to} already exists")]
    DuplicateEdge { from: VersionId, to: VersionId },

    /// Edge would close a cycle
    #[error("edge {from} -> {to} would introduce a cycle")]
    CycleDetected { from: VersionId, to: VersionId },

    /// Lifecycle change not allowed
    #[error(transparent)]
    Lifecycle(#[from] VersionError),
}

/// Why no chain could be planned
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Endpoint not in the graph
    #[error("version {0} is not registered")]
    UnknownVersion(VersionId),

    /// The versions are not connected
    #[error("no transformer path from {from} to {to}")]
    NoPath { from: VersionId, to: VersionId },

    /// Connected, but the shortest chain exceeds policy
    #[error("shortest path from {from} to {to} needs {required} hops, limit is {max_hops}")]
    HopLimit {
        from: VersionId,
        to: VersionId,
        required: usize,
        max_hops: usize,
    },
}
