//! Engine error taxonomy
//!
//! Every lower-level error is folded into [`EngineError`] so callers (the
//! router, the CLI) match on one enum and can tell a missing artifact from a
//! transformation gap.

use crate::config::ConfigError;
use chrono::{DateTime, Utc};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use timescape_graph::{GraphError, PlanError};
use timescape_store::StoreError;
use timescape_version::{ArtifactId, ContentHash, Lifecycle, VersionError, VersionId};

/// Why a hop failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopFailure {
    /// The transform returned an error
    Failed(String),
    /// The transform did not finish within the hop timeout
    TimedOut(Duration),
}

impl Display for HopFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HopFailure::Failed(msg) => write!(f, "failed: {msg}"),
            HopFailure::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

/// Why no chain could be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    /// The versions are not connected
    NoPath,
    /// A path exists but is longer than allowed
    HopLimit { required: usize, max_hops: usize },
}

impl Display for GapReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GapReason::NoPath => f.write_str("no transformer path"),
            GapReason::HopLimit { required, max_hops } => {
                write!(f, "shortest path needs {required} hops, limit is {max_hops}")
            }
        }
    }
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Selector matched no version of a known artifact
    #[error("no version of {artifact_id} matches `{selector}`")]
    VersionNotFound { artifact_id: ArtifactId, selector: String },

    /// Artifact has never been registered
    #[error("artifact {0} is not registered")]
    ArtifactNotFound(ArtifactId),

    /// Same id registered with different content
    #[error("version {version_id} of {artifact_id} already registered with content {existing}, got {incoming}")]
    RegistrationConflict {
        artifact_id: ArtifactId,
        version_id: VersionId,
        existing: ContentHash,
        incoming: ContentHash,
    },

    /// A transformer already connects the ordered pair
    #[error("a transformer {from} -> {to} already exists for {artifact_id}")]
    TransformerConflict {
        artifact_id: ArtifactId,
        from: VersionId,
        to: VersionId,
    },

    /// Registration would introduce a cycle; nothing was persisted
    #[error("transformer {from} -> {to} of {artifact_id} would introduce a cycle")]
    CycleDetected {
        artifact_id: ArtifactId,
        from: VersionId,
        to: VersionId,
    },

    /// No usable chain between the versions
    #[error("cannot transform {artifact_id} from {from} to {to}: {reason}")]
    TransformationGap {
        artifact_id: ArtifactId,
        from: VersionId,
        to: VersionId,
        reason: GapReason,
    },

    /// A hop failed or timed out
    #[error("transformer {from} -> {to} {cause}")]
    TransformerExecution {
        from: VersionId,
        to: VersionId,
        cause: HopFailure,
    },

    /// The caller abandoned the request between hops
    #[error("chain cancelled after {completed_hops} hop(s)")]
    Cancelled { completed_hops: usize },

    /// Lifecycle transition not defined
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition { from: Lifecycle, to: Lifecycle },

    /// Timeline append would move time backwards
    #[error("timeline for {artifact_id} is at {last}, cannot append at {attempted}")]
    TimelineOutOfOrder {
        artifact_id: ArtifactId,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    /// Selector string could not be parsed
    #[error("invalid selector `{input}`: {reason}")]
    InvalidSelector { input: String, reason: String },

    /// Registration input rejected before anything was stored
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Check if the error means "nothing matched"
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VersionNotFound { .. } | Self::ArtifactNotFound(_))
    }

    /// HTTP status a router should answer with
    #[must_use]
    pub fn status_hint(&self) -> u16 {
        match self {
            Self::VersionNotFound { .. } | Self::ArtifactNotFound(_) => 404,
            Self::RegistrationConflict { .. }
            | Self::TransformerConflict { .. }
            | Self::CycleDetected { .. }
            | Self::IllegalTransition { .. }
            | Self::TimelineOutOfOrder { .. } => 409,
            Self::TransformationGap { .. } => 422,
            Self::TransformerExecution { .. } => 502,
            Self::Cancelled { .. } => 499,
            Self::InvalidSelector { .. } | Self::InvalidDescriptor(_) => 400,
            Self::Storage(_) | Self::Config(_) => 500,
        }
    }

    /// Convert a planning failure
    pub(crate) fn from_plan(artifact_id: &ArtifactId, err: PlanError) -> Self {
        match err {
            PlanError::UnknownVersion(id) => Self::VersionNotFound {
                artifact_id: artifact_id.clone(),
                selector: id.to_string(),
            },
            PlanError::NoPath { from, to } => Self::TransformationGap {
                artifact_id: artifact_id.clone(),
                from,
                to,
                reason: GapReason::NoPath,
            },
            PlanError::HopLimit {
                from,
                to,
                required,
                max_hops,
            } => Self::TransformationGap {
                artifact_id: artifact_id.clone(),
                from,
                to,
                reason: GapReason::HopLimit { required, max_hops },
            },
        }
    }

    /// Convert a snapshot derivation failure
    pub(crate) fn from_graph(artifact_id: &ArtifactId, err: GraphError) -> Self {
        match err {
            GraphError::UnknownVersion(id) => Self::VersionNotFound {
                artifact_id: artifact_id.clone(),
                selector: id.to_string(),
            },
            GraphError::DuplicateEdge { from, to } => Self::TransformerConflict {
                artifact_id: artifact_id.clone(),
                from,
                to,
            },
            GraphError::CycleDetected { from, to } => Self::CycleDetected {
                artifact_id: artifact_id.clone(),
                from,
                to,
            },
            GraphError::Lifecycle(err) => err.into(),
            err @ (GraphError::ArtifactMismatch { .. } | GraphError::DuplicateVersion(_)) => {
                Self::InvalidDescriptor(err.to_string())
            }
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RegistrationConflict {
                artifact_id,
                version_id,
                existing,
                incoming,
            } => Self::RegistrationConflict {
                artifact_id,
                version_id,
                existing,
                incoming,
            },
            StoreError::TransformerConflict {
                artifact_id, from, to, ..
            } => Self::TransformerConflict { artifact_id, from, to },
            StoreError::InvalidTransformer(msg) => Self::InvalidDescriptor(msg),
            StoreError::TimelineOutOfOrder {
                artifact_id,
                last,
                attempted,
            } => Self::TimelineOutOfOrder {
                artifact_id,
                last,
                attempted,
            },
            err @ (StoreError::IntegrityViolation { .. } | StoreError::Backend(_)) => Self::Storage(err.to_string()),
        }
    }
}

impl From<VersionError> for EngineError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::InvalidVersionId { input, reason } => Self::InvalidSelector {
                input,
                reason: reason.to_string(),
            },
            VersionError::InvalidSelector { input, reason } => Self::InvalidSelector { input, reason },
            VersionError::InvalidDescriptor(msg) => Self::InvalidDescriptor(msg),
            VersionError::IllegalTransition { from, to } => Self::IllegalTransition { from, to },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(seq: u32) -> VersionId {
        VersionId::new(1, "orders", seq).unwrap()
    }

    #[test]
    fn gap_and_missing_artifact_are_distinguishable() {
        let artifact: ArtifactId = "orders".into();
        let gap = EngineError::from_plan(
            &artifact,
            PlanError::HopLimit {
                from: vid(0),
                to: vid(2),
                required: 2,
                max_hops: 1,
            },
        );
        assert_eq!(gap.status_hint(), 422);
        assert!(!gap.is_not_found());

        let missing = EngineError::ArtifactNotFound(artifact);
        assert_eq!(missing.status_hint(), 404);
        assert!(missing.is_not_found());
    }

    #[test]
    fn only_storage_is_retryable() {
        assert!(EngineError::from(StoreError::Backend("down".into())).is_retryable());
        assert!(!EngineError::Cancelled { completed_hops: 1 }.is_retryable());
    }

    #[test]
    fn lifecycle_error_flows_through_graph() {
        let err = EngineError::from_graph(
            &"orders".into(),
            GraphError::Lifecycle(VersionError::IllegalTransition {
                from: Lifecycle::Decommissioned,
                to: Lifecycle::Active,
            }),
        );
        assert!(matches!(err, EngineError::IllegalTransition { .. }));
        assert_eq!(err.status_hint(), 409);
    }

    #[test]
    fn hop_failure_message_names_the_hop() {
        let err = EngineError::TransformerExecution {
            from: vid(0),
            to: vid(1),
            cause: HopFailure::TimedOut(Duration::from_millis(50)),
        };
        let msg = err.to_string();
        assert!(msg.contains("tsv:1-orders-0"));
        assert!(msg.contains("timed out after 50ms"));
    }
}
