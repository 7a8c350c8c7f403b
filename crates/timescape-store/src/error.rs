//! Store error types

use chrono::{DateTime, Utc};
use timescape_version::{ArtifactId, ContentHash, VersionId};

use crate::transformer::TransformerId;

/// Errors raised by the registry, transformer store, timeline and backends
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Same `(artifact, id)` registered with different content
    #[error("version {version_id} of {artifact_id} already registered with content {existing}, got {incoming}")]
    RegistrationConflict {
        artifact_id: ArtifactId,
        version_id: VersionId,
        existing: ContentHash,
        incoming: ContentHash,
    },

    /// A transformer already covers this ordered pair
    #[error("transformer {existing} already connects {from} -> {to} for {artifact_id}")]
    TransformerConflict {
        artifact_id: ArtifactId,
        from: VersionId,
        to: VersionId,
        existing: TransformerId,
    },

    /// Transformer descriptor failed validation
    #[error("invalid transformer: {0}")]
    InvalidTransformer(String),

    /// Timeline append would move time backwards
    #[error("timeline for {artifact_id} is at {last}, cannot append event at {attempted}")]
    TimelineOutOfOrder {
        artifact_id: ArtifactId,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    /// Timeline hash chain does not verify
    #[error("timeline integrity violation for {artifact_id} at event {index}")]
    IntegrityViolation { artifact_id: ArtifactId, index: usize },

    /// Persistence backend failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check if the failure may succeed on retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
