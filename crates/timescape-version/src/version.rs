//! Version metadata and registration descriptors

use crate::error::VersionError;
use crate::hash::ContentHash;
use crate::id::{ArtifactId, VersionId};
use crate::selector::Selector;
use crate::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Immutable metadata of one registered version
///
/// # Invariants
/// - Uniquely identified by `(artifact_id, version_id)`
/// - Never mutated after registration; lifecycle state lives in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    artifact_id: ArtifactId,
    version_id: VersionId,
    tag: Option<String>,
    created_at: DateTime<Utc>,
    breaking: bool,
    content_hash: ContentHash,
    meta: BTreeMap<String, Payload>,
}

impl Version {
    /// Materialise a version from a validated descriptor
    #[must_use]
    pub fn from_descriptor(
        descriptor: &VersionDescriptor,
        version_id: VersionId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            artifact_id: descriptor.artifact_id.clone(),
            version_id,
            tag: descriptor.tag.clone(),
            created_at,
            breaking: descriptor.breaking,
            content_hash: descriptor.content_hash(),
            meta: descriptor.meta.clone(),
        }
    }

    /// Owning artifact
    #[inline]
    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    /// TSV of this version
    #[inline]
    #[must_use]
    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    /// Semantic tag, if any
    #[inline]
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Creation time used for timestamp and latest resolution
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether this version breaks its predecessor's contract
    #[inline]
    #[must_use]
    pub fn is_breaking(&self) -> bool {
        self.breaking
    }

    /// Hash of the registered content
    #[inline]
    #[must_use]
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Free-form metadata
    #[inline]
    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Payload> {
        &self.meta
    }
}

/// Registration input for a version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Owning artifact
    pub artifact_id: ArtifactId,
    /// Explicit TSV; minted from `created_at`, `name` and the next free seq when absent
    pub version_id: Option<VersionId>,
    /// Name component used when minting a TSV
    pub name: String,
    /// Optional semantic tag (e.g. `v2.0.0`)
    pub tag: Option<String>,
    /// Creation time; the engine clock is used when absent
    pub created_at: Option<DateTime<Utc>>,
    /// Breaking contract change
    pub breaking: bool,
    /// Content the hash is computed over (handler manifest, schema, ...)
    pub content: Payload,
    /// Free-form metadata
    #[serde(default)]
    pub meta: BTreeMap<String, Payload>,
    /// Versions this one evolved from; defaults to the current latest
    pub parents: Option<Vec<VersionId>>,
    /// Who registered it
    pub actor_id: String,
}

impl VersionDescriptor {
    /// Start a descriptor for `artifact_id`
    #[must_use]
    pub fn new(artifact_id: impl Into<ArtifactId>, name: impl Into<String>, content: Payload) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            version_id: None,
            name: name.into(),
            tag: None,
            created_at: None,
            breaking: false,
            content,
            meta: BTreeMap::new(),
            parents: None,
            actor_id: "system".to_string(),
        }
    }

    /// With an explicit TSV
    #[must_use]
    pub fn with_id(mut self, version_id: VersionId) -> Self {
        self.version_id = Some(version_id);
        self
    }

    /// With a semantic tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// With an explicit creation time
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Mark as a breaking change
    #[must_use]
    pub fn breaking(mut self) -> Self {
        self.breaking = true;
        self
    }

    /// With a metadata entry
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Payload) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// With explicit parents
    #[must_use]
    pub fn with_parents(mut self, parents: Vec<VersionId>) -> Self {
        self.parents = Some(parents);
        self
    }

    /// Registering actor
    #[must_use]
    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    /// Hash of `content`
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of_json(&self.content)
    }

    /// Check the descriptor before anything is minted or stored
    ///
    /// # Errors
    /// Returns [`VersionError::InvalidDescriptor`] when the artifact id or
    /// name is malformed, or when the tag would be shadowed by another
    /// selector form (`latest`, a TSV, a timestamp).
    pub fn validate(&self) -> Result<(), VersionError> {
        if !self.artifact_id.is_valid() {
            return Err(VersionError::InvalidDescriptor(format!(
                "artifact id `{}` must be non-empty without whitespace",
                self.artifact_id
            )));
        }
        if self.version_id.is_none() && (self.name.is_empty() || self.name.chars().any(char::is_whitespace)) {
            return Err(VersionError::InvalidDescriptor(format!(
                "version name `{}` must be non-empty without whitespace",
                self.name
            )));
        }
        if let Some(tag) = &self.tag {
            match Selector::parse(Some(tag.as_str())) {
                Ok(Selector::Tag(_)) => {}
                _ => {
                    return Err(VersionError::InvalidDescriptor(format!(
                        "tag `{tag}` is not addressable as a tag selector"
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Routing lifecycle of a version
///
/// `Active -> Cold -> Decommissioned`; nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Eligible for routing
    #[default]
    Active,
    /// No recent traffic (flag only)
    Cold,
    /// Out of `latest`/routing eligibility; still resolvable for audit
    Decommissioned,
}

impl Lifecycle {
    /// Validate a transition
    ///
    /// Returns `Ok(false)` when `to` equals the current state.
    ///
    /// # Errors
    /// Returns [`VersionError::IllegalTransition`] for undefined edges.
    pub fn transition(self, to: Lifecycle) -> Result<bool, VersionError> {
        match (self, to) {
            (from, to) if from == to => Ok(false),
            (Lifecycle::Active, Lifecycle::Cold) | (Lifecycle::Cold, Lifecycle::Decommissioned) => Ok(true),
            (from, to) => Err(VersionError::IllegalTransition { from, to }),
        }
    }

    /// Whether `latest` and deployment may pick this version
    #[inline]
    #[must_use]
    pub fn is_routable(self) -> bool {
        !matches!(self, Lifecycle::Decommissioned)
    }
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifecycle::Active => "active",
            Lifecycle::Cold => "cold",
            Lifecycle::Decommissioned => "decommissioned",
        })
    }
}

/// Pick the entry with the greatest `(created_at, sequence)` not after `at`.
///
/// Shared by live resolution and timeline audits so both break `created_at`
/// ties the same way: the later registration wins.
pub fn latest_at<'a, T, I, K>(items: I, at: Option<DateTime<Utc>>, key: K) -> Option<&'a T>
where
    I: IntoIterator<Item = &'a T>,
    K: Fn(&T) -> (DateTime<Utc>, u64),
    T: 'a,
{
    items
        .into_iter()
        .filter(|item| at.map_or(true, |at| key(*item).0 <= at))
        .max_by_key(|item| key(*item))
}
