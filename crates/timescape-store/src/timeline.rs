//! Timeline
//!
//! Append-only, time-ordered event log per artifact. Every event is chained
//! to its predecessor by a Blake3 hash so audits can detect tampering in a
//! backend. Timestamp queries share [`latest_at`] with live resolution.

use crate::backend::StorageBackend;
use crate::error::StoreError;
use crate::transformer::TransformerId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use timescape_version::{latest_at, ArtifactId, ContentHash, Lifecycle, Payload, VersionId};
use ulid::Ulid;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    VersionRegistered {
        created_at: DateTime<Utc>,
        content_hash: ContentHash,
        tag: Option<String>,
    },
    TransformerRegistered {
        transformer_id: TransformerId,
        to: VersionId,
        breaking: bool,
    },
    MarkedCold,
    Decommissioned,
    Deployed,
}

/// One entry of the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: Ulid,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub artifact_id: ArtifactId,
    pub version: VersionId,
    pub kind: EventKind,
    pub payload: Payload,
    /// Versions this event evolved from
    pub parents: Vec<VersionId>,
    pub prev_hash: ContentHash,
    pub hash: ContentHash,
}

impl TimelineEvent {
    fn compute_hash(&self) -> ContentHash {
        let timestamp = self.timestamp.to_rfc3339();
        let version = self.version.to_string();
        let kind = serde_json::to_string(&self.kind).unwrap_or_default();
        let payload = self.payload.to_string();
        let parents = self
            .parents
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let id = self.id.to_bytes();
        ContentHash::chain(&[
            id.as_slice(),
            timestamp.as_bytes(),
            self.actor_id.as_bytes(),
            self.artifact_id.as_str().as_bytes(),
            version.as_bytes(),
            kind.as_bytes(),
            payload.as_bytes(),
            parents.as_bytes(),
            self.prev_hash.as_bytes().as_slice(),
        ])
    }

    /// `created_at` of a registration event
    #[must_use]
    pub fn registered_created_at(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            EventKind::VersionRegistered { created_at, .. } => Some(*created_at),
            _ => None,
        }
    }
}

/// Unsealed event; the timeline assigns id and hashes
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub artifact_id: ArtifactId,
    pub version: VersionId,
    pub kind: EventKind,
    pub payload: Payload,
    pub parents: Vec<VersionId>,
}

impl EventDraft {
    /// Start a draft
    #[must_use]
    pub fn new(artifact_id: ArtifactId, version: VersionId, kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            actor_id: "system".to_string(),
            artifact_id,
            version,
            kind,
            payload: Payload::Null,
            parents: Vec::new(),
        }
    }

    #[must_use]
    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_parents(mut self, parents: Vec<VersionId>) -> Self {
        self.parents = parents;
        self
    }
}

/// Append-only event log
///
/// Appends for one artifact are expected from a single writer.
pub struct Timeline {
    backend: Arc<dyn StorageBackend>,
    events: DashMap<ArtifactId, Vec<TimelineEvent>>,
}

impl Timeline {
    /// Create a timeline persisting through `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            events: DashMap::new(),
        }
    }

    /// Turn a draft into the next event of its artifact without storing it
    ///
    /// # Errors
    /// Returns [`StoreError::TimelineOutOfOrder`] if the draft is older than
    /// the last appended event.
    pub fn seal(&self, draft: EventDraft) -> Result<TimelineEvent, StoreError> {
        let last = self
            .events
            .get(&draft.artifact_id)
            .and_then(|events| events.last().map(|e| (e.timestamp, e.hash)));

        let prev_hash = match last {
            Some((last_ts, _)) if draft.timestamp < last_ts => {
                return Err(StoreError::TimelineOutOfOrder {
                    artifact_id: draft.artifact_id,
                    last: last_ts,
                    attempted: draft.timestamp,
                })
            }
            Some((_, hash)) => hash,
            None => ContentHash::default(),
        };

        let mut event = TimelineEvent {
            id: Ulid::new(),
            timestamp: draft.timestamp,
            actor_id: draft.actor_id,
            artifact_id: draft.artifact_id,
            version: draft.version,
            kind: draft.kind,
            payload: draft.payload,
            parents: draft.parents,
            prev_hash,
            hash: ContentHash::default(),
        };
        event.hash = event.compute_hash();
        Ok(event)
    }

    /// Seal, persist and index one event
    ///
    /// # Errors
    /// - [`StoreError::TimelineOutOfOrder`] if the timestamp regresses
    /// - [`StoreError::Backend`] if persistence fails
    pub async fn append(&self, draft: EventDraft) -> Result<TimelineEvent, StoreError> {
        let event = self.seal(draft)?;
        self.backend.store_timeline_entry(&event).await?;
        self.push_committed(event.clone());
        Ok(event)
    }

    /// Index an event the backend already holds
    pub fn push_committed(&self, event: TimelineEvent) {
        let mut events = self.events.entry(event.artifact_id.clone()).or_default();
        if events.last().is_some_and(|last| last.hash != event.prev_hash) {
            tracing::error!(
                artifact = %event.artifact_id,
                event = %event.id,
                "timeline event does not extend the chain head"
            );
        }
        events.push(event);
    }

    /// Full ordered sequence for audit/rollback tooling
    #[must_use]
    pub fn history(&self, artifact_id: &ArtifactId) -> Vec<TimelineEvent> {
        self.events
            .get(artifact_id)
            .map(|events| events.value().clone())
            .unwrap_or_default()
    }

    /// Timestamp of the newest event
    #[must_use]
    pub fn last_timestamp(&self, artifact_id: &ArtifactId) -> Option<DateTime<Utc>> {
        self.events
            .get(artifact_id)
            .and_then(|events| events.last().map(|e| e.timestamp))
    }

    /// Version with the greatest `created_at <= at`, ties to the later registration
    #[must_use]
    pub fn version_active_at(&self, artifact_id: &ArtifactId, at: DateTime<Utc>) -> Option<VersionId> {
        let events = self.events.get(artifact_id)?;
        let registrations: Vec<(DateTime<Utc>, u64, &VersionId)> = events
            .iter()
            .filter_map(|e| e.registered_created_at().map(|created| (created, &e.version)))
            .zip(0u64..)
            .map(|((created, version), seq)| (created, seq, version))
            .collect();
        latest_at(&registrations, Some(at), |r| (r.0, r.1)).map(|r| r.2.clone())
    }

    /// Versions registered up to `at` with their lifecycle at that instant
    #[must_use]
    pub fn state_at(&self, artifact_id: &ArtifactId, at: DateTime<Utc>) -> Vec<(VersionId, Lifecycle)> {
        let Some(events) = self.events.get(artifact_id) else {
            return Vec::new();
        };
        let mut order = Vec::new();
        let mut states = HashMap::new();
        for event in events.iter().take_while(|e| e.timestamp <= at) {
            match event.kind {
                EventKind::VersionRegistered { .. } => {
                    order.push(event.version.clone());
                    states.insert(event.version.clone(), Lifecycle::Active);
                }
                EventKind::MarkedCold => {
                    states.insert(event.version.clone(), Lifecycle::Cold);
                }
                EventKind::Decommissioned => {
                    states.insert(event.version.clone(), Lifecycle::Decommissioned);
                }
                EventKind::TransformerRegistered { .. } | EventKind::Deployed => {}
            }
        }
        order
            .into_iter()
            .map(|id| {
                let state = states.get(&id).copied().unwrap_or_default();
                (id, state)
            })
            .collect()
    }

    /// Ancestors of `version` following registration `parents`, nearest first
    #[must_use]
    pub fn lineage(&self, artifact_id: &ArtifactId, version: &VersionId) -> Vec<VersionId> {
        let Some(events) = self.events.get(artifact_id) else {
            return Vec::new();
        };
        let parents: HashMap<&VersionId, &[VersionId]> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::VersionRegistered { .. }))
            .map(|e| (&e.version, e.parents.as_slice()))
            .collect();

        let mut seen = BTreeSet::new();
        let mut lineage = Vec::new();
        let mut queue: VecDeque<&VersionId> = parents.get(version).into_iter().flat_map(|p| p.iter()).collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            lineage.push(next.clone());
            if let Some(grand) = parents.get(next) {
                queue.extend(grand.iter());
            }
        }
        lineage
    }

    /// Recompute the hash chain of an artifact
    ///
    /// # Errors
    /// Returns [`StoreError::IntegrityViolation`] at the first broken link.
    pub fn verify_integrity(&self, artifact_id: &ArtifactId) -> Result<(), StoreError> {
        match self.events.get(artifact_id) {
            Some(events) => verify_chain(artifact_id, events.value()),
            None => Ok(()),
        }
    }

    /// Number of events logged for an artifact
    #[must_use]
    pub fn len(&self, artifact_id: &ArtifactId) -> usize {
        self.events.get(artifact_id).map_or(0, |events| events.len())
    }

    /// Read and verify the stored log without indexing it
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] if the read fails, or
    /// [`StoreError::IntegrityViolation`] if the stored chain is broken.
    pub async fn load(&self, artifact_id: &ArtifactId) -> Result<Vec<TimelineEvent>, StoreError> {
        let stored = self.backend.timeline_entries(artifact_id).await?;
        verify_chain(artifact_id, &stored)?;
        Ok(stored)
    }

    /// Replace the indexed log of an artifact with verified events
    pub fn install(&self, artifact_id: ArtifactId, events: Vec<TimelineEvent>) {
        self.events.insert(artifact_id, events);
    }

    /// Rebuild the index for `artifact_id` from the backend
    ///
    /// Nothing is indexed when the stored chain is broken.
    ///
    /// # Errors
    /// As [`Timeline::load`]
    pub async fn hydrate(&self, artifact_id: &ArtifactId) -> Result<usize, StoreError> {
        let stored = self.load(artifact_id).await?;
        let count = stored.len();
        self.install(artifact_id.clone(), stored);
        Ok(count)
    }
}

/// Check `events` form an unbroken chain from the genesis marker
fn verify_chain(artifact_id: &ArtifactId, events: &[TimelineEvent]) -> Result<(), StoreError> {
    let mut prev = None;
    for (index, event) in events.iter().enumerate() {
        let linked = match prev {
            None => event.prev_hash.is_zero(),
            Some(hash) => event.prev_hash == hash,
        };
        if !linked || event.hash != event.compute_hash() {
            return Err(StoreError::IntegrityViolation {
                artifact_id: artifact_id.clone(),
                index,
            });
        }
        prev = Some(event.hash);
    }
    Ok(())
}

impl Debug for Timeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("artifacts", &self.events.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn vid(seq: u32) -> VersionId {
        VersionId::new(1, "search", seq).unwrap()
    }

    fn registered(seq: u32, created: i64, logged: i64) -> EventDraft {
        EventDraft::new(
            "search".into(),
            vid(seq),
            EventKind::VersionRegistered {
                created_at: at(created),
                content_hash: ContentHash::chain(&[seq.to_le_bytes().as_slice()]),
                tag: None,
            },
            at(logged),
        )
    }

    fn timeline() -> (Arc<MemoryBackend>, Timeline) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), Timeline::new(backend))
    }

    #[tokio::test]
    async fn append_enforces_monotonic_timestamps() {
        let (_, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        timeline.append(registered(1, 20, 100)).await.unwrap();
        let err = timeline.append(registered(2, 30, 99)).await.unwrap_err();
        assert!(matches!(err, StoreError::TimelineOutOfOrder { .. }));
        assert_eq!(timeline.history(&"search".into()).len(), 2);
    }

    #[tokio::test]
    async fn other_artifacts_have_their_own_clock() {
        let (_, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        let other = EventDraft::new("billing".into(), vid(0), EventKind::MarkedCold, at(1));
        assert!(timeline.append(other).await.is_ok());
    }

    #[tokio::test]
    async fn append_persists_in_order() {
        let (backend, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        timeline.append(registered(1, 20, 101)).await.unwrap();
        let stored = backend.timeline_entries(&"search".into()).await.unwrap();
        assert_eq!(stored, timeline.history(&"search".into()));
    }

    #[tokio::test]
    async fn version_active_at_uses_created_at() {
        let (_, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        timeline.append(registered(1, 30, 101)).await.unwrap();
        timeline.append(registered(2, 20, 102)).await.unwrap();

        let id = "search".into();
        assert_eq!(timeline.version_active_at(&id, at(5)), None);
        assert_eq!(timeline.version_active_at(&id, at(10)), Some(vid(0)));
        assert_eq!(timeline.version_active_at(&id, at(25)), Some(vid(2)));
        assert_eq!(timeline.version_active_at(&id, at(31)), Some(vid(1)));
    }

    #[tokio::test]
    async fn version_active_at_ties_go_to_later_registration() {
        let (_, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        timeline.append(registered(1, 10, 101)).await.unwrap();
        assert_eq!(timeline.version_active_at(&"search".into(), at(10)), Some(vid(1)));
    }

    #[tokio::test]
    async fn state_at_replays_lifecycle() {
        let (_, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        timeline.append(registered(1, 20, 110)).await.unwrap();
        timeline
            .append(EventDraft::new("search".into(), vid(0), EventKind::MarkedCold, at(120)))
            .await
            .unwrap();
        timeline
            .append(EventDraft::new("search".into(), vid(0), EventKind::Decommissioned, at(130)))
            .await
            .unwrap();

        let id = "search".into();
        assert_eq!(timeline.state_at(&id, at(105)), vec![(vid(0), Lifecycle::Active)]);
        assert_eq!(
            timeline.state_at(&id, at(125)),
            vec![(vid(0), Lifecycle::Cold), (vid(1), Lifecycle::Active)]
        );
        assert_eq!(
            timeline.state_at(&id, at(200)),
            vec![(vid(0), Lifecycle::Decommissioned), (vid(1), Lifecycle::Active)]
        );
    }

    #[tokio::test]
    async fn lineage_follows_parents() {
        let (_, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        timeline
            .append(registered(1, 20, 101).with_parents(vec![vid(0)]))
            .await
            .unwrap();
        timeline
            .append(registered(2, 30, 102).with_parents(vec![vid(1)]))
            .await
            .unwrap();
        assert_eq!(timeline.lineage(&"search".into(), &vid(2)), vec![vid(1), vid(0)]);
        assert!(timeline.lineage(&"search".into(), &vid(0)).is_empty());
    }

    #[tokio::test]
    async fn hash_chain_verifies_and_detects_tampering() {
        let (backend, timeline) = timeline();
        timeline
            .append(registered(0, 10, 100).with_payload(json!({"note": "first"})))
            .await
            .unwrap();
        timeline.append(registered(1, 20, 101)).await.unwrap();
        assert!(timeline.verify_integrity(&"search".into()).is_ok());

        let mut events = timeline.history(&"search".into());
        events[0].payload = json!({"note": "edited"});
        let tampered = Timeline::new(backend);
        for event in events {
            tampered.push_committed(event);
        }
        assert!(matches!(
            tampered.verify_integrity(&"search".into()),
            Err(StoreError::IntegrityViolation { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn hydrate_reloads_from_backend() {
        let (backend, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        let fresh = Timeline::new(backend);
        assert_eq!(fresh.hydrate(&"search".into()).await.unwrap(), 1);
        assert_eq!(fresh.history(&"search".into()), timeline.history(&"search".into()));
    }

    #[tokio::test]
    async fn hydrate_rejects_a_broken_chain_without_indexing_it() {
        let (backend, timeline) = timeline();
        timeline.append(registered(0, 10, 100)).await.unwrap();
        let mut forged = timeline.history(&"search".into()).remove(0);
        forged.payload = json!({"note": "replayed"});
        backend.store_timeline_entry(&forged).await.unwrap();

        let fresh = Timeline::new(backend);
        assert!(matches!(
            fresh.hydrate(&"search".into()).await,
            Err(StoreError::IntegrityViolation { index: 1, .. })
        ));
        assert!(fresh.history(&"search".into()).is_empty());
        assert_eq!(fresh.len(&"search".into()), 0);
    }
}
