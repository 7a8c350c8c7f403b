//! Timescape Store
//!
//! Durable state behind the engine: the Version Registry, the Transformer
//! Store and the Timeline, all persisting through a pluggable
//! [`StorageBackend`].
//!
//! # Core Concepts
//!
//! - [`StorageBackend`]: storage-agnostic persistence contract
//! - [`MemoryBackend`]: single-process default, atomic batch commits
//! - [`VersionRegistry`]: immutable versions with content-hash conflict checks
//! - [`TransformerStore`]: directed conversion edges keyed by `(from, to)`
//! - [`Timeline`]: append-only, hash-chained event log
//!
//! Every store follows the same two-step write: validate (`check`/`seal`),
//! persist through the backend, then index the committed record. The engine
//! uses the split to write a whole registration in one [`CommitBatch`].

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod clock;
pub mod error;
pub mod registry;
pub mod timeline;
pub mod transformer;

pub use backend::{CommitBatch, MemoryBackend, StorageBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use registry::{Registration, VersionRegistry};
pub use timeline::{EventDraft, EventKind, Timeline, TimelineEvent};
pub use transformer::{
    transform_fn, FnTransform, Identity, Transform, TransformFailure, Transformer,
    TransformerDescriptor, TransformerId, TransformerRecord, TransformerStore,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
