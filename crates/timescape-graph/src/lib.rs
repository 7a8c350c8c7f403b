//! Timescape Graph
//!
//! Per-artifact version graphs and chain planning.
//!
//! # Core Concepts
//!
//! - [`VersionGraph`]: immutable snapshot of versions and transformer edges,
//!   derived copy-on-write and kept acyclic
//! - [`plan`]: deterministic BFS producing a bounded [`Chain`]
//! - [`GraphSnapshots`]: per-artifact pointer swap for publishing snapshots

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod graph;
pub mod planner;
pub mod snapshot;

pub use error::{GraphError, PlanError};
pub use graph::{Node, VersionGraph};
pub use planner::{plan, Chain, Hops};
pub use snapshot::{GraphSnapshots, SnapshotCell};
