//! Timescape Version Model
//!
//! Leaf types shared by every Timescape crate.
//!
//! # Core Concepts
//!
//! - [`VersionId`]: the TSV identifier `tsv:<epochMillis>-<name>-<seq>`
//! - [`Version`]: immutable metadata of a registered version
//! - [`VersionDescriptor`]: registration input
//! - [`Selector`]: how a request names the version it was written against
//! - [`ContentHash`]: 32-byte Blake3 digest guarding re-registration
//! - [`Lifecycle`]: `active -> cold -> decommissioned`
//!
//! # Example
//!
//! ```rust
//! use timescape_version::{Selector, VersionId};
//!
//! let id: VersionId = "tsv:1700000000000-checkout-0".parse().unwrap();
//! assert_eq!(Selector::parse(Some(id.to_string().as_str())).unwrap(), Selector::Id(id));
//! assert_eq!(Selector::parse(None).unwrap(), Selector::Latest);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod hash;
mod id;
mod selector;
mod version;

pub use error::VersionError;
pub use hash::{ContentHash, HashError};
pub use id::{ArtifactId, VersionId, TSV_PREFIX};
pub use selector::{Selector, LATEST};
pub use version::{latest_at, Lifecycle, Version, VersionDescriptor};

/// Request/response body exchanged with handlers
pub type Payload = serde_json::Value;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
