//! Timescape Engine
//!
//! Resolves which version of a handler serves a request and converts
//! payloads between the client's version and the deployed one.
//!
//! # Request flow
//!
//! 1. [`Selector::parse`] the version named by the request (or `latest`)
//! 2. [`TimescapeEngine::route`] resolves it, finds the deployed version and
//!    plans the shortest transformer chain between them, all from one
//!    snapshot
//! 3. [`TimescapeEngine::forward`] converts the request, the handler runs,
//!    [`TimescapeEngine::backward`] converts the response
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use timescape_engine::prelude::*;
//!
//! # async fn demo() -> Result<(), EngineError> {
//! let engine = TimescapeEngine::new(EngineConfig::default())?;
//! let v1 = engine
//!     .register(VersionDescriptor::new("checkout", "checkout", serde_json::json!({"price": "string"})))
//!     .await?;
//! let v2 = engine
//!     .register(VersionDescriptor::new("checkout", "checkout", serde_json::json!({"priceInCents": "int"})))
//!     .await?;
//! engine
//!     .register_transformer(TransformerDescriptor::new("checkout", v1.clone(), v2, Arc::new(Identity)))
//!     .await?;
//!
//! let route = engine.route(&"checkout".into(), &Selector::Id(v1))?;
//! let request = engine
//!     .forward(&route, serde_json::json!({"price": "29.99"}), &ExecutionContext::new())
//!     .await?;
//! # let _ = request;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineBuilder, Route, TimescapeEngine};
pub use error::{EngineError, GapReason, HopFailure, Result};
pub use executor::{CancellationFlag, ChainExecutor, Direction, ExecutionContext};
pub use resolver::ResolvedState;
pub use timescape_version::Selector;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything an embedding service usually needs
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Route, TimescapeEngine};
    pub use crate::error::{EngineError, GapReason, HopFailure};
    pub use crate::executor::{CancellationFlag, ExecutionContext};
    pub use timescape_store::{
        transform_fn, Identity, Transform, TransformFailure, TransformerDescriptor, TransformerId,
    };
    pub use timescape_version::{ArtifactId, Payload, Selector, VersionDescriptor, VersionId};
}
