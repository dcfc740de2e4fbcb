//! # Retainer: manual reference counting with deferred-release pools
//!
//! Objects carry an explicit retain count. Owners call `retain` and
//! `release`; the release that brings the count to zero runs the object's
//! release hook exactly once. A deferred release hands one decrement to the
//! innermost pool of the calling thread, so producers can return objects
//! they no longer own without the object dying under the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use retainer::prelude::*;
//!
//! let registry = Registry::new(LifetimeConfig::default());
//! let mut context = ThreadContext::new(&registry);
//!
//! let greeting = context
//!     .with_pool(|context| {
//!         let name = registry.create(String::from("world")).autorelease(context).unwrap();
//!         format!("hello, {}", name.payload().unwrap())
//!     })
//!     .unwrap();
//!
//! assert_eq!(greeting, "hello, world");
//! assert_eq!(registry.live_objects(), 0);
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - lifetime policy and its TOML loader
//! - [`core`] - counted objects, weak handles, and the registry
//! - [`pool`] - deferred-release pools, pool stacks, and thread contexts
//! - [`simulation`] - canned workloads driven by the `retainer` binary

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub use retainer_config as config;
pub use retainer_core as core;
pub use retainer_pool as pool;

pub mod simulation;

/// Common imports for working with counted objects
pub mod prelude {
    pub use crate::config::{LifetimeConfig, MisusePolicy};
    pub use crate::core::{
        LifetimeError, LifetimeResult, ObjectId, ObjectRef, PoolId, Registry, RegistryStats,
        Release, WeakRef,
    };
    pub use crate::pool::{DeferredRelease, PoolHandle, PoolStack, SweepReport, ThreadContext};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
