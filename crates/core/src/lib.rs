//! # Retainer Core
//!
//! Manually reference-counted objects and the registry that creates them.
//!
//! Every object starts with a reference count of one, owned by its creator.
//! Owners call [`ObjectRef::retain`] to share ownership and
//! [`ObjectRef::release`] to give it up; the release that brings the count to
//! zero runs the object's release hook exactly once. Deferred release through
//! pools lives in the `retainer-pool` crate and builds on the type-erased
//! [`Release`] trait exported here.
//!
//! ## Example
//!
//! ```rust
//! use retainer_core::Registry;
//! use retainer_config::LifetimeConfig;
//!
//! let registry = Registry::new(LifetimeConfig::default());
//! let buffer = registry.create_with_hook(vec![0u8; 16], |bytes| {
//!     println!("freeing {} bytes", bytes.len());
//! });
//!
//! let shared = buffer.retain().unwrap();
//! shared.release().unwrap();
//! buffer.release().unwrap();
//! assert!(buffer.is_released());
//! ```
//!
//! ## Misuse
//!
//! Over-releasing, touching a finalized object, and similar ownership bugs
//! are routed through [`Registry::enforce`]. With the default
//! [`MisusePolicy::Abort`] they panic; with [`MisusePolicy::Report`] they are
//! returned as [`LifetimeError`] values.

//#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Ownership violation errors
pub mod error;
/// Object and pool identifiers
pub mod id;
/// Reference-counted objects
pub mod object;
/// Registry shared by all objects and thread contexts
pub mod registry;
/// Uncounted references
pub mod weak;

pub use error::{LifetimeError, LifetimeResult};
pub use id::{ObjectId, PoolId};
pub use object::{ObjectRef, Release, ReleaseHook};
pub use registry::{Registry, RegistryStats};
pub use retainer_config::{LifetimeConfig, MisusePolicy};
pub use weak::WeakRef;
