//! # Retainer Pools
//!
//! Deferred release for [`retainer_core`] objects.
//!
//! A deferred release hands the obligation to decrement an object's count to
//! the top pool of the calling thread's [`PoolStack`]. The count is left alone
//! until the pool is destroyed, which lets a producer return an object it no
//! longer owns without the object dying under the caller.
//!
//! ```rust
//! use retainer_core::{LifetimeConfig, Registry};
//! use retainer_pool::{DeferredRelease, ThreadContext};
//!
//! let registry = Registry::new(LifetimeConfig::default());
//! let mut context = ThreadContext::new(&registry);
//!
//! let pool = context.push_pool();
//! let name = registry.create(String::from("temporary")).autorelease(&mut context).unwrap();
//! assert_eq!(name.payload().unwrap(), "temporary");
//!
//! let report = context.destroy_pool(pool).unwrap();
//! assert_eq!(report.objects_finalized(), 1);
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

/// Per-thread context owning the pool stack
pub mod context;
/// A single deferred-release pool
pub mod pool;
/// LIFO stack of pools with cascading destruction
pub mod stack;

pub use context::{DeferredRelease, ThreadContext};
pub use pool::{DeferredReleasePool, PoolHandle, PoolState, PoolSweep};
pub use stack::{PoolStack, SweepReport};
