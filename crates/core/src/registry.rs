//! Process-wide bookkeeping for reference-counted objects.
//!
//! A [`Registry`] is the explicit root of the lifetime scheme. It hands out
//! object ids, keeps creation/finalization statistics, and owns the
//! [`LifetimeConfig`] whose misuse policy decides whether ownership violations
//! are fatal. The registry is cheap to clone and may be shared freely across
//! threads; every clone observes the same counters.

use crate::error::LifetimeResult;
use crate::id::ObjectId;
use crate::object::{ObjectRef, ReleaseHook};
use retainer_config::LifetimeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pool-stack ids are unique across every registry in the process.
static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

struct RegistryInner {
    config: LifetimeConfig,
    next_object_id: AtomicU64,
    created: AtomicU64,
    finalized: AtomicU64,
}

/// Shared handle to the object registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates a registry with the given configuration.
    pub fn new(config: LifetimeConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                next_object_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                finalized: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the configuration this registry was created with.
    pub fn config(&self) -> &LifetimeConfig {
        &self.inner.config
    }

    /// Creates an object with a count of one and no release hook.
    pub fn create<T>(&self, payload: T) -> ObjectRef<T>
    where
        T: Send + Sync + 'static,
    {
        ObjectRef::new(self.clone(), self.allocate_id(), payload, None)
    }

    /// Creates an object with a count of one whose `hook` runs on finalization.
    pub fn create_with_hook<T, F>(&self, payload: T, hook: F) -> ObjectRef<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let hook: ReleaseHook<T> = Box::new(hook);
        ObjectRef::new(self.clone(), self.allocate_id(), payload, Some(hook))
    }

    /// Creates a container that takes ownership of one reference to each element.
    ///
    /// When the container is finalized it issues exactly one release per element.
    /// Elements whose release fails are named in a warning once every element
    /// has been released.
    pub fn create_container<E>(&self, elements: Vec<ObjectRef<E>>) -> ObjectRef<Vec<ObjectRef<E>>>
    where
        E: Send + Sync + 'static,
    {
        self.create_with_hook(elements, |elements| {
            let failed: Vec<ObjectId> = elements
                .iter()
                .filter(|element| element.release().is_err())
                .map(ObjectRef::id)
                .collect();
            if !failed.is_empty() {
                log::warn!(
                    "container released {} element(s), {} failed: {:?}",
                    elements.len(),
                    failed.len(),
                    failed
                );
            }
        })
    }

    /// Applies the misuse policy to an operation result.
    ///
    /// Violations are always logged. Under [`MisusePolicy::Abort`](retainer_config::MisusePolicy::Abort)
    /// this panics; otherwise the error is returned unchanged.
    pub fn enforce<T>(&self, result: LifetimeResult<T>) -> LifetimeResult<T> {
        if let Err(err) = &result {
            log::error!("ownership violation: {err}");
            if self.inner.config.misuse_policy.is_fatal() {
                panic!("ownership violation: {err}");
            }
        }
        result
    }

    /// Reserves an identifier for a new pool stack.
    ///
    /// Ids come from one process-wide sequence, so stacks under different
    /// registries never share an id.
    pub fn next_stack_id(&self) -> u64 {
        NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns a snapshot of the registry counters.
    pub fn stats(&self) -> RegistryStats {
        let created = self.inner.created.load(Ordering::Acquire);
        let finalized = self.inner.finalized.load(Ordering::Acquire);
        RegistryStats {
            created,
            finalized,
            live: created.saturating_sub(finalized),
        }
    }

    /// Number of objects created and not yet finalized.
    pub fn live_objects(&self) -> u64 {
        self.stats().live
    }

    /// Returns `true` if both handles refer to the same registry.
    pub fn same_as(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn allocate_id(&self) -> ObjectId {
        self.inner.created.fetch_add(1, Ordering::AcqRel);
        ObjectId(self.inner.next_object_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn record_finalized(&self, id: ObjectId) {
        self.inner.finalized.fetch_add(1, Ordering::AcqRel);
        if self.inner.config.trace_finalization {
            log::trace!("finalized {id}");
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(LifetimeConfig::default())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Objects created since the registry was built.
    pub created: u64,
    /// Objects whose release hook has run.
    pub finalized: u64,
    /// Objects created and not yet finalized.
    pub live: u64,
}
