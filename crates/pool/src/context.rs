//! Thread execution context.
//!
//! Each thread that issues deferred releases owns one [`ThreadContext`]. The
//! context is an ordinary value rather than a thread-local: code that needs
//! the current pool takes the context as an argument, and tests can build
//! several contexts in one thread to model several threads.

use crate::pool::PoolHandle;
use crate::stack::{PoolStack, SweepReport};
use retainer_core::{LifetimeResult, ObjectRef, Registry};

/// Per-thread state: the pool stack and the registry it reports to.
pub struct ThreadContext {
    stack: PoolStack,
}

impl ThreadContext {
    /// Creates a context with an empty pool stack.
    ///
    /// A pool must be pushed before the first deferred release.
    pub fn new(registry: &Registry) -> Self {
        Self {
            stack: PoolStack::new(registry.clone()),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.stack.registry()
    }

    pub fn stack(&self) -> &PoolStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut PoolStack {
        &mut self.stack
    }

    /// Pushes a pool onto this thread's stack.
    pub fn push_pool(&mut self) -> PoolHandle {
        self.stack.push()
    }

    /// The pool that currently receives deferred releases.
    pub fn current_pool(&self) -> LifetimeResult<PoolHandle> {
        self.stack.current_top()
    }

    /// Destroys `pool` and every pool pushed after it.
    pub fn destroy_pool(&mut self, pool: PoolHandle) -> LifetimeResult<SweepReport> {
        self.stack.destroy(pool)
    }

    /// Destroys `pool` like [`destroy_pool`](ThreadContext::destroy_pool),
    /// keeping sweep violations in the returned report.
    pub fn destroy_pool_with_report(&mut self, pool: PoolHandle) -> LifetimeResult<SweepReport> {
        self.stack.destroy_with_report(pool)
    }

    /// Hands one release of `object` to the current pool.
    ///
    /// The count is left untouched until the pool is swept, so the object
    /// stays usable for the rest of the calling scope.
    pub fn release_deferred<T>(&mut self, object: &ObjectRef<T>) -> LifetimeResult<PoolHandle>
    where
        T: Send + Sync + 'static,
    {
        object.ensure_live("release_deferred")?;
        self.stack.register_top(object.as_release())
    }

    /// Runs `body` inside a fresh pool and destroys the pool afterwards.
    ///
    /// Pools `body` pushed and forgot to destroy are swept with it.
    pub fn with_pool<R>(&mut self, body: impl FnOnce(&mut ThreadContext) -> R) -> LifetimeResult<R> {
        let pool = self.push_pool();
        let value = body(self);
        self.destroy_pool(pool)?;
        Ok(value)
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        if self.stack.is_empty() {
            return;
        }

        let depth = self.stack.depth();
        let pending = self.stack.pending();
        if !self.registry().config().drain_on_drop || std::thread::panicking() {
            log::warn!(
                "thread context dropped with {depth} pool(s) still pushed; {pending} deferred release(s) leaked"
            );
            return;
        }

        log::warn!("thread context dropped with {depth} pool(s) still pushed; draining {pending} deferred release(s)");
        let report = self.stack.sweep_from(0);
        log::debug!(
            "drained {} pool(s), {} object(s) finalized, {} violation(s)",
            report.pools_destroyed(),
            report.objects_finalized(),
            report.violations.len()
        );
    }
}

/// Deferred release as a method on object handles.
pub trait DeferredRelease: Sized {
    /// Hands one release to the context's current pool.
    fn release_deferred(&self, context: &mut ThreadContext) -> LifetimeResult<()>;

    /// Like [`release_deferred`](DeferredRelease::release_deferred), returning
    /// the handle so producers can write `registry.create(x).autorelease(ctx)`.
    fn autorelease(self, context: &mut ThreadContext) -> LifetimeResult<Self> {
        self.release_deferred(context)?;
        Ok(self)
    }
}

impl<T> DeferredRelease for ObjectRef<T>
where
    T: Send + Sync + 'static,
{
    fn release_deferred(&self, context: &mut ThreadContext) -> LifetimeResult<()> {
        context.release_deferred(self).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retainer_core::{LifetimeConfig, LifetimeError};

    fn registry() -> Registry {
        Registry::new(LifetimeConfig::reporting())
    }

    #[test]
    fn test_deferred_release_does_not_decrement() {
        let registry = registry();
        let mut context = ThreadContext::new(&registry);
        let pool = context.push_pool();
        let object = registry.create(10u32);

        object.release_deferred(&mut context).unwrap();

        assert_eq!(object.retain_count(), 1);
        assert_eq!(*object.payload().unwrap(), 10);

        let report = context.destroy_pool(pool).unwrap();
        assert_eq!(report.finalized, vec![object.id()]);
        assert!(object.is_released());
    }

    #[test]
    fn test_deferred_release_without_pool() {
        let registry = registry();
        let mut context = ThreadContext::new(&registry);
        let object = registry.create(10u32);

        assert_eq!(
            object.release_deferred(&mut context),
            Err(LifetimeError::NoActivePool)
        );
        assert_eq!(object.retain_count(), 1);
    }

    #[test]
    fn test_autorelease_returns_handle() {
        let registry = registry();
        let mut context = ThreadContext::new(&registry);

        let value = context
            .with_pool(|context| {
                let object = registry.create(String::from("made")).autorelease(context).unwrap();
                object.payload().unwrap().clone()
            })
            .unwrap();

        assert_eq!(value, "made");
        assert_eq!(registry.live_objects(), 0);
        assert!(context.stack().is_empty());
    }

    #[test]
    fn test_drop_drains_forgotten_pools() {
        let registry = registry();
        let object = registry.create(1u8);
        {
            let mut context = ThreadContext::new(&registry);
            context.push_pool();
            object.release_deferred(&mut context).unwrap();
        }
        assert!(object.is_released());
    }

    #[test]
    fn test_drop_leaks_when_draining_disabled() {
        let registry = Registry::new(LifetimeConfig {
            drain_on_drop: false,
            ..LifetimeConfig::reporting()
        });
        let object = registry.create(1u8);
        {
            let mut context = ThreadContext::new(&registry);
            context.push_pool();
            object.release_deferred(&mut context).unwrap();
        }
        assert!(!object.is_released());
        assert_eq!(object.retain_count(), 1);
    }
}
