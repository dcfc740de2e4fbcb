//! Per-thread stack of deferred-release pools.
//!
//! Pools are kept in a vector ordered from bottom to top. A [`PoolHandle`]
//! records the pool's index, so destroying a pool together with everything
//! pushed after it is a truncate from that index. The pools removed this way
//! are swept top to bottom.

use crate::pool::{DeferredReleasePool, PoolHandle, PoolState, PoolSweep};
use retainer_core::{LifetimeError, LifetimeResult, ObjectId, PoolId, Registry, Release};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// Summary of a destroy call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Pools destroyed, in sweep order (top first).
    pub pools: Vec<PoolId>,
    /// Release obligations processed across all pools.
    pub entries_swept: usize,
    /// Objects finalized, in sweep order.
    pub finalized: Vec<ObjectId>,
    /// Violations hit while sweeping, in sweep order.
    #[serde(skip)]
    pub violations: Vec<LifetimeError>,
}

impl SweepReport {
    /// Number of pools destroyed.
    pub fn pools_destroyed(&self) -> usize {
        self.pools.len()
    }

    /// Number of objects finalized.
    pub fn objects_finalized(&self) -> usize {
        self.finalized.len()
    }

    /// Returns `true` if every entry was released cleanly.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn absorb(&mut self, sweep: PoolSweep) {
        for err in &sweep.violations {
            log::error!("violation while sweeping {}: {err}", sweep.pool);
        }
        self.pools.push(sweep.pool);
        self.entries_swept += sweep.entries;
        self.finalized.extend(sweep.finalized);
        self.violations.extend(sweep.violations);
    }
}

/// LIFO stack of pools owned by one thread.
///
/// The stack is `!Send`: pools stay on the thread that pushed them and are
/// never synchronized.
pub struct PoolStack {
    id: u64,
    registry: Registry,
    pools: Vec<DeferredReleasePool>,
    next_serial: u64,
    _thread_bound: PhantomData<*const ()>,
}

impl PoolStack {
    /// Creates an empty stack.
    pub fn new(registry: Registry) -> Self {
        Self {
            id: registry.next_stack_id(),
            registry,
            pools: Vec::new(),
            next_serial: 0,
            _thread_bound: PhantomData,
        }
    }

    /// Identifier of this stack; part of every [`PoolId`] it hands out.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of pools currently pushed.
    pub fn depth(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pending release obligations across every pool on the stack.
    pub fn pending(&self) -> usize {
        self.pools.iter().map(DeferredReleasePool::len).sum()
    }

    /// Pushes a new pool and returns its handle.
    pub fn push(&mut self) -> PoolHandle {
        let id = PoolId::new(self.id, self.next_serial);
        self.next_serial += 1;

        let handle = PoolHandle::new(id, self.pools.len());
        self.pools.push(DeferredReleasePool::new(id));
        log::debug!("pushed {handle}");
        handle
    }

    /// Returns the pool that receives deferred releases.
    pub fn current_top(&self) -> LifetimeResult<PoolHandle> {
        let result = self
            .top_handle()
            .ok_or(LifetimeError::NoActivePool);
        self.registry.enforce(result)
    }

    /// Returns the pool identified by `handle` if it is still on this stack.
    pub fn get(&self, handle: PoolHandle) -> Option<&DeferredReleasePool> {
        self.position(handle).map(|index| &self.pools[index])
    }

    /// Lifecycle state of the pool identified by `handle`.
    ///
    /// Returns `None` for handles issued by another stack.
    pub fn state_of(&self, handle: PoolHandle) -> Option<PoolState> {
        if let Some(pool) = self.get(handle) {
            return Some(pool.state());
        }
        let id = handle.id();
        (id.stack == self.id && id.serial < self.next_serial).then_some(PoolState::Destroyed)
    }

    /// Registers one release obligation with the pool identified by `handle`.
    ///
    /// Only the top pool accepts registrations; a pool buried under later
    /// pushes is rejected with `NotTopPool`.
    pub fn register(&mut self, handle: PoolHandle, entry: Arc<dyn Release>) -> LifetimeResult<()> {
        let result = match self.position(handle) {
            Some(index) if index + 1 == self.pools.len() => self.pools[index].register(entry),
            Some(_) => Err(LifetimeError::not_top(handle.id())),
            None => Err(LifetimeError::dangling(handle.id())),
        };
        self.registry.enforce(result)
    }

    /// Registers one release obligation with the top pool.
    pub fn register_top(&mut self, entry: Arc<dyn Release>) -> LifetimeResult<PoolHandle> {
        let handle = self.current_top()?;
        self.register(handle, entry)?;
        Ok(handle)
    }

    /// Destroys the pool identified by `handle` and every pool pushed after it.
    ///
    /// Pools are swept top to bottom; within a pool, entries are released in
    /// registration order. Violations found while sweeping do not interrupt
    /// the sweep; the first one is reported once every pool has been swept.
    pub fn destroy(&mut self, handle: PoolHandle) -> LifetimeResult<SweepReport> {
        let result = self.remove_from(handle).and_then(|report| {
            match report.violations.first().cloned() {
                Some(err) => Err(err),
                None => Ok(report),
            }
        });
        self.registry.enforce(result)
    }

    /// Like [`destroy`](PoolStack::destroy), but sweep violations come back
    /// in [`SweepReport::violations`] alongside what was finalized.
    ///
    /// A missing pool is still an error, and under the abort policy so is any
    /// sweep violation.
    pub fn destroy_with_report(&mut self, handle: PoolHandle) -> LifetimeResult<SweepReport> {
        let result = self.remove_from(handle);
        let report = self.registry.enforce(result)?;
        if let Some(err) = report.violations.first() {
            if self.registry.config().misuse_policy.is_fatal() {
                self.registry.enforce::<()>(Err(err.clone()))?;
            }
        }
        Ok(report)
    }

    /// Destroys the top pool.
    pub fn pop(&mut self) -> LifetimeResult<SweepReport> {
        let handle = self.current_top()?;
        self.destroy(handle)
    }

    /// Sweeps every pool from `index` upwards without applying the misuse policy.
    pub(crate) fn sweep_from(&mut self, index: usize) -> SweepReport {
        let mut doomed = self.pools.split_off(index);
        let mut report = SweepReport::default();

        while let Some(mut pool) = doomed.pop() {
            report.absorb(pool.sweep());
        }
        report
    }

    fn remove_from(&mut self, handle: PoolHandle) -> LifetimeResult<SweepReport> {
        let index = self
            .position(handle)
            .ok_or_else(|| LifetimeError::stale(handle.id()))?;
        let above = self.pools.len() - index - 1;
        if above > 0 && self.registry.config().warn_on_cascade {
            log::warn!("destroying {handle} also destroys {above} pool(s) pushed after it");
        }
        Ok(self.sweep_from(index))
    }

    fn top_handle(&self) -> Option<PoolHandle> {
        let depth = self.pools.len().checked_sub(1)?;
        Some(PoolHandle::new(self.pools[depth].id(), depth))
    }

    fn position(&self, handle: PoolHandle) -> Option<usize> {
        let index = handle.depth();
        self.pools
            .get(index)
            .filter(|pool| pool.id() == handle.id())
            .map(|_| index)
    }
}

impl std::fmt::Debug for PoolStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolStack")
            .field("id", &self.id)
            .field("pools", &self.pools)
            .finish()
    }
}
