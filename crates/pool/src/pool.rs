//! A single deferred-release pool.
//!
//! A pool is an ordered list of release obligations. Each entry stands for one
//! deferred release; registering the same object twice yields two decrements
//! when the pool is swept.

use retainer_core::{LifetimeError, LifetimeResult, ObjectId, PoolId, Release};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a pool. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolState {
    /// Accepting registrations.
    Active,
    /// Processing its entries.
    Sweeping,
    /// Swept and removed from its stack.
    Destroyed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Active => write!(f, "active"),
            PoolState::Sweeping => write!(f, "sweeping"),
            PoolState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Handle naming a pool and its position in the owning stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    id: PoolId,
    depth: usize,
}

impl PoolHandle {
    pub(crate) fn new(id: PoolId, depth: usize) -> Self {
        Self { id, depth }
    }

    /// Identifier of the pool.
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Index of the pool in its stack, zero being the bottom.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.depth)
    }
}

/// Outcome of sweeping one pool.
#[derive(Debug, Clone)]
pub struct PoolSweep {
    /// The swept pool.
    pub pool: PoolId,
    /// Number of entries decremented.
    pub entries: usize,
    /// Objects finalized by this sweep, in registration order.
    pub finalized: Vec<ObjectId>,
    /// Violations hit while sweeping, in registration order.
    pub violations: Vec<LifetimeError>,
}

/// Deferred-release pool.
pub struct DeferredReleasePool {
    id: PoolId,
    state: PoolState,
    entries: Vec<Arc<dyn Release>>,
}

impl DeferredReleasePool {
    /// Creates an empty, active pool.
    pub fn new(id: PoolId) -> Self {
        Self {
            id,
            state: PoolState::Active,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Number of pending release obligations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Objects registered so far, in registration order. Duplicates are kept.
    pub fn registered(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.iter().map(|entry| entry.object_id())
    }

    /// Appends one release obligation for `entry`.
    pub fn register(&mut self, entry: Arc<dyn Release>) -> LifetimeResult<()> {
        if self.state != PoolState::Active {
            return Err(LifetimeError::dangling(self.id));
        }
        if entry.is_released() || entry.retain_count() == 0 {
            return Err(LifetimeError::use_after_release(entry.object_id(), "register"));
        }

        log::trace!("{} registered into {}", entry.object_id(), self.id);
        self.entries.push(entry);
        Ok(())
    }

    /// Decrements every entry in registration order and marks the pool destroyed.
    ///
    /// A violation on one entry does not stop the sweep; all of them are
    /// collected in the returned [`PoolSweep`].
    pub fn sweep(&mut self) -> PoolSweep {
        debug_assert_eq!(self.state, PoolState::Active, "{} swept twice", self.id);
        self.state = PoolState::Sweeping;

        let entries = std::mem::take(&mut self.entries);
        let mut sweep = PoolSweep {
            pool: self.id,
            entries: entries.len(),
            finalized: Vec::new(),
            violations: Vec::new(),
        };

        for entry in entries {
            match entry.release() {
                Ok(true) => sweep.finalized.push(entry.object_id()),
                Ok(false) => {}
                Err(err) => sweep.violations.push(err),
            }
        }

        self.state = PoolState::Destroyed;
        log::debug!(
            "swept {}: {} entries, {} finalized",
            self.id,
            sweep.entries,
            sweep.finalized.len()
        );
        sweep
    }
}

impl fmt::Debug for DeferredReleasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredReleasePool")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("entries", &self.entries.len())
            .finish()
    }
}
