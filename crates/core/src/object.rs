//! Reference-counted objects.
//!
//! An object starts life with a count of one, owned by whoever created it.
//! [`ObjectRef::retain`] adds an owner and [`ObjectRef::release`] removes one;
//! the release that takes the count to zero runs the object's release hook and
//! marks it released. Handles themselves are uncounted: cloning an
//! [`ObjectRef`] copies the pointer, not the ownership.
//!
//! The counter is shared between threads. Every mutation is a compare-exchange
//! so exactly one decrement observes the transition from one to zero, and no
//! increment can move a count away from zero.

use crate::error::{LifetimeError, LifetimeResult};
use crate::id::ObjectId;
use crate::registry::Registry;
use crate::weak::WeakRef;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Action run exactly once when an object's count reaches zero.
pub type ReleaseHook<T> = Box<dyn FnOnce(&T) + Send>;

/// Type-erased release capability, used by pools to hold objects of any payload type.
pub trait Release: Send + Sync {
    /// Identifier of the underlying object.
    fn object_id(&self) -> ObjectId;

    /// Current reference count.
    fn retain_count(&self) -> usize;

    /// Returns `true` once the object has been finalized.
    fn is_released(&self) -> bool;

    /// Decrements the count, finalizing on zero.
    ///
    /// Returns `Ok(true)` if this call finalized the object. The misuse policy
    /// is not applied here; callers pass the result through
    /// [`Registry::enforce`].
    fn release(&self) -> LifetimeResult<bool>;
}

pub(crate) struct ObjectCell<T> {
    id: ObjectId,
    count: AtomicUsize,
    released: AtomicBool,
    hook: Mutex<Option<ReleaseHook<T>>>,
    registry: Registry,
    payload: T,
}

impl<T> ObjectCell<T> {
    /// Increments unless the count already reached zero.
    pub(crate) fn try_increment(&self) -> Option<usize> {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return None;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    fn decrement(&self) -> LifetimeResult<bool> {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return Err(LifetimeError::double_release(self.id));
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current != 1 {
            return Ok(false);
        }

        // Synchronize with every earlier decrement before tearing down.
        fence(Ordering::Acquire);
        self.finalize()?;
        Ok(true)
    }

    fn finalize(&self) -> LifetimeResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(LifetimeError::double_release(self.id));
        }

        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook(&self.payload);
        }
        self.registry.record_finalized(self.id);
        Ok(())
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Released, or between the final decrement and the hook.
    fn is_dead(&self) -> bool {
        self.is_released() || self.count.load(Ordering::Acquire) == 0
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }
}

impl<T> Release for ObjectCell<T>
where
    T: Send + Sync,
{
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn retain_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn is_released(&self) -> bool {
        ObjectCell::is_released(self)
    }

    fn release(&self) -> LifetimeResult<bool> {
        self.decrement()
    }
}

/// Uncounted handle to a reference-counted object.
pub struct ObjectRef<T> {
    cell: Arc<ObjectCell<T>>,
}

impl<T> ObjectRef<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        registry: Registry,
        id: ObjectId,
        payload: T,
        hook: Option<ReleaseHook<T>>,
    ) -> Self {
        Self {
            cell: Arc::new(ObjectCell {
                id,
                count: AtomicUsize::new(1),
                released: AtomicBool::new(false),
                hook: Mutex::new(hook),
                registry,
                payload,
            }),
        }
    }

    pub(crate) fn from_cell(cell: Arc<ObjectCell<T>>) -> Self {
        Self { cell }
    }

    /// Adds an owner. Returns a handle to the same object for chaining.
    pub fn retain(&self) -> LifetimeResult<ObjectRef<T>> {
        let result = match self.cell.try_increment() {
            Some(_) => Ok(self.clone()),
            None => Err(LifetimeError::use_after_release(self.cell.id, "retain")),
        };
        self.cell.registry.enforce(result)
    }

    /// Removes an owner immediately, finalizing the object if it was the last.
    pub fn release(&self) -> LifetimeResult<()> {
        let result = self.cell.decrement().map(|_| ());
        self.cell.registry.enforce(result)
    }

    /// Borrows the payload of a live object.
    pub fn payload(&self) -> LifetimeResult<&T> {
        let result = if self.cell.is_dead() {
            Err(LifetimeError::use_after_release(self.cell.id, "payload access"))
        } else {
            Ok(&self.cell.payload)
        };
        self.cell.registry.enforce(result)
    }

    /// Creates an uncounted weak reference.
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef::new(Arc::clone(&self.cell))
    }

    /// Type-erased release capability for this object.
    pub fn as_release(&self) -> Arc<dyn Release> {
        Arc::clone(&self.cell) as Arc<dyn Release>
    }

    /// Fails with `UseAfterRelease` if the object was finalized.
    ///
    /// Used by callers that must validate an object before taking an action
    /// on its behalf, such as registering it with a pool.
    pub fn ensure_live(&self, operation: &'static str) -> LifetimeResult<()> {
        let result = if self.cell.is_dead() {
            Err(LifetimeError::use_after_release(self.cell.id, operation))
        } else {
            Ok(())
        };
        self.cell.registry.enforce(result)
    }
}

impl<T> ObjectRef<T> {
    /// Identifier of this object.
    pub fn id(&self) -> ObjectId {
        self.cell.id
    }

    /// Current reference count. Zero once released.
    pub fn retain_count(&self) -> usize {
        self.cell.count.load(Ordering::Acquire)
    }

    /// Returns `true` once the release hook has run.
    pub fn is_released(&self) -> bool {
        self.cell.is_released()
    }

    /// The registry that created this object.
    pub fn registry(&self) -> &Registry {
        &self.cell.registry
    }

    /// Returns `true` if both handles point at the same object.
    pub fn ptr_eq(&self, other: &ObjectRef<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.cell.id)
            .field("count", &self.retain_count())
            .field("released", &self.is_released())
            .finish()
    }
}
