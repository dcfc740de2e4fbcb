//! Uncounted references.
//!
//! A [`WeakRef`] does not keep its object alive. It is only safe to act on the
//! object after [`WeakRef::upgrade`] succeeds, which takes a fresh strong
//! reference that the caller then owns and must release.

use crate::id::ObjectId;
use crate::object::{ObjectCell, ObjectRef};
use std::fmt;
use std::sync::Arc;

/// Weak (uncounted) reference to a reference-counted object.
pub struct WeakRef<T> {
    cell: Arc<ObjectCell<T>>,
}

impl<T> WeakRef<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(cell: Arc<ObjectCell<T>>) -> Self {
        Self { cell }
    }

    /// Retains the object if it is still alive.
    ///
    /// Returns `None` once the count has reached zero; a finalized object is
    /// never resurrected.
    pub fn upgrade(&self) -> Option<ObjectRef<T>> {
        self.cell.try_increment()?;
        Some(ObjectRef::from_cell(Arc::clone(&self.cell)))
    }
}

impl<T> WeakRef<T> {
    /// Identifier of the referenced object.
    pub fn id(&self) -> ObjectId {
        self.cell.id()
    }

    /// Returns `true` until the object is finalized.
    pub fn is_alive(&self) -> bool {
        !self.cell.is_released()
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("id", &self.cell.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}
