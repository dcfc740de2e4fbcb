//! Error types for ownership violations

use crate::id::{ObjectId, PoolId};
use thiserror::Error;

/// Result type alias for lifetime operations.
pub type LifetimeResult<T> = Result<T, LifetimeError>;

/// Ownership-discipline violations.
///
/// Every variant is a programmer error. Whether it terminates the caller or is
/// handed back depends on the registry's [`MisusePolicy`](retainer_config::MisusePolicy).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifetimeError {
    /// A counter was decremented below zero, or a finalized object was swept.
    #[error("{object} released more times than it was owned")]
    DoubleRelease { object: ObjectId },

    /// A deferred release was issued with no pool on the thread's stack.
    #[error("Deferred release with no active pool on this thread")]
    NoActivePool,

    /// An operation touched an object after its finalization.
    #[error("{operation} on {object} after it was released")]
    UseAfterRelease {
        object: ObjectId,
        operation: &'static str,
    },

    /// An object was registered into a pool that has been destroyed.
    #[error("Registration into destroyed {pool}")]
    DanglingPoolRegistration { pool: PoolId },

    /// An object was registered into a live pool that is not the top of its stack.
    #[error("Registration into {pool}, which is not the top of its stack")]
    NotTopPool { pool: PoolId },

    /// A destroy call named a pool that is not on this stack.
    #[error("{pool} is not on this pool stack")]
    StalePool { pool: PoolId },
}

impl LifetimeError {
    /// Helper for creating a double-release error.
    pub fn double_release(object: ObjectId) -> Self {
        Self::DoubleRelease { object }
    }

    /// Helper for creating a use-after-release error for `operation`.
    pub fn use_after_release(object: ObjectId, operation: &'static str) -> Self {
        Self::UseAfterRelease { object, operation }
    }

    /// Helper for creating a dangling-registration error.
    pub fn dangling(pool: PoolId) -> Self {
        Self::DanglingPoolRegistration { pool }
    }

    /// Helper for creating a registration-below-top error.
    pub fn not_top(pool: PoolId) -> Self {
        Self::NotTopPool { pool }
    }

    /// Helper for creating a stale-pool error.
    pub fn stale(pool: PoolId) -> Self {
        Self::StalePool { pool }
    }

    /// The object involved, if any.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Self::DoubleRelease { object } | Self::UseAfterRelease { object, .. } => Some(*object),
            _ => None,
        }
    }
}
