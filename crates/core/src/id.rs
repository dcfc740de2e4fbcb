//! Identifiers for objects and pools.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry-unique identifier of a reference-counted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Identifier of a deferred-release pool.
///
/// `stack` names the owning pool stack and `serial` increases with every push
/// on that stack, so a destroyed pool's id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId {
    pub stack: u64,
    pub serial: u64,
}

impl PoolId {
    pub fn new(stack: u64, serial: u64) -> Self {
        Self { stack, serial }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}.{}", self.stack, self.serial)
    }
}
