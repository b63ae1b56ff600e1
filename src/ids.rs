//! Lightweight identifiers used throughout the plan graph.
//!
//! [`OperatorId`] mirrors the teacher crate's `NodeId`: a small, `Copy`,
//! hashable handle assigned sequentially as operators are inserted into a
//! [`Plan`](crate::plan::Plan). [`SlotIndex`] distinguishes the input/output
//! slots of a single operator; [`PlatformId`] names an execution backend.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique numeric identifier for an operator within a [`Plan`](crate::plan::Plan).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct OperatorId(u64);

impl OperatorId {
    /// Create a new `OperatorId` (used internally by the plan builder).
    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value. Useful for debugging/ordering.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Process-wide unique identity for a [`Plan`](crate::plan::Plan), distinct
/// from its `OperatorId`s.
///
/// `OperatorId`s are allocated from zero per-`Plan`, so a composite's inner
/// plan and its enclosing plan routinely both contain `OperatorId(0)`.
/// Anything that needs to key a registry by operator across plan boundaries
/// (e.g. [`crate::cardinality::CardinalityEngine`]'s estimator map) must pair
/// the `OperatorId` with its owning plan's `PlanId` to avoid collisions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PlanId(u64);

impl PlanId {
    /// Allocate a fresh, never-reused `PlanId`.
    pub(crate) fn new_unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan#{}", self.0)
    }
}

/// Index of an input or output slot on a single operator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SlotIndex(pub u32);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A specific output slot of a specific operator: `(operator, index)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutputRef {
    pub operator: OperatorId,
    pub slot: SlotIndex,
}

/// A specific input slot of a specific operator: `(operator, index)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InputRef {
    pub operator: OperatorId,
    pub slot: SlotIndex,
}

/// Identity of an execution backend ("platform" in spec vocabulary).
///
/// Kept as an interned string rather than an enum: the core never knows the
/// closed set of platforms in advance (backend adapters register themselves).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct PlatformId(pub String);

impl PlatformId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlatformId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_id_display() {
        assert_eq!(OperatorId::new(7).to_string(), "op#7");
        assert_eq!(OperatorId::new(7).raw(), 7);
    }

    #[test]
    fn platform_id_from_str() {
        let p: PlatformId = "local-engine".into();
        assert_eq!(p.to_string(), "local-engine");
    }
}
