//! Entity identifiers for the event-grounded graph.
//!
//! Objects, rooms, events and edges share a single identifier space. Every
//! entity is identified by an [`EntityId`]; the [`IdAllocator`] owned by the
//! graph hands them out in strictly increasing order and never reuses one.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};

/// Unique, niche-optimized identifier for a graph entity.
///
/// Uses `NonZeroU64` so that `Option<EntityId>` is the same size as `EntityId`.
/// The allocator pre-increments from zero, so `0` is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    /// Create an `EntityId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(EntityId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier allocator.
///
/// Holds the last issued value; [`IdAllocator::next_id`] pre-increments, so a
/// fresh allocator issues `1, 2, 3, ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    last: u64,
}

impl IdAllocator {
    /// Create an allocator whose first id is 1.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Create an allocator that continues after `max_issued`.
    ///
    /// Used when restoring a graph from a snapshot: the next id is `max_issued + 1`.
    pub fn resuming_after(max_issued: u64) -> Self {
        Self { last: max_issued }
    }

    /// Allocate the next id.
    pub fn next_id(&mut self) -> GraphResult<EntityId> {
        let raw = self
            .last
            .checked_add(1)
            .ok_or(GraphError::IdSpaceExhausted)?;
        self.last = raw;
        EntityId::new(raw).ok_or(GraphError::IdSpaceExhausted)
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.last.saturating_add(1)
    }

    /// The highest id issued so far (0 if none).
    pub fn last_issued(&self) -> u64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<EntityId>>(),
            std::mem::size_of::<EntityId>()
        );
    }

    #[test]
    fn entity_id_zero_is_none() {
        assert!(EntityId::new(0).is_none());
        assert_eq!(EntityId::new(42).unwrap().get(), 42);
    }

    #[test]
    fn allocator_pre_increments() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.peek_next(), 1);
        assert_eq!(alloc.next_id().unwrap().get(), 1);
        assert_eq!(alloc.next_id().unwrap().get(), 2);
        assert_eq!(alloc.last_issued(), 2);
    }

    #[test]
    fn allocator_resumes_after_max() {
        let mut alloc = IdAllocator::resuming_after(99);
        assert_eq!(alloc.next_id().unwrap().get(), 100);
    }

    #[test]
    fn allocator_reports_exhaustion() {
        let mut alloc = IdAllocator::resuming_after(u64::MAX);
        assert!(matches!(alloc.next_id(), Err(GraphError::IdSpaceExhausted)));
        assert_eq!(alloc.last_issued(), u64::MAX);
    }

    #[test]
    fn entity_id_serializes_as_plain_integer() {
        let id = EntityId::new(5).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "5");
        let back: EntityId = serde_json::from_str("5").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<EntityId>("0").is_err());
    }
}
