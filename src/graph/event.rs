//! Event index: event nodes with time and location queries.

use crate::error::{GraphError, GraphResult};
use crate::id::EntityId;
use crate::ordered::OrderedMap;
use crate::temporal::{TimeRange, Timestamp};

use super::EventNode;

/// Owner of event nodes, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct EventIndex {
    events: OrderedMap<EntityId, EventNode>,
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event node.
    ///
    /// Rejects an id that is already present and an event that ends before it starts.
    pub fn add_event(&mut self, event: EventNode) -> GraphResult<()> {
        if self.events.contains_key(&event.id) {
            return Err(GraphError::DuplicateId { id: event.id.get() });
        }
        check_event(&event)?;
        self.events.insert(event.id, event);
        Ok(())
    }

    /// Bulk overwrite of the event set.
    pub fn replace_event_nodes(&mut self, events: OrderedMap<EntityId, EventNode>) {
        self.events = events;
    }

    /// Events whose `[start, end]` lies entirely inside `range` and whose
    /// location is one of `locations` (any location when `None`).
    ///
    /// Containment, not overlap: an event straddling a bound is excluded.
    pub fn get_events(&self, range: &TimeRange, locations: Option<&[String]>) -> Vec<&EventNode> {
        self.events
            .values()
            .filter(|e| e.is_in_time_range(range) && e.is_in_location(locations))
            .collect()
    }

    /// Events involving at least one of `object_ids`.
    pub fn get_events_by_objects(&self, object_ids: &[EntityId]) -> Vec<&EventNode> {
        self.events
            .values()
            .filter(|e| e.involved_object_ids.iter().any(|id| object_ids.contains(id)))
            .collect()
    }

    /// First event, in insertion order, whose span contains `t`.
    pub fn get_event_by_timestamp(&self, t: Timestamp) -> Option<&EventNode> {
        self.events.values().find(|e| e.start <= t && t <= e.end)
    }

    /// Look up an event by id; a miss is logged and returns `None`.
    pub fn get_event_by_id(&self, id: EntityId) -> Option<&EventNode> {
        let found = self.events.get(&id);
        if found.is_none() {
            tracing::warn!(event = %id, "event node not found");
        }
        found
    }

    pub fn contains_event(&self, id: EntityId) -> bool {
        self.events.contains_key(&id)
    }

    /// `(earliest start, latest end)` over all held events.
    pub fn get_time_range(&self) -> Option<(Timestamp, Timestamp)> {
        let start = self.events.values().map(|e| e.start).min()?;
        let end = self.events.values().map(|e| e.end).max()?;
        Some((start, end))
    }

    /// Distinct event locations in first-seen order.
    pub fn get_locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = Vec::new();
        for event in self.events.values() {
            if !locations.contains(&event.location) {
                locations.push(event.location.clone());
            }
        }
        locations
    }

    pub fn events(&self) -> &OrderedMap<EntityId, EventNode> {
        &self.events
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.events.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl std::fmt::Display for EventIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for event in self.events.values() {
            write!(f, "{event}")?;
        }
        Ok(())
    }
}

/// Per-node checks shared by [`EventIndex::add_event`] and bulk loading.
pub(crate) fn check_event(event: &EventNode) -> GraphResult<()> {
    if event.start > event.end {
        return Err(GraphError::InvertedEvent {
            id: event.id.get(),
            start_ns: event.start.as_nanos(),
            end_ns: event.end.as_nanos(),
        });
    }
    Ok(())
}
