//! The event-grounded graph: spatial index + event index + edge list.
//!
//! [`EventGroundedGraph`] owns identifier allocation. Every object, room, event
//! and edge draws from the same counter, so ids are unique across kinds.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{GraphError, GraphResult, SnapshotResult};
use crate::export::GraphSnapshot;
use crate::id::{EntityId, IdAllocator};
use crate::ingest::{CameraModel, EventObservation, IngestResult};
use crate::ordered::OrderedMap;

use super::event::{EventIndex, check_event};
use super::matcher::ObjectMatcher;
use super::spatial::{SpatialIndex, check_object};
use super::{EventNode, EventObjectEdge, ObjectNode, Point3, RoomNode};

/// Name and caption of an object, as offered to the oracle when it picks nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSummary {
    pub name: String,
    #[serde(rename = "description")]
    pub caption: Option<String>,
}

/// Start time and description of an event, as offered to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub start: String,
    pub description: String,
}

/// Counts and extent of a graph, for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub objects: usize,
    pub rooms: usize,
    pub events: usize,
    pub edges: usize,
    pub last_id: u64,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} objects, {} rooms, {} events, {} edges (last id {})",
            self.objects, self.rooms, self.events, self.edges, self.last_id
        )
    }
}

/// Objects, rooms and events joined by event→object edges.
#[derive(Debug, Clone)]
pub struct EventGroundedGraph {
    spatial: SpatialIndex,
    events: EventIndex,
    edges: Vec<EventObjectEdge>,
    ids: IdAllocator,
}

impl EventGroundedGraph {
    /// Create an empty graph resolving object identity with `matcher`.
    pub fn new(matcher: Arc<dyn ObjectMatcher>) -> Self {
        Self {
            spatial: SpatialIndex::new(matcher),
            events: EventIndex::new(),
            edges: Vec::new(),
            ids: IdAllocator::new(),
        }
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn events(&self) -> &EventIndex {
        &self.events
    }

    pub fn edges(&self) -> &[EventObjectEdge] {
        &self.edges
    }

    pub fn id_allocator(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.spatial.object_count() == 0 && self.events.is_empty() && self.edges.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            objects: self.spatial.object_count(),
            rooms: self.spatial.room_count(),
            events: self.events.len(),
            edges: self.edges.len(),
            last_id: self.ids.last_issued(),
        }
    }

    /// Allocate a fresh identifier.
    pub fn next_id(&mut self) -> GraphResult<EntityId> {
        self.ids.next_id()
    }

    fn id_in_use(&self, id: EntityId) -> bool {
        self.spatial.contains_object(id)
            || self.spatial.rooms().contains_key(&id)
            || self.events.contains_event(id)
            || self.edges.iter().any(|e| e.id == id)
    }

    /// Keep the allocator ahead of an id that was assigned outside it.
    fn observe_id(&mut self, id: EntityId) {
        if id.get() > self.ids.last_issued() {
            self.ids = IdAllocator::resuming_after(id.get());
        }
    }

    /// Add an object node built by the caller.
    pub fn add_object(&mut self, node: ObjectNode) -> GraphResult<()> {
        if self.id_in_use(node.id) {
            return Err(GraphError::DuplicateId { id: node.id.get() });
        }
        let id = node.id;
        self.spatial.add_object(node)?;
        self.observe_id(id);
        Ok(())
    }

    /// Add an event node built by the caller.
    pub fn add_event(&mut self, event: EventNode) -> GraphResult<()> {
        if self.id_in_use(event.id) {
            return Err(GraphError::DuplicateId { id: event.id.get() });
        }
        let id = event.id;
        self.events.add_event(event)?;
        self.observe_id(id);
        Ok(())
    }

    /// Add an edge. Both endpoints must already exist.
    pub fn add_edge(&mut self, edge: EventObjectEdge) -> GraphResult<()> {
        if self.id_in_use(edge.id) {
            return Err(GraphError::DuplicateId { id: edge.id.get() });
        }
        if !self.events.contains_event(edge.source_node_id) {
            return Err(dangling(&edge, edge.source_node_id, "event"));
        }
        if !self.spatial.contains_object(edge.target_node_id) {
            return Err(dangling(&edge, edge.target_node_id, "object"));
        }
        self.observe_id(edge.id);
        self.edges.push(edge);
        Ok(())
    }

    /// Ingest one observed clip.
    ///
    /// Creates one event node and, per object of interest, either a new object
    /// node or a merge into the matching known one, plus one edge carrying the
    /// object's role. Involved ids and edge targets are the resolved ids.
    ///
    /// Ids are allocated in the order event, then `(candidate object, edge)` per
    /// object. Candidate ids of merged objects stay consumed. All fallible work
    /// happens before the graph is touched, so an error leaves it unchanged.
    pub fn add_event_from_observation(
        &mut self,
        observation: &EventObservation,
        camera: &dyn CameraModel,
    ) -> IngestResult<EntityId> {
        let trajectory = observation.trajectory()?;

        let mut ids = self.ids.clone();
        let event_id = ids.next_id()?;
        let mut staged = Vec::with_capacity(observation.objects_of_interest.len());
        for object in &observation.objects_of_interest {
            let positions = observation.localize_object(object, camera)?;
            let mut candidate =
                ObjectNode::new(ids.next_id()?, &object.name, &object.object_class, positions);
            candidate.caption = object.caption.clone();
            candidate.visual_embedding = object.visual_embedding.clone();
            candidate.instance_views = object.instance_views.clone();
            let edge_id = ids.next_id()?;
            staged.push((candidate, edge_id, object.role.clone()));
        }

        self.ids = ids;
        let mut involved_object_ids = Vec::with_capacity(staged.len());
        let mut edges = Vec::with_capacity(staged.len());
        for (candidate, edge_id, role) in staged {
            let (is_new, resolved) = self.spatial.is_new_node(&candidate);
            if is_new {
                tracing::debug!(object = %resolved, name = %candidate.name, "new object node");
                self.spatial.add_object(candidate)?;
            } else {
                self.spatial.merge(resolved, &candidate);
            }
            if !involved_object_ids.contains(&resolved) {
                involved_object_ids.push(resolved);
            }
            edges.push(EventObjectEdge {
                id: edge_id,
                source_node_id: event_id,
                target_node_id: resolved,
                object_role: role,
            });
        }

        self.events.add_event(EventNode {
            id: event_id,
            event_description: observation.event_description.clone(),
            start: trajectory.start,
            end: trajectory.end,
            location: observation.location.clone(),
            involved_object_ids,
            timestamped_observation_odom: trajectory.odom,
        })?;
        self.edges.extend(edges);

        tracing::info!(
            event = %event_id,
            location = %observation.location,
            objects = observation.objects_of_interest.len(),
            "ingested event"
        );
        Ok(event_id)
    }

    /// Create one room node per distinct event location, positioned at the mean
    /// first-observation position of the events there.
    ///
    /// Rooms are appended, never deduplicated: call [`Self::clear_rooms`] before
    /// regenerating. Events without odometry are skipped; a location with no
    /// usable event gets no room. Returns the number of rooms created.
    pub fn generate_room_nodes(&mut self) -> GraphResult<usize> {
        if self.spatial.room_count() > 0 {
            tracing::warn!(
                rooms = self.spatial.room_count(),
                "generating room nodes on a graph that already has rooms"
            );
        }

        let mut per_location: Vec<(String, Vec<Point3>)> = Vec::new();
        for event in self.events.events().values() {
            let Some(position) = event.first_observation_position() else {
                tracing::warn!(event = %event.id, "event has no odometry, skipped for room position");
                continue;
            };
            match per_location.iter_mut().find(|(name, _)| *name == event.location) {
                Some((_, positions)) => positions.push(position),
                None => per_location.push((event.location.clone(), vec![position])),
            }
        }
        for location in self.events.get_locations() {
            if !per_location.iter().any(|(name, _)| *name == location) {
                tracing::warn!(%location, "no observation for location, room skipped");
            }
        }

        let mut created = 0;
        for (name, positions) in per_location {
            let id = self.ids.next_id()?;
            let position = mean_position(&positions);
            tracing::debug!(room = %id, %name, "room node");
            self.spatial.add_room(RoomNode { id, name, position });
            created += 1;
        }
        Ok(created)
    }

    pub fn clear_rooms(&mut self) {
        self.spatial.clear_rooms();
    }

    /// Set an object's caption. Returns `false` if the object is unknown.
    pub fn set_object_caption(&mut self, id: EntityId, caption: impl Into<String>) -> bool {
        match self.spatial.get_by_id_mut(id) {
            Some(object) => {
                object.caption = Some(caption.into());
                true
            }
            None => {
                tracing::warn!(object = %id, "cannot caption unknown object");
                false
            }
        }
    }

    /// `id → (name, caption)` for every object.
    pub fn objects_summary(&self) -> OrderedMap<EntityId, ObjectSummary> {
        self.spatial
            .objects()
            .iter()
            .map(|(id, o)| {
                (
                    *id,
                    ObjectSummary {
                        name: o.name.clone(),
                        caption: o.caption.clone(),
                    },
                )
            })
            .collect()
    }

    /// `id → (start, description)` for every event.
    pub fn events_summary(&self) -> OrderedMap<EntityId, EventSummary> {
        self.events
            .events()
            .iter()
            .map(|(id, e)| {
                (
                    *id,
                    EventSummary {
                        start: e.start.to_local_string(),
                        description: e.event_description.clone(),
                    },
                )
            })
            .collect()
    }

    /// Persisted form of the nodes and edges. Rooms are not persisted.
    pub fn serialize(&self) -> GraphSnapshot {
        GraphSnapshot::from_graph(self)
    }

    /// Rebuild a graph from a snapshot.
    ///
    /// Validates id uniqueness and edge endpoints, and resumes the id counter
    /// after the largest id found.
    pub fn deserialize(
        snapshot: &GraphSnapshot,
        matcher: Arc<dyn ObjectMatcher>,
    ) -> SnapshotResult<Self> {
        let (objects, events, edges) = snapshot.to_parts()?;

        let mut seen = HashSet::new();
        let all_ids = objects
            .iter()
            .map(|o| o.id)
            .chain(events.iter().map(|e| e.id))
            .chain(edges.iter().map(|e| e.id));
        for id in all_ids {
            if !seen.insert(id) {
                return Err(GraphError::DuplicateId { id: id.get() }.into());
            }
        }

        let object_ids: HashSet<EntityId> = objects.iter().map(|o| o.id).collect();
        let event_ids: HashSet<EntityId> = events.iter().map(|e| e.id).collect();
        for object in &objects {
            check_object(object)?;
        }
        for event in &events {
            check_event(event)?;
        }
        for edge in &edges {
            check_endpoints(edge, &event_ids, &object_ids)?;
        }

        let mut graph = Self::new(matcher);
        graph.spatial.replace_object_nodes(OrderedMap::from_distinct(
            objects.into_iter().map(|o| (o.id, o)).collect(),
        ));
        graph.events.replace_event_nodes(OrderedMap::from_distinct(
            events.into_iter().map(|e| (e.id, e)).collect(),
        ));
        graph.edges = edges;
        let max_id = seen.iter().map(|id| id.get()).max().unwrap_or(0);
        graph.ids = IdAllocator::resuming_after(max_id);
        tracing::debug!(stats = %graph.stats(), "graph restored");
        Ok(graph)
    }

    // -- Slicer hooks ------------------------------------------------------

    pub(crate) fn spatial_mut(&mut self) -> &mut SpatialIndex {
        &mut self.spatial
    }

    pub(crate) fn events_mut(&mut self) -> &mut EventIndex {
        &mut self.events
    }

    pub(crate) fn retain_edges(&mut self, keep: impl FnMut(&EventObjectEdge) -> bool) {
        self.edges.retain(keep);
    }
}

impl Default for EventGroundedGraph {
    fn default() -> Self {
        Self {
            spatial: SpatialIndex::default(),
            events: EventIndex::new(),
            edges: Vec::new(),
            ids: IdAllocator::new(),
        }
    }
}

impl std::fmt::Display for EventGroundedGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "== objects & rooms ==")?;
        write!(f, "{}", self.spatial)?;
        writeln!(f, "== events ==")?;
        write!(f, "{}", self.events)?;
        writeln!(f, "== edges ==")?;
        for edge in &self.edges {
            write!(f, "{edge}")?;
        }
        Ok(())
    }
}

fn mean_position(positions: &[Point3]) -> Point3 {
    let n = positions.len().max(1) as f64;
    let mut sum = [0.0; 3];
    for p in positions {
        for (acc, v) in sum.iter_mut().zip(p) {
            *acc += v;
        }
    }
    sum.map(|s| s / n)
}

fn dangling(edge: &EventObjectEdge, node_id: EntityId, missing: &'static str) -> GraphError {
    GraphError::DanglingEdge {
        edge_id: edge.id.get(),
        node_id: node_id.get(),
        missing,
    }
}

fn check_endpoints(
    edge: &EventObjectEdge,
    event_ids: &HashSet<EntityId>,
    object_ids: &HashSet<EntityId>,
) -> GraphResult<()> {
    if !event_ids.contains(&edge.source_node_id) {
        return Err(dangling(edge, edge.source_node_id, "event"));
    }
    if !object_ids.contains(&edge.target_node_id) {
        return Err(dangling(edge, edge.target_node_id, "object"));
    }
    Ok(())
}
