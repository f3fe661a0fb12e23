//! Slicer: a read-only baseline graph and a prunable working copy.
//!
//! Every prune replaces the working copy's events (or derives them from an
//! object set) and then cascades so that no edge is left dangling:
//!
//! - event-driven prunes (time range, location) keep exactly the objects
//!   involved in the surviving events, and the edges between survivors;
//! - object-driven prunes keep the events touching the given objects, the
//!   objects those events involve, and only the edges into the given objects.

use std::collections::HashSet;
use std::sync::Arc;

use crate::graph::egg::EventGroundedGraph;
use crate::graph::{EventNode, ObjectNode};
use crate::id::EntityId;
use crate::ordered::OrderedMap;
use crate::temporal::{TimeRange, Timestamp};

/// Baseline graph plus a working copy narrowed by successive prunes.
#[derive(Debug, Clone)]
pub struct Slicer {
    baseline: Arc<EventGroundedGraph>,
    working: EventGroundedGraph,
}

impl Slicer {
    /// Start with a working copy equal to `baseline`.
    pub fn new(baseline: Arc<EventGroundedGraph>) -> Self {
        let working = (*baseline).clone();
        Self { baseline, working }
    }

    pub fn baseline(&self) -> &EventGroundedGraph {
        &self.baseline
    }

    pub fn working(&self) -> &EventGroundedGraph {
        &self.working
    }

    /// Discard every prune: the working copy becomes the baseline again.
    pub fn reset(&mut self) {
        self.working = (*self.baseline).clone();
    }

    /// Keep the events lying entirely inside `range`, then cascade to objects
    /// and edges and clip object histories to `range`.
    pub fn prune_by_time_range(&mut self, range: &TimeRange) {
        let events = collect_events(self.working.events().get_events(range, None));
        self.install_events(events);
        self.working.spatial_mut().clip_objects_to_time_range(range);
        tracing::debug!(%range, stats = %self.working.stats(), "pruned by time range");
    }

    /// Keep the events located in one of `locations`, then cascade.
    pub fn prune_by_location(&mut self, locations: &[String]) {
        let events = collect_events(
            self.working
                .events()
                .get_events(&TimeRange::unbounded(), Some(locations)),
        );
        self.install_events(events);
        tracing::debug!(?locations, stats = %self.working.stats(), "pruned by location");
    }

    /// Keep the events touching any of `object_ids` and the edges pointing at
    /// `object_ids`. The object set is left as it is: an object-driven prune
    /// cascades to events, not the other way round.
    pub fn prune_by_objects(&mut self, object_ids: &[EntityId]) {
        let events = collect_events(self.working.events().get_events_by_objects(object_ids));
        let event_ids: HashSet<EntityId> = events.keys().copied().collect();

        self.working.events_mut().replace_event_nodes(events);
        self.working.retain_edges(|edge| {
            object_ids.contains(&edge.target_node_id) && event_ids.contains(&edge.source_node_id)
        });
        tracing::debug!(?object_ids, stats = %self.working.stats(), "pruned by objects");
    }

    /// Prune to the objects the oracle picked that are actually involved in
    /// one of the events it picked.
    ///
    /// If no picked object is involved in a picked event, fall back to all
    /// picked objects. If nothing was picked at all, the working copy is left
    /// as it is.
    pub fn merge_events_and_objects(&mut self, object_ids: &[EntityId], event_ids: &[EntityId]) {
        let mut valid: Vec<EntityId> = Vec::new();
        for event_id in event_ids {
            let Some(event) = self.working.events().get_event_by_id(*event_id) else {
                continue;
            };
            for object_id in object_ids {
                if event.involves(*object_id) && !valid.contains(object_id) {
                    valid.push(*object_id);
                }
            }
        }
        if valid.is_empty() {
            tracing::info!(
                ?object_ids,
                ?event_ids,
                "no selected object is involved in a selected event, pruning by objects alone"
            );
            valid = object_ids.to_vec();
        }
        if valid.is_empty() {
            tracing::warn!("empty node selection, working graph left unpruned");
            return;
        }
        self.prune_by_objects(&valid);
    }

    /// `(earliest start, latest end)` of the baseline's events.
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        self.baseline.events().get_time_range()
    }

    /// Distinct locations of the baseline's events.
    pub fn locations(&self) -> Vec<String> {
        self.baseline.events().get_locations()
    }

    /// Install `events` and cascade: objects become exactly the ones involved
    /// in them, edges must connect surviving nodes.
    fn install_events(&mut self, events: OrderedMap<EntityId, EventNode>) {
        let objects = self.involved_objects(&events);
        let event_ids: HashSet<EntityId> = events.keys().copied().collect();
        let object_ids: HashSet<EntityId> = objects.keys().copied().collect();

        self.working.events_mut().replace_event_nodes(events);
        self.working.spatial_mut().replace_object_nodes(objects);
        self.working.retain_edges(|edge| {
            event_ids.contains(&edge.source_node_id) && object_ids.contains(&edge.target_node_id)
        });
    }

    /// Objects of the working copy involved in `events`, in working-copy order.
    fn involved_objects(
        &self,
        events: &OrderedMap<EntityId, EventNode>,
    ) -> OrderedMap<EntityId, ObjectNode> {
        let involved: HashSet<EntityId> = events
            .values()
            .flat_map(|e| e.involved_object_ids.iter().copied())
            .collect();
        for id in &involved {
            if !self.working.spatial().contains_object(*id) {
                tracing::warn!(object = %id, "event involves an object missing from the graph");
            }
        }
        self.working
            .spatial()
            .objects()
            .iter()
            .filter(|(id, _)| involved.contains(id))
            .map(|(id, o)| (*id, o.clone()))
            .collect()
    }
}

fn collect_events(events: Vec<&EventNode>) -> OrderedMap<EntityId, EventNode> {
    events.into_iter().map(|e| (e.id, e.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EventObjectEdge, ObservationOdom, Pose};

    fn id(raw: u64) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn ts(n: i64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    /// Events 1 (kitchen, [100,200], objects 10, 11) and 2 (office, [300,400],
    /// objects 11, 12), with one edge per involvement.
    fn two_room_graph() -> EventGroundedGraph {
        let mut graph = EventGroundedGraph::default();
        for (raw, name, t) in [(10, "mug_0", 150), (11, "keys_0", 180), (12, "lamp_0", 350)] {
            let mut positions = OrderedMap::new();
            positions.insert(ts(t), [raw as f64, 0.0, 0.0]);
            if raw == 11 {
                positions.insert(ts(390), [0.0, 1.0, 0.0]);
            }
            graph.add_object(ObjectNode::new(id(raw), name, "thing", positions)).unwrap();
        }
        let odom = |t: i64| {
            let mut m = OrderedMap::new();
            m.insert(ts(t), ObservationOdom { base: Pose::at([0.0; 3]), camera: Pose::at([0.0; 3]) });
            m
        };
        for (raw, start, end, loc, involved) in [
            (1, 100, 200, "kitchen", vec![10, 11]),
            (2, 300, 400, "office", vec![11, 12]),
        ] {
            graph
                .add_event(EventNode {
                    id: id(raw),
                    event_description: format!("event in {loc}"),
                    start: ts(start),
                    end: ts(end),
                    location: loc.into(),
                    involved_object_ids: involved.into_iter().map(id).collect(),
                    timestamped_observation_odom: odom(start),
                })
                .unwrap();
        }
        for (edge, event, object) in [(20, 1, 10), (21, 1, 11), (22, 2, 11), (23, 2, 12)] {
            graph
                .add_edge(EventObjectEdge {
                    id: id(edge),
                    source_node_id: id(event),
                    target_node_id: id(object),
                    object_role: "involved".into(),
                })
                .unwrap();
        }
        graph
    }

    fn slicer() -> Slicer {
        Slicer::new(Arc::new(two_room_graph()))
    }

    fn assert_no_dangling_edges(graph: &EventGroundedGraph) {
        for edge in graph.edges() {
            assert!(graph.events().contains_event(edge.source_node_id), "edge {}", edge.id);
            assert!(graph.spatial().contains_object(edge.target_node_id), "edge {}", edge.id);
        }
    }

    fn object_ids(graph: &EventGroundedGraph) -> Vec<u64> {
        graph.spatial().objects().keys().map(|i| i.get()).collect()
    }

    fn edge_ids(graph: &EventGroundedGraph) -> Vec<u64> {
        graph.edges().iter().map(|e| e.id.get()).collect()
    }

    #[test]
    fn time_then_location_keeps_first_event() {
        let mut s = slicer();
        s.prune_by_time_range(&TimeRange::new(ts(0), ts(250)).unwrap());
        s.prune_by_location(&["kitchen".to_string()]);

        let w = s.working();
        assert_eq!(w.events().ids(), vec![id(1)]);
        assert_eq!(object_ids(w), vec![10, 11]);
        assert_eq!(edge_ids(w), vec![20, 21]);
        assert_no_dangling_edges(w);
    }

    #[test]
    fn time_prune_clips_object_histories() {
        let mut s = slicer();
        s.prune_by_time_range(&TimeRange::new(ts(0), ts(250)).unwrap());
        let keys = s.working().spatial().get_by_id(id(11)).unwrap();
        assert_eq!(keys.timestamped_position.len(), 1);
        // Baseline untouched.
        assert_eq!(
            s.baseline().spatial().get_by_id(id(11)).unwrap().timestamped_position.len(),
            2
        );
    }

    #[test]
    fn object_prune_keeps_touching_events_and_targeted_edges() {
        let mut s = slicer();
        s.prune_by_objects(&[id(12)]);
        let w = s.working();
        assert_eq!(w.events().ids(), vec![id(2)]);
        // Objects are not cascaded from the surviving events.
        assert_eq!(object_ids(w), vec![10, 11, 12]);
        assert_eq!(edge_ids(w), vec![23]);
        assert_no_dangling_edges(w);
    }

    #[test]
    fn merge_uses_intersection_when_present() {
        let mut s = slicer();
        s.merge_events_and_objects(&[id(10), id(12)], &[id(1)]);
        let w = s.working();
        assert_eq!(w.events().ids(), vec![id(1)]);
        assert_eq!(edge_ids(w), vec![20]);
    }

    #[test]
    fn merge_falls_back_to_objects_alone() {
        let mut s = slicer();
        // Object 12 is not involved in event 1.
        s.merge_events_and_objects(&[id(12)], &[id(1)]);
        let w = s.working();
        assert_eq!(w.events().ids(), vec![id(2)]);
        assert!(w.spatial().contains_object(id(12)));
        assert_no_dangling_edges(w);
    }

    #[test]
    fn empty_selection_leaves_graph_unpruned() {
        let mut s = slicer();
        s.merge_events_and_objects(&[], &[id(1)]);
        assert_eq!(s.working().events().len(), 2);
        assert_eq!(s.working().edges().len(), 4);
    }

    #[test]
    fn reset_restores_baseline() {
        let mut s = slicer();
        s.prune_by_location(&["office".to_string()]);
        assert_eq!(s.working().events().len(), 1);
        s.reset();
        assert_eq!(s.working().events().len(), 2);
        assert_eq!(s.working().spatial().object_count(), 3);
        assert_eq!(s.locations(), vec!["kitchen".to_string(), "office".to_string()]);
        assert_eq!(s.time_range(), Some((ts(100), ts(400))));
    }

    #[test]
    fn every_prune_leaves_no_dangling_edges() {
        let ranges = [(0, 250), (250, 500), (0, 1000), (150, 350)];
        for (lo, hi) in ranges {
            let mut s = slicer();
            s.prune_by_time_range(&TimeRange::new(ts(lo), ts(hi)).unwrap());
            assert_no_dangling_edges(s.working());
        }
        for loc in ["kitchen", "office", "garage"] {
            let mut s = slicer();
            s.prune_by_location(&[loc.to_string()]);
            assert_no_dangling_edges(s.working());
        }
        for objects in [vec![10], vec![11], vec![10, 12], vec![99]] {
            let mut s = slicer();
            let ids: Vec<EntityId> = objects.into_iter().map(id).collect();
            s.prune_by_objects(&ids);
            assert_no_dangling_edges(s.working());
        }
    }
}
