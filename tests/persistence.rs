//! Persistence tests: graphs survive a write/read cycle through snapshot
//! files, and identifier allocation resumes after a reload.

use std::collections::HashSet;

use egg_graph::error::SnapshotError;
use egg_graph::export::GraphSnapshot;
use egg_graph::graph::egg::EventGroundedGraph;
use egg_graph::graph::matcher::MatcherMode;
use egg_graph::graph::{EventNode, EventObjectEdge, ObjectNode, ObservationOdom, Pose};
use egg_graph::id::EntityId;
use egg_graph::ingest::{
    EventObservation, FixedDepthCamera, FrameRecord, MaskObservation, ObservedObject,
};
use egg_graph::ordered::OrderedMap;
use egg_graph::temporal::Timestamp;

fn id(raw: u64) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn observation(location: &str, start_secs: i64, objects: &[&str]) -> EventObservation {
    let frame = |frame, secs, x| FrameRecord {
        frame,
        timestamp: Timestamp::from_secs(secs),
        odom: ObservationOdom {
            base: Pose::new([x, 1.0, 0.0], [0.0, 0.0, 0.382_683_4, 0.923_879_5]),
            camera: Pose::new([x, 1.0, 1.1], [0.0, 0.0, 0.382_683_4, 0.923_879_5]),
        },
    };
    let mask = |frame| MaskObservation {
        frame,
        polygon: vec![[100.0, 100.0], [140.0, 100.0], [140.0, 160.0]],
    };
    EventObservation {
        location: location.into(),
        event_description: format!("tidying up the {location}"),
        frames: vec![frame(0, start_secs, 0.25), frame(1, start_secs + 30, 0.75)],
        objects_of_interest: objects
            .iter()
            .map(|name| ObservedObject {
                name: (*name).into(),
                object_class: name.trim_end_matches(|c: char| c == '_' || c.is_ascii_digit()).into(),
                role: "moved".into(),
                first: mask(0),
                last: mask(1),
                caption: Some(format!("a plain {name}")),
                visual_embedding: None,
                instance_views: Vec::new(),
            })
            .collect(),
    }
}

fn sample_graph() -> EventGroundedGraph {
    let camera = FixedDepthCamera::default();
    let mut graph = EventGroundedGraph::default();
    for obs in [
        observation("kitchen", 1_700_000_000, &["mug_0", "plate_1"]),
        observation("hallway", 1_700_000_600, &["shoe_0"]),
        observation("kitchen", 1_700_001_200, &["plate_1"]),
    ] {
        graph.add_event_from_observation(&obs, &camera).unwrap();
    }
    graph
}

fn reload(graph: &EventGroundedGraph, dir: &std::path::Path) -> EventGroundedGraph {
    let path = dir.join("graph.json");
    graph.serialize().write_to(&path).unwrap();
    let snapshot = GraphSnapshot::read_from(&path).unwrap();
    EventGroundedGraph::deserialize(&snapshot, MatcherMode::GroundTruth.build(0.9)).unwrap()
}

#[test]
fn graph_survives_write_and_read() {
    let dir = tempfile::TempDir::new().unwrap();
    let graph = sample_graph();
    let restored = reload(&graph, dir.path());

    assert_eq!(restored.serialize(), graph.serialize());
    assert_eq!(restored.stats(), graph.stats());

    let plate = restored.spatial().get_by_name("plate_1").unwrap();
    assert_eq!(plate.timestamped_position.len(), 4);
    assert_eq!(plate.caption.as_deref(), Some("a plain plate_1"));
    let saved_plate = graph.spatial().get_by_name("plate_1").unwrap();
    assert_eq!(plate.id, saved_plate.id);

    for (saved, loaded) in graph.events().events().values().zip(restored.events().events().values()) {
        assert_eq!(saved.id, loaded.id);
        assert_eq!(saved.start, loaded.start);
        assert_eq!(saved.end, loaded.end);
        assert_eq!(saved.involved_object_ids, loaded.involved_object_ids);
        assert_eq!(saved.location, loaded.location);
    }
    assert_eq!(restored.edges(), graph.edges());
}

#[test]
fn timestamps_are_truncated_to_seconds() {
    let dir = tempfile::TempDir::new().unwrap();
    let precise = Timestamp::from_nanos(1_700_000_000_123_456_789);
    let mut graph = EventGroundedGraph::default();
    graph
        .add_object(ObjectNode::new(
            id(1),
            "cup_0",
            "cup",
            OrderedMap::from_iter([(precise, [0.123_456, 1.0, 2.000_9])]),
        ))
        .unwrap();
    graph
        .add_event(EventNode {
            id: id(2),
            event_description: "pouring".into(),
            start: precise,
            end: Timestamp::from_nanos(1_700_000_005_999_999_999),
            location: "kitchen".into(),
            involved_object_ids: vec![id(1)],
            timestamped_observation_odom: OrderedMap::from_iter([(
                precise,
                ObservationOdom {
                    base: Pose::at([0.0, 0.0, 0.0]),
                    camera: Pose::at([0.0, 0.0, 1.0]),
                },
            )]),
        })
        .unwrap();
    graph
        .add_edge(EventObjectEdge {
            id: id(3),
            source_node_id: id(2),
            target_node_id: id(1),
            object_role: "poured into".into(),
        })
        .unwrap();

    let restored = reload(&graph, dir.path());
    let cup = restored.spatial().get_by_id(id(1)).unwrap();
    let (t, position) = cup.timestamped_position.first().unwrap();
    assert_eq!(*t, precise.whole_seconds());
    assert_eq!(*position, [0.123, 1.0, 2.001]);

    let event = restored.events().get_event_by_id(id(2)).unwrap();
    assert_eq!(event.start.as_secs(), precise.as_secs());
    assert_eq!(event.end, Timestamp::from_secs(1_700_000_005));
}

#[test]
fn allocation_resumes_after_reload() {
    let dir = tempfile::TempDir::new().unwrap();
    let graph = sample_graph();
    let last = graph.stats().last_id;
    let mut restored = reload(&graph, dir.path());
    assert_eq!(restored.id_allocator().last_issued(), last);

    let camera = FixedDepthCamera::default();
    let event = restored
        .add_event_from_observation(&observation("hallway", 1_700_002_000, &["shoe_0", "umbrella_0"]), &camera)
        .unwrap();
    assert!(event.get() > last);

    let mut ids: Vec<EntityId> = restored.spatial().objects().keys().copied().collect();
    ids.extend(restored.events().ids());
    ids.extend(restored.edges().iter().map(|e| e.id));
    let distinct: HashSet<EntityId> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), ids.len());
    // The shoe was recognised, the umbrella is new.
    assert_eq!(restored.spatial().get_by_class("shoe").len(), 1);
    assert_eq!(restored.spatial().object_count(), graph.spatial().object_count() + 1);
}

#[test]
fn missing_or_corrupt_files_are_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let missing = dir.path().join("missing.json");
    assert!(matches!(GraphSnapshot::read_from(&missing), Err(SnapshotError::Io { .. })));

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{\"nodes\": 3}").unwrap();
    assert!(matches!(GraphSnapshot::read_from(&corrupt), Err(SnapshotError::Json { .. })));
}

#[test]
fn dangling_edges_in_a_snapshot_are_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    let mut snapshot = sample_graph().serialize();
    snapshot.drop_object_nodes();
    snapshot.write_to(&path).unwrap();

    let snapshot = GraphSnapshot::read_from(&path).unwrap();
    assert!(EventGroundedGraph::deserialize(&snapshot, MatcherMode::GroundTruth.build(0.9)).is_err());
}
