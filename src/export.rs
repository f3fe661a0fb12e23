//! Persisted graph snapshot.
//!
//! These types mirror the on-disk JSON document exactly: node and edge maps
//! keyed by id, timestamps as local wall-clock strings, positions rounded to
//! three decimals. The same document, with sections dropped, is the payload
//! handed to the oracle.
//!
//! Every section is optional on read so that trimmed payloads parse back.
//! Section order and map order are preserved through [`OrderedMap`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SnapshotError, SnapshotResult};
use crate::graph::egg::EventGroundedGraph;
use crate::graph::{EventNode, EventObjectEdge, ObjectNode, ObservationOdom, Point3, Pose};
use crate::id::EntityId;
use crate::ordered::OrderedMap;
use crate::temporal::Timestamp;

/// Top-level snapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: NodesSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<EdgesSection>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodesSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_nodes: Option<OrderedMap<EntityId, ObjectEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_nodes: Option<OrderedMap<EntityId, EventRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub attributes: ObjectRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub node_id: EntityId,
    pub object_class: String,
    pub name: String,
    pub timestamped_position: OrderedMap<String, Point3>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_description: String,
    pub start: String,
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_object_ids: Option<Vec<EntityId>>,
    pub timestamped_observation_odom: OrderedMap<String, ObservationOdom>,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgesSection {
    pub event_object_edges: OrderedMap<EntityId, EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub edge_id: EntityId,
    pub from_event: EntityId,
    pub to_object: EntityId,
    pub object_role: String,
}

/// Round to three decimals, the persisted precision.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round_pose(pose: &Pose) -> Pose {
    Pose::new(pose.position.map(round3), pose.orientation.map(round3))
}

impl GraphSnapshot {
    /// Snapshot of every object, event and edge in `graph`.
    pub fn from_graph(graph: &EventGroundedGraph) -> Self {
        let object_nodes = graph
            .spatial()
            .objects()
            .iter()
            .map(|(id, o)| (*id, ObjectEntry { attributes: ObjectRecord::from(o) }))
            .collect();
        let event_nodes = graph
            .events()
            .events()
            .iter()
            .map(|(id, e)| (*id, EventRecord::from(e)))
            .collect();
        let event_object_edges = graph
            .edges()
            .iter()
            .map(|e| (e.id, EdgeRecord::from(e)))
            .collect();
        Self {
            nodes: NodesSection {
                object_nodes: Some(object_nodes),
                event_nodes: Some(event_nodes),
            },
            edges: Some(EdgesSection { event_object_edges }),
        }
    }

    pub fn drop_edges(&mut self) {
        self.edges = None;
    }

    pub fn drop_object_nodes(&mut self) {
        self.nodes.object_nodes = None;
    }

    pub fn drop_event_nodes(&mut self) {
        self.nodes.event_nodes = None;
    }

    /// Remove `involved_object_ids` from every event record.
    pub fn drop_involved_object_ids(&mut self) {
        if let Some(events) = &mut self.nodes.event_nodes {
            for event in events.values_mut() {
                event.involved_object_ids = None;
            }
        }
    }

    pub fn object_ids(&self) -> Vec<EntityId> {
        self.nodes
            .object_nodes
            .as_ref()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn event_ids(&self) -> Vec<EntityId> {
        self.nodes
            .event_nodes
            .as_ref()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn edge_ids(&self) -> Vec<EntityId> {
        self.edges
            .as_ref()
            .map(|e| e.event_object_edges.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Decode the records into graph nodes and edges, in document order.
    ///
    /// Missing sections decode as empty.
    pub fn to_parts(
        &self,
    ) -> SnapshotResult<(Vec<ObjectNode>, Vec<EventNode>, Vec<EventObjectEdge>)> {
        let mut objects = Vec::new();
        for (key, entry) in self.nodes.object_nodes.iter().flat_map(|m| m.iter()) {
            objects.push(entry.attributes.to_node(*key)?);
        }
        let mut events = Vec::new();
        for (key, record) in self.nodes.event_nodes.iter().flat_map(|m| m.iter()) {
            events.push(record.to_node(*key)?);
        }
        let mut edges = Vec::new();
        for (key, record) in self
            .edges
            .iter()
            .flat_map(|e| e.event_object_edges.iter())
        {
            if *key != record.edge_id {
                return Err(SnapshotError::Json {
                    message: format!("edge key {key} does not match edge_id {}", record.edge_id),
                });
            }
            edges.push(EventObjectEdge {
                id: *key,
                source_node_id: record.from_event,
                target_node_id: record.to_object,
                object_role: record.object_role.clone(),
            });
        }
        Ok((objects, events, edges))
    }

    pub fn to_json(&self) -> SnapshotResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Json {
            message: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        serde_json::from_str(json).map_err(|e| SnapshotError::Json {
            message: e.to_string(),
        })
    }

    /// Write the snapshot as pretty-printed JSON.
    pub fn write_to(&self, path: &Path) -> SnapshotResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "snapshot written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> SnapshotResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

impl From<&ObjectNode> for ObjectRecord {
    fn from(node: &ObjectNode) -> Self {
        Self {
            node_id: node.id,
            object_class: node.object_class.clone(),
            name: node.name.clone(),
            timestamped_position: node
                .timestamped_position
                .iter()
                .map(|(t, p)| (t.to_local_string(), (*p).map(round3)))
                .collect(),
            caption: node.caption.clone(),
        }
    }
}

impl ObjectRecord {
    fn to_node(&self, key: EntityId) -> SnapshotResult<ObjectNode> {
        if key != self.node_id {
            return Err(SnapshotError::Json {
                message: format!("object key {key} does not match node_id {}", self.node_id),
            });
        }
        let mut positions = OrderedMap::with_capacity(self.timestamped_position.len());
        for (t, p) in self.timestamped_position.iter() {
            positions.insert(Timestamp::parse_local(t)?, *p);
        }
        let mut node = ObjectNode::new(key, &self.name, &self.object_class, positions);
        node.caption = self.caption.clone();
        Ok(node)
    }
}

impl From<&EventNode> for EventRecord {
    fn from(event: &EventNode) -> Self {
        Self {
            event_description: event.event_description.clone(),
            start: event.start.to_local_string(),
            end: event.end.to_local_string(),
            involved_object_ids: Some(event.involved_object_ids.clone()),
            timestamped_observation_odom: event
                .timestamped_observation_odom
                .iter()
                .map(|(t, odom)| {
                    (
                        t.to_local_string(),
                        ObservationOdom {
                            base: round_pose(&odom.base),
                            camera: round_pose(&odom.camera),
                        },
                    )
                })
                .collect(),
            location: event.location.clone(),
        }
    }
}

impl EventRecord {
    fn to_node(&self, key: EntityId) -> SnapshotResult<EventNode> {
        let mut odom = OrderedMap::with_capacity(self.timestamped_observation_odom.len());
        for (t, o) in self.timestamped_observation_odom.iter() {
            odom.insert(Timestamp::parse_local(t)?, *o);
        }
        let mut involved_object_ids: Vec<EntityId> = Vec::new();
        for id in self.involved_object_ids.iter().flatten() {
            if !involved_object_ids.contains(id) {
                involved_object_ids.push(*id);
            }
        }
        Ok(EventNode {
            id: key,
            event_description: self.event_description.clone(),
            start: Timestamp::parse_local(&self.start)?,
            end: Timestamp::parse_local(&self.end)?,
            location: self.location.clone(),
            involved_object_ids,
            timestamped_observation_odom: odom,
        })
    }
}

impl From<&EventObjectEdge> for EdgeRecord {
    fn from(edge: &EventObjectEdge) -> Self {
        Self {
            edge_id: edge.id,
            from_event: edge.source_node_id,
            to_object: edge.target_node_id,
            object_role: edge.object_role.clone(),
        }
    }
}
