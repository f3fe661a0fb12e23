//! Event-grounded graph: objects, rooms and events joined by event→object edges.
//!
//! - **Spatial index** ([`spatial::SpatialIndex`]): object and room nodes, identity resolution
//! - **Event index** ([`event::EventIndex`]): event nodes, time/location range queries
//! - **Graph** ([`egg::EventGroundedGraph`]): both indexes plus the edge list and the id allocator
//!
//! All three node kinds and the edges share one identifier space ([`EntityId`]).

pub mod egg;
pub mod event;
pub mod matcher;
pub mod spatial;

use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::ordered::OrderedMap;
use crate::temporal::{TimeRange, Timestamp};

/// A point in the map frame: `[x, y, z]` in metres.
pub type Point3 = [f64; 3];

/// Position plus orientation quaternion `[qx, qy, qz, qw]`.
///
/// Serialized as `[[x, y, z], [qx, qy, qz, qw]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "([f64; 3], [f64; 4])", into = "([f64; 3], [f64; 4])")]
pub struct Pose {
    pub position: Point3,
    pub orientation: [f64; 4],
}

impl Pose {
    pub fn new(position: Point3, orientation: [f64; 4]) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// A pose at `position` with the identity rotation.
    pub fn at(position: Point3) -> Self {
        Self::new(position, [0.0, 0.0, 0.0, 1.0])
    }
}

impl From<([f64; 3], [f64; 4])> for Pose {
    fn from((position, orientation): ([f64; 3], [f64; 4])) -> Self {
        Self::new(position, orientation)
    }
}

impl From<Pose> for ([f64; 3], [f64; 4]) {
    fn from(pose: Pose) -> Self {
        (pose.position, pose.orientation)
    }
}

/// Robot base and camera pose at one instant of an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationOdom {
    #[serde(rename = "base_odom")]
    pub base: Pose,
    #[serde(rename = "camera_odom")]
    pub camera: Pose,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A physical object observed during one or more events.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    pub id: EntityId,
    /// Unique display name, e.g. `mug_0`.
    pub name: String,
    pub object_class: String,
    /// One entry per observation, in observation order.
    pub timestamped_position: OrderedMap<Timestamp, Point3>,
    pub caption: Option<String>,
    pub visual_embedding: Option<Vec<f32>>,
    /// Opaque references to cropped instance views.
    pub instance_views: Vec<String>,
}

impl ObjectNode {
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        object_class: impl Into<String>,
        timestamped_position: OrderedMap<Timestamp, Point3>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            object_class: object_class.into(),
            timestamped_position,
            caption: None,
            visual_embedding: None,
            instance_views: Vec::new(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.visual_embedding = Some(embedding);
        self
    }

    /// Whether `event` lists this object among its involved objects.
    pub fn is_in_event(&self, event: &EventNode) -> bool {
        event.involved_object_ids.contains(&self.id)
    }

    /// Whether the first observation happened at or before `t`.
    pub fn has_been_seen(&self, t: Timestamp) -> bool {
        self.timestamped_position
            .first()
            .is_some_and(|(first, _)| *first <= t)
    }

    /// The latest observation at or before `t`; the first observation if every
    /// observation is later than `t`.
    pub fn position_at_or_before(&self, t: Timestamp) -> Option<(Timestamp, Point3)> {
        let mut previous = None;
        for (ts, pos) in self.timestamped_position.iter() {
            if *ts >= t {
                return Some(previous.unwrap_or((*ts, *pos)));
            }
            previous = Some((*ts, *pos));
        }
        previous
    }

    /// Drop observations outside `range` (inclusive on both ends).
    ///
    /// Returns `false` and leaves the history untouched when clipping would
    /// remove every observation.
    pub fn clip_to_time_range(&mut self, range: &TimeRange) -> bool {
        if !self.timestamped_position.keys().any(|t| range.contains(*t)) {
            return false;
        }
        self.timestamped_position.retain(|t, _| range.contains(*t));
        true
    }
}

impl std::fmt::Display for ObjectNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "object {} \"{}\" ({})", self.id, self.name, self.object_class)?;
        for (ts, pos) in self.timestamped_position.iter() {
            writeln!(f, "  {ts}: [{:.3}, {:.3}, {:.3}]", pos[0], pos[1], pos[2])?;
        }
        if let Some(caption) = &self.caption {
            writeln!(f, "  caption: {caption}")?;
        }
        Ok(())
    }
}

/// A room, located at the mean first-observation position of its events.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomNode {
    pub id: EntityId,
    pub name: String,
    pub position: Point3,
}

impl std::fmt::Display for RoomNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "room {} \"{}\" at [{:.3}, {:.3}, {:.3}]",
            self.id, self.name, self.position[0], self.position[1], self.position[2]
        )
    }
}

/// An observed event: one video clip with its description and the objects it involves.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNode {
    pub id: EntityId,
    pub event_description: String,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Room name.
    pub location: String,
    /// Resolved ids of the objects this event involves, without duplicates.
    pub involved_object_ids: Vec<EntityId>,
    /// Robot pose history; the first entry is the canonical first observation.
    pub timestamped_observation_odom: OrderedMap<Timestamp, ObservationOdom>,
}

impl EventNode {
    /// Whether `[start, end]` lies entirely inside `range`.
    pub fn is_in_time_range(&self, range: &TimeRange) -> bool {
        range.contains_span(self.start, self.end)
    }

    /// `None` matches every location.
    pub fn is_in_location(&self, locations: Option<&[String]>) -> bool {
        locations.is_none_or(|locs| locs.iter().any(|l| *l == self.location))
    }

    pub fn involves(&self, object_id: EntityId) -> bool {
        self.involved_object_ids.contains(&object_id)
    }

    pub fn first_observation_odom(&self) -> Option<&ObservationOdom> {
        self.timestamped_observation_odom.first().map(|(_, odom)| odom)
    }

    /// Robot base pose at the first observation.
    pub fn first_observation_pose(&self) -> Option<Pose> {
        self.first_observation_odom().map(|odom| odom.base)
    }

    /// Base position at the first observation.
    pub fn first_observation_position(&self) -> Option<Point3> {
        self.first_observation_pose().map(|pose| pose.position)
    }
}

impl std::fmt::Display for EventNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "event {} in \"{}\"", self.id, self.location)?;
        writeln!(f, "  {} .. {}", self.start, self.end)?;
        writeln!(f, "  {}", self.event_description)?;
        let involved: Vec<String> = self
            .involved_object_ids
            .iter()
            .map(|id| id.to_string())
            .collect();
        writeln!(f, "  involved: [{}]", involved.join(", "))?;
        if let Some((ts, odom)) = self.timestamped_observation_odom.first() {
            let p = odom.base.position;
            writeln!(f, "  first observation {ts}: [{:.3}, {:.3}, {:.3}]", p[0], p[1], p[2])?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Directed association from an event to an object it involves.
#[derive(Debug, Clone, PartialEq)]
pub struct EventObjectEdge {
    pub id: EntityId,
    /// Event node id.
    pub source_node_id: EntityId,
    /// Object node id.
    pub target_node_id: EntityId,
    /// Free-text role of the object in the event.
    pub object_role: String,
}

impl std::fmt::Display for EventObjectEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "edge {}: event {} -> object {} ({})",
            self.id, self.source_node_id, self.target_node_id, self.object_role
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn ts(n: i64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    fn object_with_history(history: &[i64]) -> ObjectNode {
        let positions = history
            .iter()
            .map(|t| (ts(*t), [*t as f64, 0.0, 0.0]))
            .collect();
        ObjectNode::new(id(1), "mug_0", "mug", positions)
    }

    #[test]
    fn pose_serializes_as_nested_arrays() {
        let odom = ObservationOdom {
            base: Pose::at([1.0, 2.0, 0.0]),
            camera: Pose::new([1.0, 2.0, 1.2], [0.0, 0.0, 0.7071, 0.7071]),
        };
        let json = serde_json::to_value(odom).unwrap();
        assert_eq!(json["base_odom"][0], serde_json::json!([1.0, 2.0, 0.0]));
        assert_eq!(json["camera_odom"][1][3], serde_json::json!(0.7071));
        let back: ObservationOdom = serde_json::from_value(json).unwrap();
        assert_eq!(back, odom);
    }

    #[test]
    fn position_lookup_prefers_previous_observation() {
        let obj = object_with_history(&[100, 200, 300]);
        assert_eq!(obj.position_at_or_before(ts(250)).map(|(t, _)| t), Some(ts(200)));
        assert_eq!(obj.position_at_or_before(ts(50)).map(|(t, _)| t), Some(ts(100)));
        assert_eq!(obj.position_at_or_before(ts(900)).map(|(t, _)| t), Some(ts(300)));
        assert!(obj.has_been_seen(ts(100)));
        assert!(!obj.has_been_seen(ts(99)));
    }

    #[test]
    fn clipping_keeps_in_range_observations() {
        let mut obj = object_with_history(&[100, 200, 300]);
        let range = TimeRange::new(ts(150), ts(300)).unwrap();
        assert!(obj.clip_to_time_range(&range));
        let kept: Vec<_> = obj.timestamped_position.keys().copied().collect();
        assert_eq!(kept, vec![ts(200), ts(300)]);
    }

    #[test]
    fn clipping_never_empties_history() {
        let mut obj = object_with_history(&[100, 200]);
        let range = TimeRange::new(ts(500), ts(600)).unwrap();
        assert!(!obj.clip_to_time_range(&range));
        assert_eq!(obj.timestamped_position.len(), 2);
    }

    #[test]
    fn event_location_filter() {
        let event = EventNode {
            id: id(2),
            event_description: "someone washes the mug".into(),
            start: ts(100),
            end: ts(200),
            location: "kitchen".into(),
            involved_object_ids: vec![id(1)],
            timestamped_observation_odom: OrderedMap::new(),
        };
        assert!(event.is_in_location(None));
        assert!(event.is_in_location(Some(&["office".into(), "kitchen".into()])));
        assert!(!event.is_in_location(Some(&["office".into()])));
        assert!(event.involves(id(1)));
        assert!(event.first_observation_position().is_none());
    }
}
