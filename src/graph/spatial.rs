//! Spatial index: object and room nodes.
//!
//! Objects are held in insertion order, so identity resolution always prefers
//! the earliest-created node when several could match.

use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::id::EntityId;
use crate::ordered::OrderedMap;
use crate::temporal::TimeRange;

use super::matcher::{GroundTruthMatcher, ObjectMatcher};
use super::{ObjectNode, RoomNode};

/// Owner of object and room nodes, with a pluggable identity predicate.
#[derive(Clone)]
pub struct SpatialIndex {
    objects: OrderedMap<EntityId, ObjectNode>,
    rooms: OrderedMap<EntityId, RoomNode>,
    matcher: Arc<dyn ObjectMatcher>,
}

impl SpatialIndex {
    /// Create an empty index resolving identities with `matcher`.
    pub fn new(matcher: Arc<dyn ObjectMatcher>) -> Self {
        Self {
            objects: OrderedMap::new(),
            rooms: OrderedMap::new(),
            matcher,
        }
    }

    pub fn matcher(&self) -> &Arc<dyn ObjectMatcher> {
        &self.matcher
    }

    /// Resolve `candidate` against every known object.
    ///
    /// Returns `(true, candidate.id)` when nothing matches, otherwise
    /// `(false, id)` of the first matching node in insertion order.
    pub fn is_new_node(&self, candidate: &ObjectNode) -> (bool, EntityId) {
        match self
            .objects
            .values()
            .find(|known| self.matcher.is_same_entity(known, candidate))
        {
            Some(known) => (false, known.id),
            None => (true, candidate.id),
        }
    }

    /// Union `duplicate`'s position history into the survivor's.
    ///
    /// Timestamp collisions are last-write-wins. Captions, embeddings and
    /// instance views are left alone. Returns `false` if the survivor is unknown.
    pub fn merge(&mut self, survivor_id: EntityId, duplicate: &ObjectNode) -> bool {
        let Some(survivor) = self.objects.get_mut(&survivor_id) else {
            tracing::warn!(survivor = %survivor_id, "merge target not found");
            return false;
        };
        tracing::debug!(
            survivor = %survivor_id,
            duplicate = %duplicate.id,
            observations = duplicate.timestamped_position.len(),
            "merging duplicate observation"
        );
        survivor
            .timestamped_position
            .extend(duplicate.timestamped_position.iter().map(|(t, p)| (*t, *p)));
        true
    }

    /// Add a new object node.
    ///
    /// Rejects an id that is already present and an empty position history.
    pub fn add_object(&mut self, node: ObjectNode) -> GraphResult<()> {
        if self.objects.contains_key(&node.id) {
            return Err(GraphError::DuplicateId { id: node.id.get() });
        }
        check_object(&node)?;
        self.objects.insert(node.id, node);
        Ok(())
    }

    /// Add a room node. Rooms are not deduplicated.
    pub fn add_room(&mut self, room: RoomNode) {
        self.rooms.insert(room.id, room);
    }

    /// Bulk overwrite of the object set.
    pub fn replace_object_nodes(&mut self, objects: OrderedMap<EntityId, ObjectNode>) {
        self.objects = objects;
    }

    /// Bulk overwrite of the room set.
    pub fn replace_room_nodes(&mut self, rooms: OrderedMap<EntityId, RoomNode>) {
        self.rooms = rooms;
    }

    pub fn clear_rooms(&mut self) {
        self.rooms.clear();
    }

    /// Look up an object by id; a miss is logged and returns `None`.
    pub fn get_by_id(&self, id: EntityId) -> Option<&ObjectNode> {
        let found = self.objects.get(&id);
        if found.is_none() {
            tracing::warn!(object = %id, "object node not found");
        }
        found
    }

    pub(crate) fn get_by_id_mut(&mut self, id: EntityId) -> Option<&mut ObjectNode> {
        self.objects.get_mut(&id)
    }

    /// First object with the given name; a miss is logged and returns `None`.
    pub fn get_by_name(&self, name: &str) -> Option<&ObjectNode> {
        let found = self.objects.values().find(|o| o.name == name);
        if found.is_none() {
            tracing::warn!(name, "object node not found");
        }
        found
    }

    /// All objects of a class, in insertion order.
    pub fn get_by_class(&self, object_class: &str) -> Vec<&ObjectNode> {
        self.objects
            .values()
            .filter(|o| o.object_class == object_class)
            .collect()
    }

    /// First room with the given name; a miss is logged and returns `None`.
    pub fn get_room_by_name(&self, name: &str) -> Option<&RoomNode> {
        let found = self.rooms.values().find(|r| r.name == name);
        if found.is_none() {
            tracing::warn!(name, "room node not found");
        }
        found
    }

    pub fn contains_object(&self, id: EntityId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn objects(&self) -> &OrderedMap<EntityId, ObjectNode> {
        &self.objects
    }

    pub fn rooms(&self) -> &OrderedMap<EntityId, RoomNode> {
        &self.rooms
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Clip every object's position history to `range`.
    ///
    /// An object with no observation inside `range` keeps its history and a
    /// warning is logged.
    pub fn clip_objects_to_time_range(&mut self, range: &TimeRange) {
        for object in self.objects.values_mut() {
            if !object.clip_to_time_range(range) {
                tracing::warn!(
                    object = %object.id,
                    %range,
                    "no observation inside time range, keeping full history"
                );
            }
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(Arc::new(GroundTruthMatcher))
    }
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("objects", &self.objects.len())
            .field("rooms", &self.rooms.len())
            .field("matcher", &self.matcher.name())
            .finish()
    }
}

impl std::fmt::Display for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for object in self.objects.values() {
            write!(f, "{object}")?;
        }
        for room in self.rooms.values() {
            write!(f, "{room}")?;
        }
        Ok(())
    }
}

/// Per-node checks shared by [`SpatialIndex::add_object`] and bulk loading.
pub(crate) fn check_object(node: &ObjectNode) -> GraphResult<()> {
    if node.timestamped_position.is_empty() {
        return Err(GraphError::EmptyHistory { id: node.id.get() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::Timestamp;

    fn id(raw: u64) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn object(raw: u64, name: &str, history: &[(i64, f64)]) -> ObjectNode {
        let positions = history
            .iter()
            .map(|(t, x)| (Timestamp::from_nanos(*t), [*x, 0.0, 0.0]))
            .collect();
        ObjectNode::new(id(raw), name, "mug", positions)
    }

    #[test]
    fn first_match_wins() {
        let mut index = SpatialIndex::default();
        index.add_object(object(1, "mug_0", &[(10, 1.0)])).unwrap();
        index.add_object(object(2, "mug_0", &[(20, 2.0)])).unwrap();
        let (is_new, resolved) = index.is_new_node(&object(9, "mug_0", &[(30, 3.0)]));
        assert!(!is_new);
        assert_eq!(resolved, id(1));

        let (is_new, resolved) = index.is_new_node(&object(9, "bowl_0", &[(30, 3.0)]));
        assert!(is_new);
        assert_eq!(resolved, id(9));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut index = SpatialIndex::default();
        index.add_object(object(1, "mug_0", &[(10, 1.0)])).unwrap();
        let dup = object(7, "mug_0", &[(20, 2.0), (10, 5.0)]);

        assert!(index.merge(id(1), &dup));
        let once = index.get_by_id(id(1)).unwrap().timestamped_position.clone();
        assert!(index.merge(id(1), &dup));
        let twice = &index.get_by_id(id(1)).unwrap().timestamped_position;

        assert_eq!(&once, twice);
        assert_eq!(twice.len(), 2);
        // Collision on t=10 takes the duplicate's value.
        assert_eq!(twice.get(&Timestamp::from_nanos(10)), Some(&[5.0, 0.0, 0.0]));
    }

    #[test]
    fn merge_into_unknown_survivor_is_a_no_op() {
        let mut index = SpatialIndex::default();
        assert!(!index.merge(id(3), &object(4, "x", &[(1, 1.0)])));
        assert_eq!(index.object_count(), 0);
    }

    #[test]
    fn add_object_rejects_duplicates_and_empty_history() {
        let mut index = SpatialIndex::default();
        index.add_object(object(1, "a", &[(1, 1.0)])).unwrap();
        assert!(matches!(
            index.add_object(object(1, "b", &[(1, 1.0)])),
            Err(GraphError::DuplicateId { id: 1 })
        ));
        assert!(matches!(
            index.add_object(object(2, "c", &[])),
            Err(GraphError::EmptyHistory { id: 2 })
        ));
    }

    #[test]
    fn lookups_miss_without_error() {
        let mut index = SpatialIndex::default();
        index.add_object(object(1, "mug_0", &[(1, 1.0)])).unwrap();
        assert!(index.get_by_id(id(5)).is_none());
        assert!(index.get_by_name("plate_3").is_none());
        assert_eq!(index.get_by_class("mug").len(), 1);
        assert!(index.get_by_class("plate").is_empty());
        assert!(index.get_room_by_name("kitchen").is_none());
    }

    #[test]
    fn clipping_skips_objects_outside_range() {
        let mut index = SpatialIndex::default();
        index.add_object(object(1, "a", &[(100, 1.0), (300, 3.0)])).unwrap();
        index.add_object(object(2, "b", &[(900, 9.0)])).unwrap();
        let range = TimeRange::new(Timestamp::from_nanos(0), Timestamp::from_nanos(200)).unwrap();
        index.clip_objects_to_time_range(&range);
        assert_eq!(index.get_by_id(id(1)).unwrap().timestamped_position.len(), 1);
        assert_eq!(index.get_by_id(id(2)).unwrap().timestamped_position.len(), 1);
    }
}
