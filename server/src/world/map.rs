// tileworld_server/server/src/world/map.rs
use std::iter;

use bytes::Bytes;
use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use crate::core::error::{ServerError, ServerResult};
use crate::core::types::{Guid, Vec2};
use crate::entities::accessor::{ObjectAccessor, ObjectHandle};
use crate::network::outbox::Outbox;
use crate::network::protocol::{build_create_packets, build_destroy_packets, build_update_packets};
use crate::systems::movement::unit;
use crate::world::grid::{CellCoord, CellGrid};
use crate::world::storage::{MapRecord, WorldStorage};
use crate::world::walkability::WalkabilityLayer;

/// Everything a map needs from its owner while ticking.
pub struct TickContext<'a> {
    pub objects: &'a mut ObjectAccessor,
    pub storage: &'a WorldStorage,
    pub outbox: &'a mut dyn Outbox,
    pub rng: &'a mut StdRng,
    pub now_ms: u64,
}

/// One live map instance: cell buckets of objects plus the walkability layer.
pub struct Map {
    id: u32,
    size_x: u32,
    size_y: u32,
    grid: CellGrid,
    cells: Vec<Vec<ObjectHandle>>,
    walkability: WalkabilityLayer,
}

impl Map {
    pub fn new(record: &MapRecord) -> Self {
        let grid = CellGrid::for_map(record.size_x, record.size_y);
        debug!(
            "Map {} ({}) initialized: {}x{} fields, {}x{} cells",
            record.id, record.name, record.size_x, record.size_y, grid.width(), grid.height()
        );
        Map {
            id: record.id,
            size_x: record.size_x,
            size_y: record.size_y,
            grid,
            cells: vec![Vec::new(); grid.cell_count()],
            walkability: WalkabilityLayer::new(record.size_x, record.size_y, &record.terrain()),
        }
    }

    pub fn id(&self) -> u32 { self.id }
    pub fn grid(&self) -> &CellGrid { &self.grid }
    pub fn walkability(&self) -> &WalkabilityLayer { &self.walkability }

    pub fn contains_position(&self, position: Vec2) -> bool {
        position.x >= 0.0
            && position.y >= 0.0
            && position.x < self.size_x as f32
            && position.y < self.size_y as f32
    }

    pub fn cell_objects(&self, cell: CellCoord) -> &[ObjectHandle] {
        if cell.x >= self.grid.width() || cell.y >= self.grid.height() {
            return &[];
        }
        &self.cells[self.grid.flat_index(cell)]
    }

    pub fn object_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.cells.iter().flatten().copied()
    }

    /// Inserts an object into its cell and makes it visible to nearby players.
    pub fn add_to_map(
        &mut self,
        objects: &mut ObjectAccessor,
        handle: ObjectHandle,
        outbox: &mut dyn Outbox,
    ) -> ServerResult<()> {
        let object = objects
            .get_mut(handle)
            .ok_or_else(|| ServerError::NotFound("object handle for AddToMap".to_string()))?;
        if let Some(current) = object.map_id() {
            return Err(ServerError::InvalidInput(format!(
                "object {} is already on map {}",
                object.guid(),
                current
            )));
        }
        let position = object.position();
        if !self.contains_position(position) {
            return Err(ServerError::InvalidInput(format!(
                "object {} at {:?} is outside map {}",
                object.guid(),
                position,
                self.id
            )));
        }
        object.set_map_id(Some(self.id));

        let object = &*object;
        let guid = object.guid();
        let cell = self.grid.cell_of(position);
        let index = self.grid.flat_index(cell);
        self.cells[index].push(handle);

        if let Some(extent) = object.obstacle_extent() {
            self.walkability.mark_obstacle(guid, position, extent);
        }

        let create = build_create_packets(iter::once(object));
        let is_player = object.is_player();
        self.send_to_surroundings(objects, cell, &create, Some(guid), outbox);
        if is_player {
            self.send_create_surroundings(objects, guid, cell, outbox);
        }
        trace!("Object {} added to map {} cell ({}, {})", guid, self.id, cell.x, cell.y);
        Ok(())
    }

    /// Evicts an object from its cell and tells nearby players to forget it.
    pub fn remove_from_map(
        &mut self,
        objects: &mut ObjectAccessor,
        handle: ObjectHandle,
        outbox: &mut dyn Outbox,
    ) -> ServerResult<()> {
        let object = objects
            .get(handle)
            .ok_or_else(|| ServerError::NotFound("object handle for RemoveFromMap".to_string()))?;
        if object.map_id() != Some(self.id) {
            return Err(ServerError::InvalidInput(format!("object {} is not on map {}", object.guid(), self.id)));
        }
        let guid = object.guid();
        let position = object.position();

        if let Some(extent) = object.obstacle_extent() {
            self.walkability.clear_obstacle(guid, position, extent);
        }

        let cell = self.grid.cell_of(position);
        if !self.detach(cell, handle) {
            warn!("Object {} missing from its cell ({}, {}) on map {}", guid, cell.x, cell.y, self.id);
            for bucket in self.cells.iter_mut() {
                bucket.retain(|h| *h != handle);
            }
        }

        let destroy = build_destroy_packets(iter::once(guid));
        self.send_to_surroundings(objects, cell, &destroy, Some(guid), outbox);

        if let Some(object) = objects.get_mut(handle) {
            object.set_map_id(None);
            if let Some(unit) = object.as_unit_mut() {
                unit.move_direction = crate::core::types::MoveDirection::empty();
                unit.movement_vector = Vec2::zero();
            }
        }
        trace!("Object {} removed from map {}", guid, self.id);
        Ok(())
    }

    fn detach(&mut self, cell: CellCoord, handle: ObjectHandle) -> bool {
        let bucket = &mut self.cells[self.grid.flat_index(cell)];
        match bucket.iter().position(|h| *h == handle) {
            Some(i) => {
                bucket.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Sets a new position and fixes up cell membership and visibility.
    pub fn move_object(
        &mut self,
        objects: &mut ObjectAccessor,
        handle: ObjectHandle,
        position: Vec2,
        outbox: &mut dyn Outbox,
    ) {
        let Some(object) = objects.get_mut(handle) else {
            return;
        };
        let old = object.position();
        object.set_position(position);
        self.relocate(objects, handle, old, position, outbox);
    }

    /// Moves the object between cell buckets when `old` and `new` fall in
    /// different cells, sending destroys for cells leaving its surroundings
    /// and creates for cells entering them. The object's stored position
    /// must already be `new`.
    pub fn relocate(
        &mut self,
        objects: &ObjectAccessor,
        handle: ObjectHandle,
        old: Vec2,
        new: Vec2,
        outbox: &mut dyn Outbox,
    ) {
        let old_cell = self.grid.cell_of(old);
        let new_cell = self.grid.cell_of(new);
        if old_cell == new_cell {
            return;
        }
        let Some(object) = objects.get(handle) else {
            return;
        };
        let guid = object.guid();
        let is_player = object.is_player();

        if !self.detach(old_cell, handle) {
            warn!("Object {} was not in cell ({}, {}) on relocation", guid, old_cell.x, old_cell.y);
        }
        let index = self.grid.flat_index(new_cell);
        self.cells[index].push(handle);

        let old_area = self.grid.surrounding_bounds(old_cell);
        let new_area = self.grid.surrounding_bounds(new_cell);

        let destroy_self = build_destroy_packets(iter::once(guid));
        for cell in old_area.cells().filter(|c| !new_area.contains(*c)) {
            self.send_to_cell(objects, cell, &destroy_self, Some(guid), outbox);
            if is_player {
                let others = self.cell_objects(cell).iter().filter_map(|h| objects.get(*h)).map(|o| o.guid());
                for packet in build_destroy_packets(others) {
                    outbox.deliver(guid, packet);
                }
            }
        }

        let create_self = build_create_packets(iter::once(object));
        for cell in new_area.cells().filter(|c| !old_area.contains(*c)) {
            self.send_to_cell(objects, cell, &create_self, Some(guid), outbox);
            if is_player {
                let others = self
                    .cell_objects(cell)
                    .iter()
                    .filter(|h| **h != handle)
                    .filter_map(|h| objects.get(*h));
                for packet in build_create_packets(others) {
                    outbox.deliver(guid, packet);
                }
            }
        }
        trace!(
            "Object {} relocated on map {}: cell ({}, {}) -> ({}, {})",
            guid, self.id, old_cell.x, old_cell.y, new_cell.x, new_cell.y
        );
    }

    /// Delivers `packets` to every player in `cell` except `except`.
    pub fn send_to_cell(
        &self,
        objects: &ObjectAccessor,
        cell: CellCoord,
        packets: &[Bytes],
        except: Option<Guid>,
        outbox: &mut dyn Outbox,
    ) {
        for handle in self.cell_objects(cell) {
            let Some(object) = objects.get(*handle) else {
                continue;
            };
            if !object.is_player() || Some(object.guid()) == except {
                continue;
            }
            for packet in packets {
                outbox.deliver(object.guid(), packet.clone());
            }
        }
    }

    pub fn send_to_surroundings(
        &self,
        objects: &ObjectAccessor,
        cell: CellCoord,
        packets: &[Bytes],
        except: Option<Guid>,
        outbox: &mut dyn Outbox,
    ) {
        for c in self.grid.surrounding_bounds(cell).cells() {
            self.send_to_cell(objects, c, packets, except, outbox);
        }
    }

    /// Broadcast to players around the object's current position, itself included.
    pub fn send_around(
        &self,
        objects: &ObjectAccessor,
        handle: ObjectHandle,
        packets: &[Bytes],
        outbox: &mut dyn Outbox,
    ) {
        if let Some(object) = objects.get(handle) {
            let cell = self.grid.cell_of(object.position());
            self.send_to_surroundings(objects, cell, packets, None, outbox);
        }
    }

    /// Sends a player create blocks for everything in its surroundings, itself included.
    fn send_create_surroundings(
        &self,
        objects: &ObjectAccessor,
        player: Guid,
        cell: CellCoord,
        outbox: &mut dyn Outbox,
    ) {
        let area = self.grid.surrounding_bounds(cell);
        let visible = area
            .cells()
            .flat_map(|c| self.cell_objects(c).iter())
            .filter_map(|h| objects.get(*h));
        for packet in build_create_packets(visible) {
            outbox.deliver(player, packet);
        }
    }

    /// Sends pending field changes of one object to its surroundings.
    pub fn flush_field_updates(
        &self,
        objects: &mut ObjectAccessor,
        handle: ObjectHandle,
        outbox: &mut dyn Outbox,
    ) {
        let Some(object) = objects.get_mut(handle) else {
            return;
        };
        if !object.fields().has_changes() {
            return;
        }
        let guid = object.guid();
        let changes = object.fields_mut().take_changes();
        let packets = build_update_packets(guid, &changes);
        self.send_around(objects, handle, &packets, outbox);
    }

    /// Ticks every object on the map exactly once.
    pub fn update(&mut self, tick: &mut TickContext<'_>) {
        // TODO: track active cells and skip ones without players nearby
        let handles: Vec<ObjectHandle> = self.handles().collect();
        for handle in handles {
            if !tick.objects.contains(handle) {
                continue;
            }
            unit::update_unit(self, tick, handle);
            self.flush_field_updates(tick.objects, handle, tick.outbox);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FieldType, HighGuid, MovementTypeMask};
    use crate::entities::object::WorldObject;
    use crate::network::outbox::RecordingOutbox;
    use crate::network::protocol::ServerPacket;
    use crate::world::storage::GameobjectTemplate;
    use uuid::Uuid;

    fn record() -> MapRecord {
        MapRecord {
            id: 1,
            name: "test".into(),
            size_x: 64,
            size_y: 64,
            default_field: FieldType::Ground,
            fields: Vec::new(),
            entry_point: Vec2::new(1.0, 1.0),
        }
    }

    fn spawn_player(map: &mut Map, objects: &mut ObjectAccessor, low: u32, pos: Vec2, outbox: &mut RecordingOutbox) -> ObjectHandle {
        let object = WorldObject::new_player(Guid::new(HighGuid::Player, 0, low), format!("p{}", low), Uuid::new_v4(), pos);
        let handle = objects.insert(object).unwrap();
        map.add_to_map(objects, handle, outbox).unwrap();
        handle
    }

    #[test]
    fn add_announces_both_ways() {
        let mut map = Map::new(&record());
        let mut objects = ObjectAccessor::new();
        let mut outbox = RecordingOutbox::new();
        let a = spawn_player(&mut map, &mut objects, 1, Vec2::new(2.0, 2.0), &mut outbox);
        outbox.clear();
        let b = spawn_player(&mut map, &mut objects, 2, Vec2::new(20.0, 2.0), &mut outbox);

        let guid_a = objects.get(a).unwrap().guid();
        let guid_b = objects.get(b).unwrap().guid();
        let to_a: Vec<_> = outbox.packets_for(guid_a).map(|p| ServerPacket::decode(p).unwrap()).collect();
        assert_eq!(to_a.len(), 1);
        assert!(matches!(&to_a[0], ServerPacket::Create(blocks) if blocks.len() == 1 && blocks[0].guid == guid_b));

        let to_b: Vec<_> = outbox.packets_for(guid_b).map(|p| ServerPacket::decode(p).unwrap()).collect();
        assert!(matches!(&to_b[0], ServerPacket::Create(blocks) if blocks.len() == 2));
    }

    #[test]
    fn obstacle_registration_follows_map_membership() {
        let mut map = Map::new(&record());
        let mut objects = ObjectAccessor::new();
        let mut outbox = RecordingOutbox::new();
        let template = GameobjectTemplate { entry: 5, name: "crate".into(), image_id: 0, flags: 0, collision: Some(Vec2::new(0.5, 0.5)) };
        let go = WorldObject::new_gameobject(Guid::new(HighGuid::Gameobject, 5, 1), &template, Vec2::new(10.5, 10.5));
        let handle = objects.insert(go).unwrap();

        map.add_to_map(&mut objects, handle, &mut outbox).unwrap();
        assert!(!map.walkability().is_walkable(10, 10, MovementTypeMask::WALK));
        assert!(!map.walkability().is_walkable(11, 11, MovementTypeMask::WALK));

        map.remove_from_map(&mut objects, handle, &mut outbox).unwrap();
        assert!(map.walkability().is_walkable(10, 10, MovementTypeMask::WALK));
        assert_eq!(map.object_count(), 0);
    }

    #[test]
    fn out_of_bounds_add_is_rejected() {
        let mut map = Map::new(&record());
        let mut objects = ObjectAccessor::new();
        let mut outbox = RecordingOutbox::new();
        let object = WorldObject::new_player(Guid::new(HighGuid::Player, 0, 1), "p".into(), Uuid::new_v4(), Vec2::new(64.0, 3.0));
        let handle = objects.insert(object).unwrap();
        assert!(map.add_to_map(&mut objects, handle, &mut outbox).is_err());
        assert_eq!(map.object_count(), 0);
        assert!(objects.get(handle).unwrap().map_id().is_none());
    }

    #[test]
    fn relocation_within_cell_is_silent() {
        let mut map = Map::new(&record());
        let mut objects = ObjectAccessor::new();
        let mut outbox = RecordingOutbox::new();
        let a = spawn_player(&mut map, &mut objects, 1, Vec2::new(2.0, 2.0), &mut outbox);
        spawn_player(&mut map, &mut objects, 2, Vec2::new(3.0, 3.0), &mut outbox);
        outbox.clear();

        map.move_object(&mut objects, a, Vec2::new(15.5, 15.5), &mut outbox);
        assert!(outbox.sent.is_empty());
        assert_eq!(map.cell_objects(CellCoord::new(0, 0)).len(), 2);
    }

    #[test]
    fn dirty_fields_are_flushed_to_neighbours_once() {
        use crate::entities::update_fields::UNIT_FIELD_MOVEMENT_SPEED;
        use rand::SeedableRng;

        let mut map = Map::new(&record());
        let mut objects = ObjectAccessor::new();
        let mut outbox = RecordingOutbox::new();
        let storage = WorldStorage::default();
        let mut rng = StdRng::seed_from_u64(1);
        let watcher = spawn_player(&mut map, &mut objects, 1, Vec2::new(2.0, 2.0), &mut outbox);
        let runner = spawn_player(&mut map, &mut objects, 2, Vec2::new(4.0, 4.0), &mut outbox);
        let watcher_guid = objects.get(watcher).unwrap().guid();
        let runner_guid = objects.get(runner).unwrap().guid();
        objects.get_mut(runner).unwrap().set_speed(6.0);
        outbox.clear();

        for now_ms in [0, 50] {
            let mut tick = TickContext { objects: &mut objects, storage: &storage, outbox: &mut outbox, rng: &mut rng, now_ms };
            map.update(&mut tick);
        }

        let updates: Vec<_> = outbox
            .packets_for(watcher_guid)
            .map(|p| ServerPacket::decode(p).unwrap())
            .filter(|p| matches!(p, ServerPacket::Update { .. }))
            .collect();
        assert_eq!(
            updates,
            vec![ServerPacket::Update { guid: runner_guid, changes: vec![(UNIT_FIELD_MOVEMENT_SPEED, 6.0f32.to_bits())] }]
        );
    }
}
