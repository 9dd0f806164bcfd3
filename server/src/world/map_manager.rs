// tileworld_server/server/src/world/map_manager.rs
use ahash::AHashMap;
use tracing::{error, info, warn};

use crate::core::types::{Guid, HighGuid, Vec2};
use crate::entities::accessor::{ObjectAccessor, ObjectHandle};
use crate::entities::object::WorldObject;
use crate::network::outbox::Outbox;
use crate::world::map::{Map, TickContext};
use crate::world::storage::{DefaultMotion, WorldStorage};

/// Owns every live map instance. Maps are built on first use.
#[derive(Default)]
pub struct MapManager {
    maps: AHashMap<u32, Map>,
}

impl MapManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Map> {
        self.maps.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Map> {
        self.maps.get_mut(&id)
    }

    pub fn map_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.maps.keys().copied()
    }

    /// Returns the map, creating it and placing its static spawns first if needed.
    /// `None` when no map record with that id exists.
    pub fn get_or_create(
        &mut self,
        id: u32,
        storage: &WorldStorage,
        objects: &mut ObjectAccessor,
        outbox: &mut dyn Outbox,
    ) -> Option<&mut Map> {
        if !self.maps.contains_key(&id) {
            let Some(record) = storage.map(id) else {
                error!("Map {} requested but no map record exists", id);
                return None;
            };
            let mut map = Map::new(record);
            Self::init_contents(&mut map, storage, objects, outbox);
            info!("Map {} ({}) created with {} objects", id, record.name, map.object_count());
            self.maps.insert(id, map);
        }
        self.maps.get_mut(&id)
    }

    fn init_contents(map: &mut Map, storage: &WorldStorage, objects: &mut ObjectAccessor, outbox: &mut dyn Outbox) {
        for spawn in storage.creature_spawns(map.id()) {
            let Some(template) = storage.creature_template(spawn.entry) else {
                warn!("Creature spawn {} references missing template {}", spawn.guid_low, spawn.entry);
                continue;
            };
            let guid = Guid::new(HighGuid::Creature, spawn.entry, spawn.guid_low);
            let position = Vec2::new(spawn.x, spawn.y);
            let Some(handle) = Self::place(map, objects, WorldObject::new_creature(guid, template, position), outbox) else {
                continue;
            };

            let Some(unit) = objects.get_mut(handle).and_then(|o| o.as_unit_mut()) else {
                continue;
            };
            match &template.default_motion {
                DefaultMotion::Idle => {}
                DefaultMotion::Random { radius, min_delay_ms, max_delay_ms } => {
                    unit.motion.move_random(Some(position), *radius, *min_delay_ms, *max_delay_ms);
                }
                DefaultMotion::Waypoint { path_id } => unit.motion.move_waypoint_path(*path_id),
            }
        }

        for spawn in storage.gameobject_spawns(map.id()) {
            let Some(template) = storage.gameobject_template(spawn.entry) else {
                warn!("Gameobject spawn {} references missing template {}", spawn.guid_low, spawn.entry);
                continue;
            };
            let guid = Guid::new(HighGuid::Gameobject, spawn.entry, spawn.guid_low);
            let object = WorldObject::new_gameobject(guid, template, Vec2::new(spawn.x, spawn.y));
            Self::place(map, objects, object, outbox);
        }
    }

    fn place(map: &mut Map, objects: &mut ObjectAccessor, object: WorldObject, outbox: &mut dyn Outbox) -> Option<ObjectHandle> {
        let guid = object.guid();
        let handle = match objects.insert(object) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Spawn {} skipped: {}", guid, e);
                return None;
            }
        };
        if let Err(e) = map.add_to_map(objects, handle, outbox) {
            warn!("Spawn {} skipped: {}", guid, e);
            objects.remove(handle);
            return None;
        }
        Some(handle)
    }

    /// One simulation step for every live map.
    pub fn update(&mut self, tick: &mut TickContext<'_>) {
        for map in self.maps.values_mut() {
            map.update(tick);
        }
    }
}
