// tileworld_server/server/src/systems/movement/mod.rs
pub mod generators;
pub mod motion_master;
pub mod pathfinding;
pub mod unit;

use rand::rngs::StdRng;

use crate::core::types::{Guid, MoveDirection, MovementTypeMask, Vec2};
use crate::entities::accessor::{ObjectAccessor, ObjectHandle};
use crate::entities::object::WorldObject;
use crate::network::outbox::Outbox;
use crate::world::map::{Map, TickContext};
use crate::world::storage::WorldStorage;
use pathfinding::{find_path, Path, PathfindError};

/// View of the world handed to a unit's motion generators during its update.
pub struct MotionContext<'a> {
    pub owner: ObjectHandle,
    pub map: &'a mut Map,
    pub objects: &'a mut ObjectAccessor,
    pub storage: &'a WorldStorage,
    pub outbox: &'a mut dyn Outbox,
    pub rng: &'a mut StdRng,
    pub now_ms: u64,
}

impl<'a> MotionContext<'a> {
    pub fn new(map: &'a mut Map, tick: &'a mut TickContext<'_>, owner: ObjectHandle) -> Self {
        MotionContext {
            owner,
            map,
            objects: &mut *tick.objects,
            storage: tick.storage,
            outbox: &mut *tick.outbox,
            rng: &mut *tick.rng,
            now_ms: tick.now_ms,
        }
    }

    pub fn owner(&self) -> Option<&WorldObject> {
        self.objects.get(self.owner)
    }

    pub fn owner_guid(&self) -> Guid {
        self.owner().map(|o| o.guid()).unwrap_or_default()
    }

    pub fn owner_position(&self) -> Vec2 {
        self.owner().map(|o| o.position()).unwrap_or_else(Vec2::zero)
    }

    pub fn owner_speed(&self) -> f32 {
        self.owner().map(|o| o.speed()).unwrap_or(0.0)
    }

    pub fn owner_movement_mask(&self) -> MovementTypeMask {
        self.owner()
            .and_then(|o| o.as_unit())
            .map(|u| u.movement_mask)
            .unwrap_or(MovementTypeMask::WALK)
    }

    pub fn owner_spawn_position(&self) -> Option<Vec2> {
        self.owner().and_then(|o| o.as_creature()).map(|c| c.spawn_position)
    }

    pub fn find_path(&self, destination: Vec2) -> Result<Path, PathfindError> {
        find_path(self.map.walkability(), self.owner_position(), destination, self.owner_movement_mask())
    }

    pub fn start_moving(&mut self, direction: MoveDirection) -> bool {
        unit::start_moving(self.map, self.objects, self.owner, direction, self.now_ms, self.outbox)
    }

    pub fn stop_moving(&mut self, direction: MoveDirection) -> bool {
        unit::stop_moving(self.map, self.objects, self.owner, direction, self.outbox)
    }
}
