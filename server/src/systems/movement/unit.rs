// tileworld_server/server/src/systems/movement/unit.rs
//
// Direction-key movement shared by players and creatures.

use std::mem;

use tracing::trace;

use crate::core::types::MoveDirection;
use crate::entities::accessor::{ObjectAccessor, ObjectHandle};
use crate::network::outbox::Outbox;
use crate::network::protocol::{build_move_start, build_move_stop};
use crate::systems::movement::MotionContext;
use crate::world::map::{Map, TickContext};

/// Presses direction keys. Broadcasts only when at least one key was not held yet.
pub fn start_moving(
    map: &Map,
    objects: &mut ObjectAccessor,
    handle: ObjectHandle,
    direction: MoveDirection,
    now_ms: u64,
    outbox: &mut dyn Outbox,
) -> bool {
    let Some(object) = objects.get_mut(handle) else {
        return false;
    };
    let speed = object.speed();
    let guid = object.guid();
    let Some(unit) = object.as_unit_mut() else {
        return false;
    };
    if unit.move_direction.contains(direction) {
        return false;
    }
    if unit.move_direction.is_empty() {
        unit.last_movement_update = now_ms;
    }
    unit.move_direction |= direction;
    unit.movement_vector = unit.move_direction.movement_vector(speed);

    map.send_around(objects, handle, &[build_move_start(guid, direction)], outbox);
    true
}

/// Releases direction keys. Broadcasts only when at least one of them was held.
pub fn stop_moving(
    map: &Map,
    objects: &mut ObjectAccessor,
    handle: ObjectHandle,
    direction: MoveDirection,
    outbox: &mut dyn Outbox,
) -> bool {
    let Some(object) = objects.get_mut(handle) else {
        return false;
    };
    let speed = object.speed();
    let guid = object.guid();
    let position = object.position();
    let Some(unit) = object.as_unit_mut() else {
        return false;
    };
    if !unit.move_direction.intersects(direction) {
        return false;
    }
    unit.move_direction.remove(direction);
    unit.movement_vector = unit.move_direction.movement_vector(speed);

    map.send_around(objects, handle, &[build_move_stop(guid, direction, position)], outbox);
    true
}

/// Advances a moving unit by the time since its last integration. Each axis
/// is stepped on its own and reverted when it would leave walkable ground.
pub fn integrate_movement(
    map: &mut Map,
    objects: &mut ObjectAccessor,
    handle: ObjectHandle,
    now_ms: u64,
    outbox: &mut dyn Outbox,
) {
    let Some(object) = objects.get_mut(handle) else {
        return;
    };
    let old = object.position();
    let Some(unit) = object.as_unit_mut() else {
        return;
    };
    if !unit.is_moving() {
        return;
    }
    let elapsed = now_ms.saturating_sub(unit.last_movement_update);
    unit.last_movement_update = now_ms;
    if elapsed == 0 {
        return;
    }

    let velocity = unit.movement_vector;
    let mask = unit.movement_mask;
    let walkability = map.walkability();
    let mut position = old;

    position.x = (position.x + velocity.x * elapsed as f32).max(0.0);
    if !walkability.is_walkable_at(position, mask) {
        position.x = old.x;
    }
    position.y = (position.y + velocity.y * elapsed as f32).max(0.0);
    if !walkability.is_walkable_at(position, mask) {
        position.y = old.y;
    }

    if position != old {
        map.move_object(objects, handle, position, outbox);
    }
}

/// Per-tick update of one object: movement integration, then its motion generator.
pub fn update_unit(map: &mut Map, tick: &mut TickContext<'_>, handle: ObjectHandle) {
    integrate_movement(map, tick.objects, handle, tick.now_ms, tick.outbox);

    // The motion master is lifted out of the object so generators can borrow the arena.
    let Some(mut motion) = tick
        .objects
        .get_mut(handle)
        .and_then(|o| o.as_unit_mut())
        .map(|u| mem::take(&mut u.motion))
    else {
        return;
    };

    {
        let mut ctx = MotionContext::new(map, tick, handle);
        motion.update(&mut ctx);
    }

    match tick.objects.get_mut(handle).and_then(|o| o.as_unit_mut()) {
        Some(unit) => unit.motion = motion,
        None => trace!("Object vanished during its motion update"),
    }
}

