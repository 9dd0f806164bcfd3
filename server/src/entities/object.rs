// tileworld_server/server/src/entities/object.rs
use bytes::BufMut;
use uuid::Uuid;

use crate::core::constants::{DEFAULT_UNIT_HALF_EXTENT, DEFAULT_UNIT_SPEED};
use crate::core::types::{Guid, MoveDirection, MovementTypeMask, Vec2};
use crate::entities::update_fields::*;
use crate::systems::movement::motion_master::MotionMaster;
use crate::world::storage::{CreatureTemplate, DefaultMotion, GameobjectTemplate};

const PLAYER_BASE_HEALTH: u32 = 100;

/// Movement state shared by players and creatures.
#[derive(Debug)]
pub struct UnitState {
    pub move_direction: MoveDirection,
    pub movement_vector: Vec2,
    pub movement_mask: MovementTypeMask,
    pub last_movement_update: u64,
    pub motion: MotionMaster,
}

impl Default for UnitState {
    fn default() -> Self {
        UnitState {
            move_direction: MoveDirection::empty(),
            movement_vector: Vec2::zero(),
            movement_mask: MovementTypeMask::WALK,
            last_movement_update: 0,
            motion: MotionMaster::default(),
        }
    }
}

impl UnitState {
    pub fn is_moving(&self) -> bool {
        !self.move_direction.is_empty()
    }
}

#[derive(Debug)]
pub struct PlayerData {
    pub unit: UnitState,
    pub name: String,
    pub session_id: Uuid,
}

#[derive(Debug)]
pub struct CreatureData {
    pub unit: UnitState,
    pub spawn_position: Vec2,
    pub default_motion: DefaultMotion,
}

#[derive(Debug)]
pub struct GameobjectData {
    pub collision: Option<Vec2>,
}

#[derive(Debug)]
pub enum ObjectKind {
    Player(PlayerData),
    Creature(CreatureData),
    Gameobject(GameobjectData),
}

#[derive(Debug)]
pub struct WorldObject {
    guid: Guid,
    map_id: Option<u32>,
    position: Vec2,
    fields: UpdateFields,
    kind: ObjectKind,
}

impl WorldObject {
    fn with_kind(guid: Guid, position: Vec2, field_count: u16, kind: ObjectKind) -> Self {
        let mut fields = UpdateFields::new(field_count);
        fields.set_u64(OBJECT_FIELD_GUID, guid.raw());
        fields.set_u32(OBJECT_FIELD_ENTRY, guid.entry());
        WorldObject { guid, map_id: None, position, fields, kind }
    }

    pub fn new_player(guid: Guid, name: String, session_id: Uuid, position: Vec2) -> Self {
        let kind = ObjectKind::Player(PlayerData { unit: UnitState::default(), name, session_id });
        let mut object = Self::with_kind(guid, position, PLAYER_FIELDS_END, kind);
        object.fields.set_u32(UNIT_FIELD_LEVEL, 1);
        object.fields.set_u32(UNIT_FIELD_HEALTH, PLAYER_BASE_HEALTH);
        object.fields.set_u32(UNIT_FIELD_MAXHEALTH, PLAYER_BASE_HEALTH);
        object.fields.set_f32(UNIT_FIELD_MOVEMENT_SPEED, DEFAULT_UNIT_SPEED);
        object.fields.clear_changes();
        object
    }

    pub fn new_creature(guid: Guid, template: &CreatureTemplate, position: Vec2) -> Self {
        let kind = ObjectKind::Creature(CreatureData {
            unit: UnitState::default(),
            spawn_position: position,
            default_motion: template.default_motion.clone(),
        });
        let mut object = Self::with_kind(guid, position, CREATURE_FIELDS_END, kind);
        object.fields.set_u32(UNIT_FIELD_LEVEL, template.level);
        object.fields.set_u32(UNIT_FIELD_HEALTH, template.health);
        object.fields.set_u32(UNIT_FIELD_MAXHEALTH, template.health);
        object.fields.set_u32(UNIT_FIELD_FACTION, template.faction);
        object.fields.set_f32(UNIT_FIELD_MOVEMENT_SPEED, template.speed);
        object.fields.set_u32(UNIT_FIELD_IMAGE_ID, template.image_id);
        object.fields.clear_changes();
        object
    }

    pub fn new_gameobject(guid: Guid, template: &GameobjectTemplate, position: Vec2) -> Self {
        let kind = ObjectKind::Gameobject(GameobjectData { collision: template.collision });
        let mut object = Self::with_kind(guid, position, GAMEOBJECT_FIELDS_END, kind);
        object.fields.set_u32(GAMEOBJECT_FIELD_IMAGE_ID, template.image_id);
        object.fields.set_u32(GAMEOBJECT_FIELD_FLAGS, template.flags);
        object.fields.clear_changes();
        object
    }

    pub fn guid(&self) -> Guid { self.guid }
    pub fn position(&self) -> Vec2 { self.position }
    pub fn set_position(&mut self, position: Vec2) { self.position = position; }
    pub fn map_id(&self) -> Option<u32> { self.map_id }
    pub fn set_map_id(&mut self, map_id: Option<u32>) { self.map_id = map_id; }
    pub fn is_in_world(&self) -> bool { self.map_id.is_some() }

    pub fn fields(&self) -> &UpdateFields { &self.fields }
    pub fn fields_mut(&mut self) -> &mut UpdateFields { &mut self.fields }

    pub fn kind(&self) -> &ObjectKind { &self.kind }

    pub fn is_player(&self) -> bool { matches!(self.kind, ObjectKind::Player(_)) }

    pub fn as_player(&self) -> Option<&PlayerData> {
        match &self.kind {
            ObjectKind::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_creature(&self) -> Option<&CreatureData> {
        match &self.kind {
            ObjectKind::Creature(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_gameobject(&self) -> Option<&GameobjectData> {
        match &self.kind {
            ObjectKind::Gameobject(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_unit(&self) -> Option<&UnitState> {
        match &self.kind {
            ObjectKind::Player(p) => Some(&p.unit),
            ObjectKind::Creature(c) => Some(&c.unit),
            ObjectKind::Gameobject(_) => None,
        }
    }

    pub fn as_unit_mut(&mut self) -> Option<&mut UnitState> {
        match &mut self.kind {
            ObjectKind::Player(p) => Some(&mut p.unit),
            ObjectKind::Creature(c) => Some(&mut c.unit),
            ObjectKind::Gameobject(_) => None,
        }
    }

    pub fn speed(&self) -> f32 {
        self.fields.get_f32(UNIT_FIELD_MOVEMENT_SPEED)
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.fields.set_f32(UNIT_FIELD_MOVEMENT_SPEED, speed);
    }

    /// Collision box half extents of a blocking gameobject.
    pub fn obstacle_extent(&self) -> Option<Vec2> {
        self.as_gameobject().and_then(|g| g.collision)
    }

    pub fn half_extent(&self) -> Vec2 {
        match &self.kind {
            ObjectKind::Gameobject(g) => g.collision.unwrap_or_else(Vec2::zero),
            _ => Vec2::new(DEFAULT_UNIT_HALF_EXTENT, DEFAULT_UNIT_HALF_EXTENT),
        }
    }

    /// Euclidean gap between the two collision boxes, zero when they overlap.
    pub fn minimum_box_distance(&self, other: &WorldObject) -> f32 {
        let a = self.half_extent();
        let b = other.half_extent();
        let dx = ((self.position.x - other.position.x).abs() - (a.x + b.x)).max(0.0);
        let dy = ((self.position.y - other.position.y).abs() - (a.y + b.y)).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }

    /// Full state blob sent when the object becomes visible to a client.
    pub fn write_create_block(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.guid.raw());
        buf.put_u32_le(self.fields.len() as u32);
        for value in self.fields.values() {
            buf.put_u32_le(*value);
        }
        buf.put_f32_le(self.position.x);
        buf.put_f32_le(self.position.y);
        if let Some(unit) = self.as_unit() {
            buf.put_u8(unit.move_direction.bits());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::HighGuid;

    fn rock(collision: Option<Vec2>) -> GameobjectTemplate {
        GameobjectTemplate { entry: 20, name: "rock".into(), image_id: 3, flags: 0, collision }
    }

    #[test]
    fn unit_accessors_follow_kind() {
        let player = WorldObject::new_player(Guid::new(HighGuid::Player, 0, 1), "p".into(), Uuid::new_v4(), Vec2::new(1.0, 1.0));
        assert!(player.is_player());
        assert!(player.as_unit().is_some());
        assert_eq!(player.speed(), DEFAULT_UNIT_SPEED);
        assert!(!player.fields().has_changes());

        let go = WorldObject::new_gameobject(Guid::new(HighGuid::Gameobject, 20, 1), &rock(Some(Vec2::new(1.0, 1.0))), Vec2::zero());
        assert!(go.as_unit().is_none());
        assert_eq!(go.obstacle_extent(), Some(Vec2::new(1.0, 1.0)));
        assert_eq!(go.fields().get_u32(GAMEOBJECT_FIELD_IMAGE_ID), 3);
    }

    #[test]
    fn box_distance_subtracts_extents() {
        let a = WorldObject::new_gameobject(Guid::new(HighGuid::Gameobject, 20, 1), &rock(Some(Vec2::new(0.5, 0.5))), Vec2::new(0.0, 0.0));
        let b = WorldObject::new_gameobject(Guid::new(HighGuid::Gameobject, 20, 2), &rock(Some(Vec2::new(0.5, 0.5))), Vec2::new(4.0, 0.5));
        assert!((a.minimum_box_distance(&b) - 3.0).abs() < 1e-6);
        let c = WorldObject::new_gameobject(Guid::new(HighGuid::Gameobject, 20, 3), &rock(None), Vec2::new(0.25, 0.25));
        assert_eq!(a.minimum_box_distance(&c), 0.0);
    }

    #[test]
    fn create_block_layout() {
        let player = WorldObject::new_player(Guid::new(HighGuid::Player, 0, 9), "p".into(), Uuid::new_v4(), Vec2::new(2.0, 3.0));
        let mut buf = Vec::new();
        player.write_create_block(&mut buf);
        assert_eq!(buf.len(), 8 + 4 + 4 * PLAYER_FIELDS_END as usize + 8 + 1);
        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), player.guid().raw());
    }
}
