// tileworld_server/server/tests/integration/interest_management.rs

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use tileworld_server_core::core::constants::UPDATEPACKET_COUNT_LIMIT;
use tileworld_server_core::core::types::{FieldType, Guid, HighGuid, Vec2};
use tileworld_server_core::entities::accessor::{ObjectAccessor, ObjectHandle};
use tileworld_server_core::entities::object::WorldObject;
use tileworld_server_core::network::outbox::RecordingOutbox;
use tileworld_server_core::network::protocol::ServerPacket;
use tileworld_server_core::world::grid::CellCoord;
use tileworld_server_core::world::map::Map;
use tileworld_server_core::world::storage::{CreatureTemplate, DefaultMotion, MapRecord};

fn map_record(size: u32) -> MapRecord {
    MapRecord {
        id: 1,
        name: "plains".into(),
        size_x: size,
        size_y: size,
        default_field: FieldType::Ground,
        fields: Vec::new(),
        entry_point: Vec2::new(1.0, 1.0),
    }
}

fn wolf() -> CreatureTemplate {
    CreatureTemplate {
        entry: 30,
        name: "wolf".into(),
        level: 3,
        health: 40,
        faction: 2,
        speed: 4.0,
        image_id: 9,
        default_motion: DefaultMotion::Idle,
    }
}

fn add_player(map: &mut Map, objects: &mut ObjectAccessor, low: u32, pos: Vec2, outbox: &mut RecordingOutbox) -> ObjectHandle {
    let player = WorldObject::new_player(Guid::new(HighGuid::Player, 0, low), format!("player{}", low), Uuid::new_v4(), pos);
    let handle = objects.insert(player).unwrap();
    map.add_to_map(objects, handle, outbox).unwrap();
    handle
}

fn add_creature(map: &mut Map, objects: &mut ObjectAccessor, low: u32, pos: Vec2, outbox: &mut RecordingOutbox) -> ObjectHandle {
    let creature = WorldObject::new_creature(Guid::new(HighGuid::Creature, 30, low), &wolf(), pos);
    let handle = objects.insert(creature).unwrap();
    map.add_to_map(objects, handle, outbox).unwrap();
    handle
}

fn assert_cell_containment(map: &Map, objects: &ObjectAccessor, handles: &[ObjectHandle]) {
    for handle in handles {
        let position = objects.get(*handle).unwrap().position();
        let cell = map.grid().cell_of(position);
        let hits = map.cell_objects(cell).iter().filter(|h| *h == handle).count();
        assert_eq!(hits, 1, "object at {:?} not in cell ({}, {})", position, cell.x, cell.y);
    }
    assert_eq!(map.object_count(), handles.len());
}

#[test]
fn objects_stay_in_the_cell_of_their_position() {
    let mut map = Map::new(&map_record(128));
    let mut objects = ObjectAccessor::new();
    let mut outbox = RecordingOutbox::new();
    let mut rng = StdRng::seed_from_u64(42);

    let mut handles = Vec::new();
    for low in 1..=20 {
        let pos = Vec2::new(rng.gen_range(0.0..128.0), rng.gen_range(0.0..128.0));
        handles.push(if low % 2 == 0 {
            add_player(&mut map, &mut objects, low, pos, &mut outbox)
        } else {
            add_creature(&mut map, &mut objects, low, pos, &mut outbox)
        });
    }
    assert_cell_containment(&map, &objects, &handles);

    for _ in 0..500 {
        let handle = handles[rng.gen_range(0..handles.len())];
        let old = objects.get(handle).unwrap().position();
        let new = Vec2::new(
            (old.x + rng.gen_range(-20.0..20.0)).clamp(0.0, 127.9),
            (old.y + rng.gen_range(-20.0..20.0)).clamp(0.0, 127.9),
        );
        map.move_object(&mut objects, handle, new, &mut outbox);
        assert_cell_containment(&map, &objects, &handles);
    }
}

fn recipients_of(outbox: &RecordingOutbox, pred: impl Fn(&ServerPacket) -> bool) -> BTreeSet<Guid> {
    outbox
        .sent
        .iter()
        .filter(|(_, packet)| pred(&ServerPacket::decode(packet).unwrap()))
        .map(|(recipient, _)| *recipient)
        .collect()
}

#[test]
fn crossing_a_cell_boundary_notifies_only_the_difference() {
    // 8x8 cells, one observer per cell
    let mut map = Map::new(&map_record(128));
    let mut objects = ObjectAccessor::new();
    let mut outbox = RecordingOutbox::new();

    let mut observer_cells = Vec::new();
    let mut low = 1;
    for cx in 0..8 {
        for cy in 0..8 {
            let pos = Vec2::new(cx as f32 * 16.0 + 8.0, cy as f32 * 16.0 + 8.0);
            add_player(&mut map, &mut objects, low, pos, &mut outbox);
            observer_cells.push((Guid::new(HighGuid::Player, 0, low), CellCoord::new(cx, cy)));
            low += 1;
        }
    }
    let mover = add_creature(&mut map, &mut objects, 1, Vec2::new(40.5, 40.5), &mut outbox);
    let mover_guid = objects.get(mover).unwrap().guid();
    outbox.clear();

    map.move_object(&mut objects, mover, Vec2::new(50.5, 40.5), &mut outbox);

    let old_area = map.grid().surrounding_bounds(CellCoord::new(2, 2));
    let new_area = map.grid().surrounding_bounds(CellCoord::new(3, 2));
    let expected_destroy: BTreeSet<Guid> = observer_cells
        .iter()
        .filter(|(_, c)| old_area.contains(*c) && !new_area.contains(*c))
        .map(|(g, _)| *g)
        .collect();
    let expected_create: BTreeSet<Guid> = observer_cells
        .iter()
        .filter(|(_, c)| new_area.contains(*c) && !old_area.contains(*c))
        .map(|(g, _)| *g)
        .collect();

    let destroyed = recipients_of(&outbox, |p| matches!(p, ServerPacket::Destroy(guids) if guids.contains(&mover_guid)));
    let created = recipients_of(&outbox, |p| {
        matches!(p, ServerPacket::Create(blocks) if blocks.iter().any(|b| b.guid == mover_guid))
    });

    assert_eq!(expected_destroy.len(), 3);
    assert_eq!(destroyed, expected_destroy);
    assert_eq!(created, expected_create);
    // the creature itself never receives anything
    assert_eq!(outbox.packets_for(mover_guid).count(), 0);
}

#[test]
fn player_moving_across_cells_learns_about_new_neighbours() {
    let mut map = Map::new(&map_record(128));
    let mut objects = ObjectAccessor::new();
    let mut outbox = RecordingOutbox::new();

    let far = add_creature(&mut map, &mut objects, 1, Vec2::new(60.5, 8.5), &mut outbox);
    let near = add_creature(&mut map, &mut objects, 2, Vec2::new(4.5, 8.5), &mut outbox);
    let player = add_player(&mut map, &mut objects, 1, Vec2::new(20.5, 8.5), &mut outbox);
    let player_guid = objects.get(player).unwrap().guid();
    let far_guid = objects.get(far).unwrap().guid();
    let near_guid = objects.get(near).unwrap().guid();
    outbox.clear();

    // cell 1 -> cell 2: cell 3 (far creature) enters, cell 0 (near creature) leaves
    map.move_object(&mut objects, player, Vec2::new(36.5, 8.5), &mut outbox);

    let to_player: Vec<ServerPacket> = outbox.packets_for(player_guid).map(|p| ServerPacket::decode(p).unwrap()).collect();
    assert!(to_player.contains(&ServerPacket::Destroy(vec![near_guid])));
    assert!(to_player
        .iter()
        .any(|p| matches!(p, ServerPacket::Create(blocks) if blocks.len() == 1 && blocks[0].guid == far_guid)));
}

#[test]
fn surroundings_create_is_split_into_fixed_batches() {
    let mut map = Map::new(&map_record(64));
    let mut objects = ObjectAccessor::new();
    let mut outbox = RecordingOutbox::new();

    let total = 2 * UPDATEPACKET_COUNT_LIMIT + 1;
    for i in 0..(total - 1) as u32 {
        let pos = Vec2::new((i % 16) as f32 + 0.5, (i / 16) as f32 + 0.5);
        add_creature(&mut map, &mut objects, i + 1, pos, &mut outbox);
    }
    outbox.clear();

    // the entering player sees every creature plus itself
    let player = add_player(&mut map, &mut objects, 1, Vec2::new(8.5, 12.5), &mut outbox);
    let player_guid = objects.get(player).unwrap().guid();

    let packets: Vec<_> = outbox.packets_for(player_guid).collect();
    let counts: Vec<usize> = packets
        .iter()
        .map(|p| match ServerPacket::decode(p).unwrap() {
            ServerPacket::Create(blocks) => blocks.len(),
            other => panic!("unexpected packet {:?}", other),
        })
        .collect();
    assert_eq!(counts, vec![UPDATEPACKET_COUNT_LIMIT, UPDATEPACKET_COUNT_LIMIT, 1]);
    assert_eq!(counts.iter().sum::<usize>(), total);
    // the count byte follows the opcode
    assert_eq!(packets[2][1], 1);
}
