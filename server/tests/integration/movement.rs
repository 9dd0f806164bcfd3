// tileworld_server/server/tests/integration/movement.rs

use rand::rngs::StdRng;
use rand::SeedableRng;

use tileworld_server_core::core::config::ServerConfig;
use tileworld_server_core::core::types::{Guid, HighGuid, MoveDirection, Vec2};
use tileworld_server_core::entities::accessor::{ObjectAccessor, ObjectHandle};
use tileworld_server_core::entities::object::WorldObject;
use tileworld_server_core::network::outbox::RecordingOutbox;
use tileworld_server_core::network::protocol::{ClientCommand, ServerPacket};
use tileworld_server_core::systems::movement::motion_master::{MotionKind, MotionMaster};
use tileworld_server_core::world::map::TickContext;
use tileworld_server_core::world::map_manager::MapManager;
use tileworld_server_core::world::storage::WorldStorage;
use tileworld_server_core::WorldServer;

const WORLD: &str = r#"
maps:
  - { id: 1, name: valley, size_x: 32, size_y: 32 }
  - { id: 2, name: corridor, size_x: 200, size_y: 8 }
creature_templates:
  - { entry: 1, name: walker, speed: 4.0 }
  - entry: 2
    name: patrol
    default_motion: { type: waypoint, path_id: 1 }
creature_spawns:
  - { guid_low: 100, entry: 2, map_id: 1, x: 2.5, y: 2.5 }
waypoint_paths:
  - id: 1
    points:
      - { x: 5.5, y: 2.5 }
      - { x: 5.5, y: 5.5 }
"#;

const TICK_MS: u64 = 50;

struct Sim {
    maps: MapManager,
    objects: ObjectAccessor,
    storage: WorldStorage,
    outbox: RecordingOutbox,
    rng: StdRng,
    now_ms: u64,
}

impl Sim {
    fn new() -> Self {
        let storage = WorldStorage::from_yaml_str(WORLD).unwrap();
        let mut objects = ObjectAccessor::new();
        let mut outbox = RecordingOutbox::new();
        let mut maps = MapManager::new();
        maps.get_or_create(1, &storage, &mut objects, &mut outbox).unwrap();
        Sim { maps, objects, storage, outbox, rng: StdRng::seed_from_u64(3), now_ms: 0 }
    }

    fn spawn_walker(&mut self, low: u32, pos: Vec2) -> ObjectHandle {
        self.spawn_walker_on(1, low, pos)
    }

    fn spawn_walker_on(&mut self, map_id: u32, low: u32, pos: Vec2) -> ObjectHandle {
        let template = self.storage.creature_template(1).unwrap();
        let creature = WorldObject::new_creature(Guid::new(HighGuid::Creature, 1, low), template, pos);
        let handle = self.objects.insert(creature).unwrap();
        let map = self.maps.get_or_create(map_id, &self.storage, &mut self.objects, &mut self.outbox).unwrap();
        map.add_to_map(&mut self.objects, handle, &mut self.outbox).unwrap();
        handle
    }

    fn motion(&mut self, handle: ObjectHandle) -> &mut MotionMaster {
        &mut self.objects.get_mut(handle).unwrap().as_unit_mut().unwrap().motion
    }

    fn position(&self, handle: ObjectHandle) -> Vec2 {
        self.objects.get(handle).unwrap().position()
    }

    fn kind(&self, handle: ObjectHandle) -> MotionKind {
        self.objects.get(handle).unwrap().as_unit().unwrap().motion.current_kind()
    }

    fn tick(&mut self) {
        let mut tick = TickContext {
            objects: &mut self.objects,
            storage: &self.storage,
            outbox: &mut self.outbox,
            rng: &mut self.rng,
            now_ms: self.now_ms,
        };
        self.maps.update(&mut tick);
        self.now_ms += TICK_MS;
    }

    fn run_for(&mut self, ms: u64) {
        let end = self.now_ms + ms;
        while self.now_ms <= end {
            self.tick();
        }
    }
}

fn near(a: Vec2, b: Vec2, tolerance: f32) -> bool {
    a.distance(&b) <= tolerance
}

#[test]
fn point_movement_walks_to_target_and_idles() {
    let mut sim = Sim::new();
    let walker = sim.spawn_walker(1, Vec2::new(2.5, 10.5));
    sim.motion(walker).move_point(Vec2::new(6.5, 10.5));

    sim.tick();
    assert_eq!(sim.kind(walker), MotionKind::Point);
    sim.run_for(1500);

    assert!(near(sim.position(walker), Vec2::new(6.5, 10.5), 0.25), "ended at {:?}", sim.position(walker));
    assert_eq!(sim.kind(walker), MotionKind::Idle);
    assert!(sim.objects.get(walker).unwrap().as_unit().unwrap().move_direction.is_empty());
}

#[test]
fn distant_target_is_reached_through_repeated_searches() {
    let mut sim = Sim::new();
    let walker = sim.spawn_walker_on(2, 1, Vec2::new(2.5, 4.5));
    let target = Vec2::new(190.5, 4.5);
    sim.motion(walker).move_point(target);

    sim.tick();
    assert_eq!(sim.kind(walker), MotionKind::Point);
    sim.run_for(30_000);
    assert!(sim.position(walker).x > 90.0, "stalled at {:?}", sim.position(walker));
    assert_eq!(sim.kind(walker), MotionKind::Point);

    sim.run_for(30_000);
    assert!(near(sim.position(walker), target, 0.3), "ended at {:?}", sim.position(walker));
    assert_eq!(sim.kind(walker), MotionKind::Idle);
}

#[test]
fn requests_within_one_tick_cause_a_single_swap() {
    let mut sim = Sim::new();
    let walker = sim.spawn_walker(1, Vec2::new(2.5, 10.5));
    sim.motion(walker).move_idle();
    sim.motion(walker).move_point(Vec2::new(8.5, 10.5));
    sim.tick();

    let motion = &sim.objects.get(walker).unwrap().as_unit().unwrap().motion;
    assert_eq!(motion.generator_changes(), 1);
    assert_eq!(motion.current_kind(), MotionKind::Point);
}

#[test]
fn spawned_patrol_walks_its_waypoint_path() {
    let mut sim = Sim::new();
    let patrol = sim.objects.find(Guid::new(HighGuid::Creature, 2, 100)).unwrap();

    sim.tick();
    assert_eq!(sim.kind(patrol), MotionKind::Waypoint);
    sim.run_for(700);
    assert!(near(sim.position(patrol), Vec2::new(5.5, 2.5), 0.3), "at {:?}", sim.position(patrol));

    sim.run_for(2000);
    assert!(near(sim.position(patrol), Vec2::new(5.5, 5.5), 0.3), "at {:?}", sim.position(patrol));
    assert_eq!(sim.kind(patrol), MotionKind::Idle);
}

#[test]
fn follower_keeps_up_with_a_moving_target() {
    let mut sim = Sim::new();
    let follower = sim.spawn_walker(1, Vec2::new(2.5, 20.5));
    let target = sim.spawn_walker(2, Vec2::new(10.5, 20.5));
    let target_guid = sim.objects.get(target).unwrap().guid();

    sim.motion(follower).move_follow(target_guid, 1.0, 2.0);
    sim.run_for(2500);
    assert!(near(sim.position(follower), Vec2::new(9.5, 20.5), 0.3), "at {:?}", sim.position(follower));

    let map = sim.maps.get_mut(1).unwrap();
    map.move_object(&mut sim.objects, target, Vec2::new(20.5, 20.5), &mut sim.outbox);
    sim.run_for(4000);

    let gap = sim.objects.get(follower).unwrap().minimum_box_distance(sim.objects.get(target).unwrap());
    assert!(gap <= 2.0, "gap {}", gap);
    assert_eq!(sim.kind(follower), MotionKind::Follow);
}

#[test]
fn follow_ends_when_target_leaves() {
    let mut sim = Sim::new();
    let follower = sim.spawn_walker(1, Vec2::new(2.5, 20.5));
    let target = sim.spawn_walker(2, Vec2::new(3.5, 20.5));
    let target_guid = sim.objects.get(target).unwrap().guid();

    sim.motion(follower).move_follow(target_guid, 1.0, 2.0);
    sim.tick();
    assert_eq!(sim.kind(follower), MotionKind::Follow);

    let map = sim.maps.get_mut(1).unwrap();
    map.remove_from_map(&mut sim.objects, target, &mut sim.outbox).unwrap();
    sim.objects.remove(target);
    sim.run_for(1000);

    assert_eq!(sim.kind(follower), MotionKind::Idle);
}

#[test]
fn random_movement_stays_near_its_origin() {
    let mut sim = Sim::new();
    let origin = Vec2::new(16.5, 16.5);
    let wanderer = sim.spawn_walker(1, origin);
    sim.motion(wanderer).move_random(None, 3.0, 100, 300);

    let mut moved = false;
    for _ in 0..200 {
        sim.tick();
        let position = sim.position(wanderer);
        assert!(position.distance(&origin) <= 4.5, "strayed to {:?}", position);
        moved |= position != origin;
    }
    assert!(moved);
    assert_eq!(sim.kind(wanderer), MotionKind::Random);
}

#[test]
fn session_key_presses_are_seen_by_neighbours() {
    let storage = WorldStorage::from_yaml_str(WORLD).unwrap();
    let config = ServerConfig { rng_seed: Some(9), ..ServerConfig::default() };
    let mut world = WorldServer::new(config, storage).unwrap();

    let alice = world.sessions().open();
    let bob = world.sessions().open();
    alice.push_command(ClientCommand::EnterWorld { guid_low: 1, name: "alice".into(), map_id: 1, position: Vec2::new(10.5, 10.5) });
    bob.push_command(ClientCommand::EnterWorld { guid_low: 2, name: "bob".into(), map_id: 1, position: Vec2::new(12.5, 10.5) });
    world.process_tick(0);
    bob.drain_outbound();

    alice.push_command(ClientCommand::MoveStartDirection { direction: MoveDirection::DOWN });
    world.process_tick(50);

    let alice_guid = world.player_of(&alice.id()).unwrap();
    let seen: Vec<ServerPacket> = bob.drain_outbound().iter().map(|p| ServerPacket::decode(p).unwrap()).collect();
    assert!(seen.contains(&ServerPacket::MoveStart { guid: alice_guid, direction: MoveDirection::DOWN }));

    alice.push_command(ClientCommand::MoveStopDirection { direction: MoveDirection::DOWN, position: Vec2::new(10.5, 11.0) });
    world.process_tick(100);
    let seen: Vec<ServerPacket> = bob.drain_outbound().iter().map(|p| ServerPacket::decode(p).unwrap()).collect();
    assert!(seen.contains(&ServerPacket::MoveStop {
        guid: alice_guid,
        direction: MoveDirection::DOWN,
        position: Vec2::new(10.5, 11.0),
    }));
    assert_eq!(world.objects().find_object(alice_guid).unwrap().position(), Vec2::new(10.5, 11.0));
}
