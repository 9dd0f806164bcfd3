// tileworld_server/server/src/systems/movement/motion_master.rs
use metrics::counter;
use tracing::debug;

use crate::core::types::{Guid, Vec2};
use crate::systems::movement::generators::{
    FollowMovement, MotionOutcome, PointMovement, RandomMovement, WaypointMovement,
};
use crate::systems::movement::MotionContext;

/// A change of movement behaviour, applied at the next motion update.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionRequest {
    Idle,
    Point { target: Vec2 },
    WaypointPath { path_id: u32 },
    Random { origin: Option<Vec2>, radius: f32, min_delay_ms: u64, max_delay_ms: u64 },
    Follow { target: Guid, follow_distance: f32, max_distance: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Idle,
    Point,
    Waypoint,
    Random,
    Follow,
}

#[derive(Debug, Default)]
enum MotionGenerator {
    #[default]
    Idle,
    Point(PointMovement),
    Waypoint(WaypointMovement),
    Random(RandomMovement),
    Follow(FollowMovement),
}

impl MotionGenerator {
    fn kind(&self) -> MotionKind {
        match self {
            MotionGenerator::Idle => MotionKind::Idle,
            MotionGenerator::Point(_) => MotionKind::Point,
            MotionGenerator::Waypoint(_) => MotionKind::Waypoint,
            MotionGenerator::Random(_) => MotionKind::Random,
            MotionGenerator::Follow(_) => MotionKind::Follow,
        }
    }

    /// Builds the generator for `request` and kicks it off.
    fn start(request: MotionRequest, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) -> Self {
        match request {
            MotionRequest::Idle => MotionGenerator::Idle,
            MotionRequest::Point { target } => {
                let mut g = PointMovement::new();
                g.set_target(ctx, target, out);
                MotionGenerator::Point(g)
            }
            MotionRequest::WaypointPath { path_id } => {
                let mut g = WaypointMovement::new();
                g.start(ctx, path_id, out);
                MotionGenerator::Waypoint(g)
            }
            MotionRequest::Random { origin, radius, min_delay_ms, max_delay_ms } => {
                let mut g = RandomMovement::new();
                g.start(ctx, origin, radius, min_delay_ms, max_delay_ms);
                MotionGenerator::Random(g)
            }
            MotionRequest::Follow { target, follow_distance, max_distance } => {
                let mut g = FollowMovement::new();
                g.start(ctx, target, follow_distance, max_distance, out);
                MotionGenerator::Follow(g)
            }
        }
    }

    fn update(&mut self, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) {
        match self {
            MotionGenerator::Idle => {}
            MotionGenerator::Point(g) => g.update(ctx, out),
            MotionGenerator::Waypoint(g) => g.update(ctx, out),
            MotionGenerator::Random(g) => g.update(ctx, out),
            MotionGenerator::Follow(g) => g.update(ctx, out),
        }
    }

    fn finalize(&mut self, ctx: &mut MotionContext<'_>) {
        match self {
            MotionGenerator::Idle => {}
            MotionGenerator::Point(g) => g.finalize(ctx),
            MotionGenerator::Waypoint(g) => g.finalize(ctx),
            MotionGenerator::Random(g) => g.finalize(ctx),
            MotionGenerator::Follow(g) => g.finalize(ctx),
        }
    }
}

/// Per-unit owner of the active motion generator.
///
/// Requests are parked in a single slot and take effect after the current
/// generator's update, so a generator is never replaced while it runs. A
/// newer request overwrites an older one that has not been applied yet.
#[derive(Debug, Default)]
pub struct MotionMaster {
    generator: MotionGenerator,
    pending: Option<MotionRequest>,
    swaps: u64,
}

impl MotionMaster {
    pub fn current_kind(&self) -> MotionKind {
        self.generator.kind()
    }

    pub fn pending(&self) -> Option<&MotionRequest> {
        self.pending.as_ref()
    }

    /// How many times the active generator has been replaced.
    pub fn generator_changes(&self) -> u64 {
        self.swaps
    }

    pub fn move_idle(&mut self) {
        self.request(MotionRequest::Idle);
    }

    pub fn move_point(&mut self, target: Vec2) {
        self.request(MotionRequest::Point { target });
    }

    pub fn move_waypoint_path(&mut self, path_id: u32) {
        self.request(MotionRequest::WaypointPath { path_id });
    }

    pub fn move_random(&mut self, origin: Option<Vec2>, radius: f32, min_delay_ms: u64, max_delay_ms: u64) {
        self.request(MotionRequest::Random { origin, radius, min_delay_ms, max_delay_ms });
    }

    pub fn move_follow(&mut self, target: Guid, follow_distance: f32, max_distance: f32) {
        self.request(MotionRequest::Follow { target, follow_distance, max_distance });
    }

    pub fn request(&mut self, request: MotionRequest) {
        self.pending = Some(request);
    }

    pub fn update(&mut self, ctx: &mut MotionContext<'_>) {
        let mut out = MotionOutcome::default();
        self.generator.update(ctx, &mut out);
        if out.terminated && self.pending.is_none() {
            self.pending = Some(MotionRequest::Idle);
        }

        if let Some(request) = self.pending.take() {
            self.change_to(ctx, request);
        }
    }

    /// Stops whatever is running, e.g. when the owner leaves the world.
    pub fn finalize(&mut self, ctx: &mut MotionContext<'_>) {
        self.generator.finalize(ctx);
        self.generator = MotionGenerator::Idle;
        self.pending = None;
    }

    fn change_to(&mut self, ctx: &mut MotionContext<'_>, request: MotionRequest) {
        let from = self.generator.kind();
        self.generator.finalize(ctx);

        let mut out = MotionOutcome::default();
        self.generator = MotionGenerator::start(request, ctx, &mut out);
        self.swaps += 1;
        counter!("motion_generator_swaps_total").increment(1);
        debug!("{}: motion {:?} -> {:?}", ctx.owner_guid(), from, self.generator.kind());

        if out.terminated && self.pending.is_none() {
            // fell over during kickoff; settle into idle next tick
            self.pending = Some(MotionRequest::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FieldType, HighGuid, MoveDirection};
    use crate::entities::accessor::{ObjectAccessor, ObjectHandle};
    use crate::entities::object::WorldObject;
    use crate::network::outbox::RecordingOutbox;
    use crate::world::map::{Map, TickContext};
    use crate::world::storage::{MapRecord, WorldStorage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    struct Harness {
        map: Map,
        objects: ObjectAccessor,
        storage: WorldStorage,
        outbox: RecordingOutbox,
        rng: StdRng,
        handle: ObjectHandle,
    }

    impl Harness {
        fn new() -> Self {
            let record = MapRecord {
                id: 1,
                name: "field".into(),
                size_x: 32,
                size_y: 32,
                default_field: FieldType::Ground,
                fields: Vec::new(),
                entry_point: Vec2::new(1.0, 1.0),
            };
            let mut map = Map::new(&record);
            let mut objects = ObjectAccessor::new();
            let mut outbox = RecordingOutbox::new();
            let unit = WorldObject::new_player(Guid::new(HighGuid::Player, 0, 1), "u".into(), Uuid::new_v4(), Vec2::new(2.5, 2.5));
            let handle = objects.insert(unit).unwrap();
            map.add_to_map(&mut objects, handle, &mut outbox).unwrap();
            Harness { map, objects, storage: WorldStorage::default(), outbox, rng: StdRng::seed_from_u64(7), handle }
        }

        fn with_motion<R>(&mut self, now_ms: u64, f: impl FnOnce(&mut MotionMaster, &mut MotionContext<'_>) -> R) -> R {
            let mut motion = std::mem::take(&mut self.objects.get_mut(self.handle).unwrap().as_unit_mut().unwrap().motion);
            let mut tick = TickContext {
                objects: &mut self.objects,
                storage: &self.storage,
                outbox: &mut self.outbox,
                rng: &mut self.rng,
                now_ms,
            };
            let result = {
                let mut ctx = MotionContext::new(&mut self.map, &mut tick, self.handle);
                f(&mut motion, &mut ctx)
            };
            self.objects.get_mut(self.handle).unwrap().as_unit_mut().unwrap().motion = motion;
            result
        }

        fn direction(&self) -> MoveDirection {
            self.objects.get(self.handle).unwrap().as_unit().unwrap().move_direction
        }
    }

    #[test]
    fn request_applies_after_update() {
        let mut h = Harness::new();
        h.with_motion(0, |m, ctx| {
            m.move_point(Vec2::new(10.5, 2.5));
            assert_eq!(m.current_kind(), MotionKind::Idle);
            m.update(ctx);
            assert_eq!(m.current_kind(), MotionKind::Point);
            assert!(m.pending().is_none());
        });
        assert_eq!(h.direction(), MoveDirection::RIGHT);
    }

    #[test]
    fn last_request_wins() {
        let mut h = Harness::new();
        h.with_motion(0, |m, ctx| {
            m.move_point(Vec2::new(10.5, 2.5));
            m.move_random(None, 3.0, 100, 100);
            m.update(ctx);
            assert_eq!(m.current_kind(), MotionKind::Random);
            assert_eq!(m.generator_changes(), 1);
        });
    }

    #[test]
    fn swap_finalizes_previous_generator() {
        let mut h = Harness::new();
        h.with_motion(0, |m, ctx| {
            m.move_point(Vec2::new(10.5, 2.5));
            m.update(ctx);
        });
        assert!(!h.direction().is_empty());
        h.with_motion(10, |m, ctx| {
            m.move_idle();
            m.update(ctx);
            assert_eq!(m.current_kind(), MotionKind::Idle);
        });
        assert!(h.direction().is_empty());
    }

    #[test]
    fn failed_kickoff_settles_into_idle() {
        let mut h = Harness::new();
        h.with_motion(0, |m, ctx| {
            // no such path in storage
            m.move_waypoint_path(99);
            m.update(ctx);
            assert_eq!(m.current_kind(), MotionKind::Waypoint);
            assert_eq!(m.pending(), Some(&MotionRequest::Idle));
            m.update(ctx);
            assert_eq!(m.current_kind(), MotionKind::Idle);
            assert_eq!(m.generator_changes(), 2);
        });
    }

    #[test]
    fn termination_does_not_override_external_request() {
        let mut h = Harness::new();
        h.with_motion(0, |m, ctx| {
            m.move_point(Vec2::new(3.5, 2.5));
            m.update(ctx);
        });
        // the single segment is due at 250 ms; the request arrives first
        h.with_motion(300, |m, ctx| {
            m.move_random(None, 2.0, 0, 0);
            m.update(ctx);
            assert_eq!(m.current_kind(), MotionKind::Random);
            assert!(m.pending().is_none());
        });
    }
}
