// tileworld_server/server/src/systems/movement/generators/mod.rs
pub mod follow;
pub mod point;
pub mod random;
pub mod waypoint;

use smallvec::SmallVec;

use crate::core::constants::MOVEMENT_SPEED_FACTOR;
use crate::core::types::{MoveDirection, Vec2};
use crate::systems::movement::MotionContext;

pub use follow::FollowMovement;
pub use point::PointMovement;
pub use random::RandomMovement;
pub use waypoint::WaypointMovement;

/// Event a composite child reports to the generator that owns it.
/// The payload is the point id the parent assigned to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSignal {
    PointReached(u32),
    CannotReachPoint(u32),
}

/// What a generator call produced besides moving its owner.
#[derive(Debug, Default)]
pub struct MotionOutcome {
    /// The generator gave up; a top-level generator falls back to idle.
    pub terminated: bool,
    pub signals: SmallVec<[ChildSignal; 2]>,
}

impl MotionOutcome {
    pub fn take_signals(&mut self) -> SmallVec<[ChildSignal; 2]> {
        std::mem::take(&mut self.signals)
    }
}

/// Segment timer shared by all generators that walk from point to point.
#[derive(Debug, Clone, Default)]
pub struct SegmentDriver {
    segment: u32,
    last_point_time: u64,
    next_point_diff: u64,
    active: bool,
}

impl SegmentDriver {
    pub fn is_stopped(&self) -> bool {
        !self.active
    }

    /// Segment whose arrival time has passed, if any. Fires once per segment.
    pub fn poll(&mut self, now_ms: u64) -> Option<u32> {
        if self.active && now_ms.saturating_sub(self.last_point_time) >= self.next_point_diff {
            self.active = false;
            return Some(self.segment);
        }
        None
    }

    /// Starts walking toward `target`, holding exactly the keys in `direction`.
    pub fn set_next_movement(&mut self, ctx: &mut MotionContext<'_>, segment: u32, target: Vec2, direction: MoveDirection) {
        let distance = ctx.owner_position().distance(&target);
        let per_ms = ctx.owner_speed() * MOVEMENT_SPEED_FACTOR;

        self.segment = segment;
        self.last_point_time = ctx.now_ms;
        self.next_point_diff = if per_ms > 0.0 { (distance / per_ms) as u64 } else { 0 };
        self.active = true;

        for key in MoveDirection::ALL_SINGLE {
            if direction.contains(key) {
                ctx.start_moving(key);
            } else {
                ctx.stop_moving(key);
            }
        }
    }

    pub fn stop_movement(&mut self, ctx: &mut MotionContext<'_>) {
        self.last_point_time = 0;
        self.next_point_diff = 0;
        self.active = false;
        for key in MoveDirection::ALL_SINGLE {
            ctx.stop_moving(key);
        }
    }
}
