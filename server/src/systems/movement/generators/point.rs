// tileworld_server/server/src/systems/movement/generators/point.rs
use tracing::debug;

use crate::core::types::Vec2;
use crate::systems::movement::pathfinding::PathPoint;
use crate::systems::movement::MotionContext;

use super::{ChildSignal, MotionOutcome, SegmentDriver};

/// Walks a pathfinder route toward a single destination.
#[derive(Debug, Clone, Default)]
pub struct PointMovement {
    driver: SegmentDriver,
    target: Vec2,
    path: Vec<PathPoint>,
    incomplete: bool,
    composite: bool,
    point_id: u32,
}

impl PointMovement {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child reports through signals instead of terminating its owner's motion.
    pub fn composite_child() -> Self {
        PointMovement { composite: true, ..Self::default() }
    }

    pub fn is_stopped(&self) -> bool {
        self.driver.is_stopped()
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    pub fn path(&self) -> &[PathPoint] {
        &self.path
    }

    pub fn point_id(&self) -> u32 {
        self.point_id
    }

    pub fn set_point_id(&mut self, id: u32) {
        self.point_id = id;
    }

    pub fn set_target(&mut self, ctx: &mut MotionContext<'_>, target: Vec2, out: &mut MotionOutcome) {
        self.target = target;
        self.path.clear();

        match ctx.find_path(target) {
            Ok(path) if !path.points.is_empty() => {
                self.incomplete = path.incomplete;
                self.path = path.points;
                let first = self.path[0];
                self.driver.set_next_movement(ctx, 0, first.position, first.direction);
            }
            Ok(_) => self.cannot_reach(ctx, out),
            Err(e) => {
                debug!("{}: {}", ctx.owner_guid(), e);
                self.cannot_reach(ctx, out);
            }
        }
    }

    fn cannot_reach(&mut self, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) {
        self.incomplete = false;
        self.driver.stop_movement(ctx);
        self.terminate(out);
        if self.composite {
            out.signals.push(ChildSignal::CannotReachPoint(self.point_id));
        }
    }

    pub fn update(&mut self, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) {
        if let Some(segment) = self.driver.poll(ctx.now_ms) {
            self.segment_reached(ctx, segment, out);
        }
    }

    fn segment_reached(&mut self, ctx: &mut MotionContext<'_>, segment: u32, out: &mut MotionOutcome) {
        let next = segment as usize + 1;
        match self.path.get(next).copied() {
            Some(point) => self.driver.set_next_movement(ctx, next as u32, point.position, point.direction),
            None if self.incomplete => {
                // the grid may have changed since the partial route was planned
                self.set_target(ctx, self.target, out);
            }
            None => {
                self.driver.stop_movement(ctx);
                if self.composite {
                    out.signals.push(ChildSignal::PointReached(self.point_id));
                } else {
                    self.terminate(out);
                }
            }
        }
    }

    fn terminate(&self, out: &mut MotionOutcome) {
        if !self.composite {
            out.terminated = true;
        }
    }

    pub fn finalize(&mut self, ctx: &mut MotionContext<'_>) {
        self.driver.stop_movement(ctx);
    }
}
