// tileworld_server/server/src/systems/movement/generators/waypoint.rs
use tracing::{debug, warn};

use crate::core::types::Vec2;
use crate::systems::movement::MotionContext;
use crate::world::storage::{WaypointFlags, WaypointRecord};

use super::{ChildSignal, MotionOutcome, PointMovement};

/// How a path continues once its last point is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatType {
    None,
    /// 0..n, 0..n, ...
    FromStart,
    /// 0..n, n..0, then stop
    Backward,
    /// 0..n, n..0, 0..n, ...
    Cyclic,
}

impl RepeatType {
    pub fn from_path(points: &[WaypointRecord]) -> Self {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return RepeatType::None;
        };
        let last = last.flags();
        if last.contains(WaypointFlags::REPEAT) {
            RepeatType::FromStart
        } else if last.contains(WaypointFlags::REPEAT_REVERSE) {
            if first.flags().contains(WaypointFlags::REPEAT_REVERSE) {
                RepeatType::Cyclic
            } else {
                RepeatType::Backward
            }
        } else {
            RepeatType::None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PreparedWaypoint {
    position: Vec2,
    wait_ms: u64,
    relative_current: bool,
}

#[derive(Debug, Clone)]
pub struct WaypointMovement {
    child: PointMovement,
    path_id: u32,
    points: Vec<PreparedWaypoint>,
    point_index: usize,
    forward: bool,
    repeat: RepeatType,
    arrived_at: Option<u64>,
}

impl Default for WaypointMovement {
    fn default() -> Self {
        WaypointMovement {
            child: PointMovement::composite_child(),
            path_id: 0,
            points: Vec::new(),
            point_index: 0,
            forward: true,
            repeat: RepeatType::None,
            arrived_at: None,
        }
    }
}

impl WaypointMovement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_id(&self) -> u32 { self.path_id }
    pub fn current_point(&self) -> usize { self.point_index }
    pub fn repeat_type(&self) -> RepeatType { self.repeat }
    pub fn is_forward(&self) -> bool { self.forward }

    pub fn start(&mut self, ctx: &mut MotionContext<'_>, path_id: u32, out: &mut MotionOutcome) {
        self.path_id = path_id;
        let storage = ctx.storage;
        let Some(path) = storage.waypoint_path(path_id).filter(|p| !p.points.is_empty()) else {
            warn!("{}: waypoint path {} missing or empty", ctx.owner_guid(), path_id);
            out.terminated = true;
            return;
        };

        // copied so a data reload cannot change a path mid-walk
        let spawn = ctx.owner_spawn_position();
        self.points = path
            .points
            .iter()
            .map(|rec| {
                let flags = rec.flags();
                let base = match spawn {
                    Some(spawn) if flags.contains(WaypointFlags::RELATIVE_SPAWN) => spawn,
                    _ => Vec2::zero(),
                };
                PreparedWaypoint {
                    position: base + Vec2::new(rec.x, rec.y),
                    wait_ms: rec.wait_ms,
                    relative_current: flags.contains(WaypointFlags::RELATIVE_CURRENT),
                }
            })
            .collect();
        self.repeat = RepeatType::from_path(&path.points);
        self.forward = true;
        self.arrived_at = None;
        debug!("{}: walking waypoint path {} ({} points, {:?})", ctx.owner_guid(), path_id, self.points.len(), self.repeat);

        self.move_to_point(ctx, 0);
    }

    fn move_to_point(&mut self, ctx: &mut MotionContext<'_>, index: usize) {
        let wp = self.points[index];
        let mut destination = wp.position;
        if wp.relative_current {
            if !self.forward {
                destination = destination * -1.0;
            }
            destination = destination + ctx.owner_position();
        }

        self.point_index = index;
        self.child.set_point_id(index as u32 + 1);
        let mut child_out = MotionOutcome::default();
        self.child.set_target(ctx, destination, &mut child_out);
        self.receive_child_signals(ctx.now_ms, &mut child_out);
    }

    fn receive_child_signals(&mut self, now_ms: u64, child_out: &mut MotionOutcome) {
        let expected = self.point_index as u32 + 1;
        for signal in child_out.take_signals() {
            match signal {
                ChildSignal::PointReached(id) | ChildSignal::CannotReachPoint(id) if id == expected => {
                    self.arrived_at = Some(now_ms);
                }
                _ => {}
            }
        }
    }

    /// Next index to walk to under the repeat policy, flipping direction at the ends.
    fn select_next_point(&mut self) -> Option<usize> {
        let last = self.points.len().saturating_sub(1);
        if self.forward {
            if self.point_index < last {
                return Some(self.point_index + 1);
            }
            match self.repeat {
                RepeatType::Backward | RepeatType::Cyclic => {
                    self.forward = false;
                    Some(self.point_index)
                }
                RepeatType::FromStart => Some(0),
                RepeatType::None => None,
            }
        } else {
            if self.point_index > 0 {
                return Some(self.point_index - 1);
            }
            match self.repeat {
                RepeatType::Cyclic => {
                    self.forward = true;
                    Some(self.point_index)
                }
                _ => None,
            }
        }
    }

    pub fn update(&mut self, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) {
        let mut child_out = MotionOutcome::default();
        self.child.update(ctx, &mut child_out);
        self.receive_child_signals(ctx.now_ms, &mut child_out);

        let Some(arrived_at) = self.arrived_at else {
            return;
        };
        let wait = self.points[self.point_index].wait_ms;
        if wait != 0 && ctx.now_ms.saturating_sub(arrived_at) < wait {
            return;
        }
        self.arrived_at = None;

        match self.select_next_point() {
            Some(next) => self.move_to_point(ctx, next),
            None => {
                self.child.finalize(ctx);
                out.terminated = true;
            }
        }
    }

    pub fn finalize(&mut self, ctx: &mut MotionContext<'_>) {
        self.child.finalize(ctx);
    }
}
