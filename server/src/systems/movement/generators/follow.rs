// tileworld_server/server/src/systems/movement/generators/follow.rs
use tracing::debug;

use crate::core::constants::{
    DEFAULT_FOLLOW_DISTANCE, DEFAULT_FOLLOW_MAX_DISTANCE, FOLLOW_DISTANCE_CHECK_DELAY_MS,
};
use crate::core::types::Guid;
use crate::entities::object::WorldObject;
use crate::systems::movement::MotionContext;

use super::{MotionOutcome, PointMovement};

/// Keeps the owner within `max_distance` of a target, closing in to `follow_distance`.
#[derive(Debug, Clone)]
pub struct FollowMovement {
    child: PointMovement,
    target: Guid,
    follow_distance: f32,
    max_distance: f32,
    last_check: u64,
}

impl Default for FollowMovement {
    fn default() -> Self {
        FollowMovement {
            child: PointMovement::composite_child(),
            target: Guid::default(),
            follow_distance: DEFAULT_FOLLOW_DISTANCE,
            max_distance: DEFAULT_FOLLOW_MAX_DISTANCE,
            last_check: 0,
        }
    }
}

impl FollowMovement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> Guid { self.target }

    pub fn start(
        &mut self,
        ctx: &mut MotionContext<'_>,
        target: Guid,
        follow_distance: f32,
        max_distance: f32,
        out: &mut MotionOutcome,
    ) {
        self.target = target;
        self.follow_distance = follow_distance;
        self.max_distance = max_distance;
        self.last_check = ctx.now_ms;

        if !self.within_range(ctx, out) {
            self.move_to_close_point(ctx, out);
        }
    }

    /// Resolves the target; `None` when it is gone, on another map, or the owner itself.
    fn resolve_target<'c>(&self, ctx: &'c MotionContext<'_>) -> Option<(&'c WorldObject, &'c WorldObject)> {
        let owner = ctx.owner()?;
        let target = ctx.objects.find_object(self.target)?;
        if target.guid() == owner.guid() || target.map_id().is_none() || target.map_id() != owner.map_id() {
            return None;
        }
        Some((owner, target))
    }

    /// True when no move is needed. A lost target terminates the generator.
    fn within_range(&self, ctx: &MotionContext<'_>, out: &mut MotionOutcome) -> bool {
        match self.resolve_target(ctx) {
            None => {
                debug!("{}: follow target {} lost", ctx.owner_guid(), self.target);
                out.terminated = true;
                true
            }
            Some((owner, target)) => target.minimum_box_distance(owner) <= self.max_distance,
        }
    }

    fn move_to_close_point(&mut self, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) {
        let Some((owner, target)) = self.resolve_target(ctx) else {
            out.terminated = true;
            return;
        };
        let target_pos = target.position();
        let destination = match (target_pos - owner.position()).normalized() {
            Some(unit) => target_pos + unit * -self.follow_distance,
            None => target_pos,
        };

        let mut child_out = MotionOutcome::default();
        self.child.set_target(ctx, destination, &mut child_out);
    }

    pub fn update(&mut self, ctx: &mut MotionContext<'_>, out: &mut MotionOutcome) {
        let mut child_out = MotionOutcome::default();
        self.child.update(ctx, &mut child_out);

        if self.child.is_stopped() && ctx.now_ms.saturating_sub(self.last_check) >= FOLLOW_DISTANCE_CHECK_DELAY_MS {
            self.last_check = ctx.now_ms;
            if !self.within_range(ctx, out) {
                self.move_to_close_point(ctx, out);
            }
        }
    }

    pub fn finalize(&mut self, ctx: &mut MotionContext<'_>) {
        self.child.finalize(ctx);
    }
}
