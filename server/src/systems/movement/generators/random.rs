// tileworld_server/server/src/systems/movement/generators/random.rs
use std::f32::consts::TAU;

use rand::Rng;

use crate::core::constants::DEFAULT_RANDOM_RADIUS;
use crate::core::types::Vec2;
use crate::systems::movement::MotionContext;

use super::{MotionOutcome, PointMovement};

/// Wanders to random points within `radius` of an origin, pausing between moves.
#[derive(Debug, Clone)]
pub struct RandomMovement {
    child: PointMovement,
    origin: Vec2,
    radius: f32,
    min_delay_ms: u64,
    max_delay_ms: u64,
    arrived_at: Option<u64>,
    current_delay_ms: u64,
}

impl Default for RandomMovement {
    fn default() -> Self {
        RandomMovement {
            child: PointMovement::composite_child(),
            origin: Vec2::zero(),
            radius: DEFAULT_RANDOM_RADIUS,
            min_delay_ms: 0,
            max_delay_ms: 0,
            arrived_at: None,
            current_delay_ms: 0,
        }
    }
}

impl RandomMovement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> Vec2 { self.origin }
    pub fn radius(&self) -> f32 { self.radius }
    pub fn current_delay_ms(&self) -> u64 { self.current_delay_ms }
    pub fn is_waiting(&self) -> bool { self.arrived_at.is_some() }

    /// `origin` defaults to where the owner stands now.
    pub fn start(
        &mut self,
        ctx: &mut MotionContext<'_>,
        origin: Option<Vec2>,
        radius: f32,
        min_delay_ms: u64,
        max_delay_ms: u64,
    ) {
        self.origin = origin.unwrap_or_else(|| ctx.owner_position());
        self.radius = radius.max(0.0);
        self.min_delay_ms = min_delay_ms.min(max_delay_ms);
        self.max_delay_ms = min_delay_ms.max(max_delay_ms);
        self.arrived_at = None;
        self.move_to_next_random_point(ctx);
    }

    fn move_to_next_random_point(&mut self, ctx: &mut MotionContext<'_>) {
        let distance = ctx.rng.gen_range(0.0..=self.radius);
        let angle = ctx.rng.gen_range(0.0..TAU);
        let destination = self.origin + Vec2::from_polar(distance, angle);

        let mut child_out = MotionOutcome::default();
        self.child.set_target(ctx, destination, &mut child_out);
        self.receive_child_signals(ctx, &mut child_out);
    }

    fn receive_child_signals(&mut self, ctx: &mut MotionContext<'_>, child_out: &mut MotionOutcome) {
        // reached or unreachable, either way pause and pick another point
        if child_out.take_signals().is_empty() {
            return;
        }
        self.arrived_at = Some(ctx.now_ms);
        self.current_delay_ms = if self.min_delay_ms == self.max_delay_ms {
            self.max_delay_ms
        } else {
            ctx.rng.gen_range(self.min_delay_ms..=self.max_delay_ms)
        };
    }

    pub fn update(&mut self, ctx: &mut MotionContext<'_>, _out: &mut MotionOutcome) {
        let mut child_out = MotionOutcome::default();
        self.child.update(ctx, &mut child_out);
        self.receive_child_signals(ctx, &mut child_out);

        if let Some(arrived_at) = self.arrived_at {
            if self.current_delay_ms == 0 || ctx.now_ms.saturating_sub(arrived_at) >= self.current_delay_ms {
                self.arrived_at = None;
                self.move_to_next_random_point(ctx);
            }
        }
    }

    pub fn finalize(&mut self, ctx: &mut MotionContext<'_>) {
        self.child.finalize(ctx);
    }
}
