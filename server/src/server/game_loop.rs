// tileworld_server/server/src/server/game_loop.rs
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use super::instance::WorldServer;

impl WorldServer {
    /// Drives `process_tick` at the configured rate until the future is dropped.
    /// Simulation time is milliseconds since the loop started.
    pub async fn run_game_loop(&mut self) {
        let tick_duration = Duration::from_millis(self.config().tick_duration_ms());
        let mut tick_timer = interval(tick_duration);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let epoch = Instant::now();
        let frames_per_minute = self.config().tick_rate * 60;

        info!("Game loop started. Tick rate: {}ms", tick_duration.as_millis());

        loop {
            tick_timer.tick().await;
            let frame_start_time = Instant::now();
            let now_ms = epoch.elapsed().as_millis() as u64;

            self.process_tick(now_ms);

            let current_frame = self.frame();
            if current_frame % frames_per_minute == 0 {
                info!(
                    "Game loop running - Frame: {}, sessions: {}, maps: {}, objects: {}",
                    current_frame,
                    self.sessions().len(),
                    self.maps().len(),
                    self.objects().len()
                );
            }

            let frame_time = frame_start_time.elapsed();
            if frame_time > tick_duration {
                warn!("Frame {} overran its tick: {:?} (target: {:?})", current_frame, frame_time, tick_duration);
            }
        }
    }
}
