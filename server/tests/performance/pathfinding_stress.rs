// tileworld_server/server/tests/performance/pathfinding_stress.rs

use std::time::Instant;

use metrics::histogram;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tileworld_server_core::core::types::{FieldType, MovementTypeMask, Vec2};
use tileworld_server_core::systems::movement::pathfinding::{find_path, PathfindError};
use tileworld_server_core::world::walkability::WalkabilityLayer;

const SIZE: u32 = 256;

fn scattered_walls(seed: u64, density: f64) -> WalkabilityLayer {
    let mut rng = StdRng::seed_from_u64(seed);
    let terrain: Vec<FieldType> = (0..SIZE * SIZE)
        .map(|_| if rng.gen_bool(density) { FieldType::Solid } else { FieldType::Ground })
        .collect();
    WalkabilityLayer::new(SIZE, SIZE, &terrain)
}

#[test]
fn random_searches_return_walkable_connected_paths() {
    let layer = scattered_walls(11, 0.2);
    let mut rng = StdRng::seed_from_u64(12);
    let mut found = 0;

    for _ in 0..2000 {
        let src = Vec2::new(rng.gen_range(0.0..SIZE as f32), rng.gen_range(0.0..SIZE as f32));
        let dst = Vec2::new(rng.gen_range(0.0..SIZE as f32), rng.gen_range(0.0..SIZE as f32));

        let start = Instant::now();
        let result = find_path(&layer, src, dst, MovementTypeMask::WALK);
        histogram!("pathfind_duration_us").record(start.elapsed().as_micros() as f64);

        match result {
            Ok(path) => {
                found += 1;
                assert!(!path.points.is_empty());
                let mut previous = (src.x as u32, src.y as u32);
                for point in &path.points {
                    let field = (point.position.x as u32, point.position.y as u32);
                    assert!(layer.is_walkable(field.0, field.1, MovementTypeMask::WALK));
                    assert!(previous.0.abs_diff(field.0) <= 1 && previous.1.abs_diff(field.1) <= 1);
                    assert!(!point.direction.is_empty());
                    previous = field;
                }
            }
            Err(PathfindError::NoPath(..)) => {}
        }
    }
    assert!(found > 0);
}

#[test]
fn capped_search_stays_bounded_on_long_routes() {
    let layer = scattered_walls(21, 0.1);
    let start = Instant::now();
    for i in 0..200 {
        let y = (i % SIZE) as f32 + 0.5;
        let _ = find_path(&layer, Vec2::new(0.5, y), Vec2::new(SIZE as f32 - 0.5, y), MovementTypeMask::WALK);
    }
    // 200 capped searches; generous bound for debug builds
    assert!(start.elapsed().as_secs() < 5, "took {:?}", start.elapsed());
}
