// tileworld_server/server/src/world/walkability.rs
use smallvec::SmallVec;
use tracing::trace;

use crate::core::types::{FieldType, Guid, MovementTypeMask, Vec2};
use crate::world::grid::field_index;

#[derive(Debug, Clone)]
struct WalkField {
    mask: MovementTypeMask,
    terrain_mask: MovementTypeMask,
    obstacles: SmallVec<[Guid; 4]>,
}

/// Inclusive field rectangle covered by an obstacle box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub begin_x: u32,
    pub begin_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

/// Per-field movement masks: static terrain plus dynamic obstacle occupancy.
#[derive(Debug, Clone)]
pub struct WalkabilityLayer {
    size_x: u32,
    size_y: u32,
    fields: Vec<WalkField>,
}

impl WalkabilityLayer {
    /// `terrain` is row-major (`y * size_x + x`); missing entries count as ground.
    pub fn new(size_x: u32, size_y: u32, terrain: &[FieldType]) -> Self {
        let total = size_x as usize * size_y as usize;
        let fields = (0..total)
            .map(|i| {
                let mask = terrain.get(i).copied().unwrap_or_default().movement_mask();
                WalkField { mask, terrain_mask: mask, obstacles: SmallVec::new() }
            })
            .collect();

        WalkabilityLayer { size_x, size_y, fields }
    }

    pub fn size_x(&self) -> u32 { self.size_x }
    pub fn size_y(&self) -> u32 { self.size_y }

    #[inline]
    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.size_x && y < self.size_y {
            Some(y as usize * self.size_x as usize + x as usize)
        } else {
            None
        }
    }

    pub fn field_mask(&self, x: u32, y: u32) -> Option<MovementTypeMask> {
        self.index(x, y).map(|i| self.fields[i].mask)
    }

    pub fn terrain_mask(&self, x: u32, y: u32) -> Option<MovementTypeMask> {
        self.index(x, y).map(|i| self.fields[i].terrain_mask)
    }

    pub fn obstacles_at(&self, x: u32, y: u32) -> &[Guid] {
        match self.index(x, y) {
            Some(i) => &self.fields[i].obstacles,
            None => &[],
        }
    }

    /// True when the field exists and allows at least one category in `allowed`.
    pub fn is_walkable(&self, x: u32, y: u32, allowed: MovementTypeMask) -> bool {
        self.field_mask(x, y).map_or(false, |mask| mask.intersects(allowed))
    }

    pub fn is_walkable_at(&self, position: Vec2, allowed: MovementTypeMask) -> bool {
        if position.x < 0.0 || position.y < 0.0 {
            return false;
        }
        self.is_walkable(field_index(position.x), field_index(position.y), allowed)
    }

    pub fn footprint(&self, center: Vec2, half_extent: Vec2) -> Option<Footprint> {
        if self.size_x == 0 || self.size_y == 0 {
            return None;
        }
        let max_x = center.x + half_extent.x;
        let max_y = center.y + half_extent.y;
        if max_x < 0.0 || max_y < 0.0 {
            return None;
        }
        let begin_x = field_index((center.x - half_extent.x).max(0.0));
        let begin_y = field_index((center.y - half_extent.y).max(0.0));
        if begin_x >= self.size_x || begin_y >= self.size_y {
            return None;
        }
        Some(Footprint {
            begin_x,
            begin_y,
            end_x: field_index(max_x).min(self.size_x - 1),
            end_y: field_index(max_y).min(self.size_y - 1),
        })
    }

    pub fn mark_obstacle(&mut self, guid: Guid, center: Vec2, half_extent: Vec2) {
        let Some(fp) = self.footprint(center, half_extent) else {
            return;
        };
        for y in fp.begin_y..=fp.end_y {
            for x in fp.begin_x..=fp.end_x {
                let i = y as usize * self.size_x as usize + x as usize;
                let field = &mut self.fields[i];
                if !field.obstacles.contains(&guid) {
                    field.obstacles.push(guid);
                }
                field.mask = MovementTypeMask::NONE;
            }
        }
        trace!("Obstacle {} marked on fields {:?}", guid, fp);
    }

    pub fn clear_obstacle(&mut self, guid: Guid, center: Vec2, half_extent: Vec2) {
        let Some(fp) = self.footprint(center, half_extent) else {
            return;
        };
        for y in fp.begin_y..=fp.end_y {
            for x in fp.begin_x..=fp.end_x {
                let i = y as usize * self.size_x as usize + x as usize;
                let field = &mut self.fields[i];
                field.obstacles.retain(|g| *g != guid);
                if field.obstacles.is_empty() {
                    field.mask = field.terrain_mask;
                }
            }
        }
        trace!("Obstacle {} cleared from fields {:?}", guid, fp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::HighGuid;
    use proptest::prelude::*;

    fn go(low: u32) -> Guid {
        Guid::new(HighGuid::Gameobject, 1, low)
    }

    fn mixed_terrain() -> WalkabilityLayer {
        let mut terrain = vec![FieldType::Ground; 64];
        terrain[9] = FieldType::Water;
        terrain[10] = FieldType::Solid;
        terrain[18] = FieldType::Lava;
        WalkabilityLayer::new(8, 8, &terrain)
    }

    #[test]
    fn terrain_maps_to_movement_masks() {
        let layer = mixed_terrain();
        assert_eq!(layer.field_mask(0, 0), Some(MovementTypeMask::WALK));
        assert_eq!(layer.field_mask(1, 1), Some(MovementTypeMask::SWIM));
        assert_eq!(layer.field_mask(2, 1), Some(MovementTypeMask::NONE));
        assert_eq!(layer.field_mask(2, 2), Some(MovementTypeMask::SWIM));
        assert_eq!(layer.field_mask(8, 0), None);
        assert!(!layer.is_walkable(2, 1, MovementTypeMask::WALK));
        assert!(layer.is_walkable(1, 1, MovementTypeMask::WALK | MovementTypeMask::SWIM));
    }

    #[test]
    fn footprint_truncates_inclusively() {
        let layer = mixed_terrain();
        let fp = layer.footprint(Vec2::new(3.5, 3.5), Vec2::new(1.0, 0.5)).unwrap();
        assert_eq!(fp, Footprint { begin_x: 2, begin_y: 3, end_x: 4, end_y: 4 });
    }

    #[test]
    fn mask_restored_only_after_last_obstacle_leaves() {
        let mut layer = mixed_terrain();
        layer.mark_obstacle(go(1), Vec2::new(1.5, 1.5), Vec2::new(0.5, 0.5));
        layer.mark_obstacle(go(2), Vec2::new(2.5, 1.5), Vec2::new(1.0, 0.2));
        assert_eq!(layer.obstacles_at(1, 1).len(), 2);
        assert_eq!(layer.field_mask(1, 1), Some(MovementTypeMask::NONE));

        layer.clear_obstacle(go(1), Vec2::new(1.5, 1.5), Vec2::new(0.5, 0.5));
        assert_eq!(layer.field_mask(1, 1), Some(MovementTypeMask::NONE));

        layer.clear_obstacle(go(2), Vec2::new(2.5, 1.5), Vec2::new(1.0, 0.2));
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(layer.field_mask(x, y), layer.terrain_mask(x, y));
                assert!(layer.obstacles_at(x, y).is_empty());
            }
        }
    }

    proptest! {
        #[test]
        fn any_clear_order_restores_terrain(
            boxes in proptest::collection::vec((0.0f32..8.0, 0.0f32..8.0, 0.1f32..2.0), 1..6),
            reverse in any::<bool>(),
        ) {
            let mut layer = mixed_terrain();
            for (i, (x, y, h)) in boxes.iter().enumerate() {
                layer.mark_obstacle(go(i as u32 + 1), Vec2::new(*x, *y), Vec2::new(*h, *h));
            }
            let mut order: Vec<usize> = (0..boxes.len()).collect();
            if reverse {
                order.reverse();
            }
            for i in order {
                let (x, y, h) = boxes[i];
                layer.clear_obstacle(go(i as u32 + 1), Vec2::new(x, y), Vec2::new(h, h));
            }
            for y in 0..8 {
                for x in 0..8 {
                    prop_assert_eq!(layer.field_mask(x, y), layer.terrain_mask(x, y));
                }
            }
        }
    }
}
