// tileworld_server/server/src/world/grid.rs
//
// Coordinate math shared by the interest-management grid and the
// walkability layer. Positions are assumed non-negative.

use crate::core::constants::{MAP_CELL_SIZE, MAP_SURROUNDING_CELLS};
use crate::core::types::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32) -> Self { CellCoord { x, y } }
}

#[inline]
pub fn cell_index(coord: f32) -> u32 {
    (coord as u32) / MAP_CELL_SIZE
}

#[inline]
pub fn cell_start(index: u32) -> u32 {
    index * MAP_CELL_SIZE
}

/// Truncates a continuous coordinate to its field index.
#[inline]
pub fn field_index(coord: f32) -> u32 {
    coord as u32
}

/// Inclusive rectangle of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub begin_x: u32,
    pub begin_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl CellRect {
    pub fn contains(&self, cell: CellCoord) -> bool {
        cell.x >= self.begin_x && cell.x <= self.end_x && cell.y >= self.begin_y && cell.y <= self.end_y
    }

    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (self.begin_x..=self.end_x)
            .flat_map(move |x| (self.begin_y..=self.end_y).map(move |y| CellCoord::new(x, y)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGrid {
    width: u32,
    height: u32,
    radius: u32,
}

impl CellGrid {
    /// Grid covering a map of `size_x` x `size_y` fields.
    pub fn for_map(size_x: u32, size_y: u32) -> Self {
        Self::with_radius(size_x, size_y, MAP_SURROUNDING_CELLS)
    }

    pub fn with_radius(size_x: u32, size_y: u32, radius: u32) -> Self {
        CellGrid {
            width: size_x / MAP_CELL_SIZE + 1,
            height: size_y / MAP_CELL_SIZE + 1,
            radius,
        }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn cell_count(&self) -> usize { self.width as usize * self.height as usize }

    pub fn cell_of(&self, position: Vec2) -> CellCoord {
        CellCoord::new(
            cell_index(position.x).min(self.width - 1),
            cell_index(position.y).min(self.height - 1),
        )
    }

    #[inline]
    pub fn flat_index(&self, cell: CellCoord) -> usize {
        cell.x as usize * self.height as usize + cell.y as usize
    }

    pub fn surrounding_bounds(&self, cell: CellCoord) -> CellRect {
        CellRect {
            begin_x: cell.x.saturating_sub(self.radius),
            begin_y: cell.y.saturating_sub(self.radius),
            end_x: (cell.x + self.radius).min(self.width - 1),
            end_y: (cell.y + self.radius).min(self.height - 1),
        }
    }
}
