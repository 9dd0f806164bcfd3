// tileworld_server/server/src/systems/movement/pathfinding.rs
//
// A* over the walkability grid, 8-connected. A field is pushed at most once
// (first discovery wins, queued entries are never relaxed) and the search
// gives up after a fixed number of expansions, returning the path to the
// closest field seen so far.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f32::consts::SQRT_2;

use ahash::AHashSet;
use metrics::counter;
use thiserror::Error;
use tracing::trace;

use crate::core::constants::{PATHFIND_FIELD_CENTER_OFFSET, PATHFIND_ITERATIONS_LIMIT};
use crate::core::types::{MoveDirection, MovementTypeMask, Vec2};
use crate::world::grid::field_index;
use crate::world::walkability::WalkabilityLayer;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathfindError {
    #[error("no path from ({0}, {1}) to ({2}, {3})")]
    NoPath(u32, u32, u32, u32),
}

/// One path segment: field center to walk to and the keys to hold on the way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub position: Vec2,
    pub direction: MoveDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub points: Vec<PathPoint>,
    /// Set when the search stopped short of the destination.
    pub incomplete: bool,
    /// Accumulated step cost of the returned path.
    pub cost: f32,
}

#[derive(Debug, Clone, Copy)]
struct SearchRecord {
    x: u32,
    y: u32,
    parent: Option<usize>,
    src_cost: f32,
    dst_cost: f32,
}

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    priority: f32,
    seq: u32,
    record: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    // BinaryHeap is a max-heap; lowest priority (then earliest push) must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Octile distance between two fields.
#[inline]
pub fn octile_distance(ax: u32, ay: u32, bx: u32, by: u32) -> f32 {
    let dx = ax.abs_diff(bx) as f32;
    let dy = ay.abs_diff(by) as f32;
    dx.min(dy) * SQRT_2 + (dx - dy).abs()
}

struct Search<'a> {
    layer: &'a WalkabilityLayer,
    allowed: MovementTypeMask,
    dest: (u32, u32),
    records: Vec<SearchRecord>,
    visited: AHashSet<(u32, u32)>,
    open: BinaryHeap<OpenEntry>,
    closest: usize,
    seq: u32,
}

impl<'a> Search<'a> {
    fn new(layer: &'a WalkabilityLayer, allowed: MovementTypeMask, dest: (u32, u32)) -> Self {
        Search {
            layer,
            allowed,
            dest,
            records: Vec::with_capacity(64),
            visited: AHashSet::with_capacity(64),
            open: BinaryHeap::with_capacity(64),
            closest: 0,
            seq: 0,
        }
    }

    fn walkable(&self, x: Option<u32>, y: Option<u32>) -> bool {
        match (x, y) {
            (Some(x), Some(y)) => self.layer.is_walkable(x, y, self.allowed),
            _ => false,
        }
    }

    fn push(&mut self, x: u32, y: u32, parent: Option<usize>, src_cost: f32) {
        if !self.visited.insert((x, y)) {
            return;
        }
        let dst_cost = octile_distance(x, y, self.dest.0, self.dest.1);
        let index = self.records.len();
        self.records.push(SearchRecord { x, y, parent, src_cost, dst_cost });
        if dst_cost < self.records[self.closest].dst_cost {
            self.closest = index;
        }
        self.open.push(OpenEntry { priority: src_cost + dst_cost, seq: self.seq, record: index });
        self.seq += 1;
    }

    fn expand(&mut self, index: usize) {
        let SearchRecord { x, y, src_cost, .. } = self.records[index];
        let left = x.checked_sub(1);
        let right = x.checked_add(1);
        let up = y.checked_sub(1);
        let down = y.checked_add(1);

        let can_left = self.walkable(left, Some(y));
        let can_right = self.walkable(right, Some(y));
        let can_up = self.walkable(Some(x), up);
        let can_down = self.walkable(Some(x), down);

        // push order breaks ties between equal-cost routes
        let mut candidates: [(bool, Option<u32>, Option<u32>, f32); 8] = [
            (can_left, left, Some(y), 1.0),
            (can_right, right, Some(y), 1.0),
            (can_up, Some(x), up, 1.0),
            (can_down, Some(x), down, 1.0),
            (can_left && can_up, left, up, SQRT_2),
            (can_left && can_down, left, down, SQRT_2),
            (can_right && can_up, right, up, SQRT_2),
            (can_right && can_down, right, down, SQRT_2),
        ];
        for diagonal in candidates.iter_mut().skip(4) {
            diagonal.0 = diagonal.0 && self.walkable(diagonal.1, diagonal.2);
        }

        for (open, nx, ny, step) in candidates {
            if let (true, Some(nx), Some(ny)) = (open, nx, ny) {
                self.push(nx, ny, Some(index), src_cost + step);
            }
        }
    }
}

/// Finds a path between two continuous positions for a unit allowed on `allowed` fields.
pub fn find_path(
    layer: &WalkabilityLayer,
    source: Vec2,
    destination: Vec2,
    allowed: MovementTypeMask,
) -> Result<Path, PathfindError> {
    find_path_limited(layer, source, destination, allowed, PATHFIND_ITERATIONS_LIMIT)
}

pub fn find_path_limited(
    layer: &WalkabilityLayer,
    source: Vec2,
    destination: Vec2,
    allowed: MovementTypeMask,
    iteration_limit: u32,
) -> Result<Path, PathfindError> {
    counter!("pathfind_searches_total").increment(1);

    let clamp = |v: f32, size: u32| field_index(v.max(0.0)).min(size.saturating_sub(1));
    let (sx, sy) = (clamp(source.x, layer.size_x()), clamp(source.y, layer.size_y()));
    let (dx, dy) = (clamp(destination.x, layer.size_x()), clamp(destination.y, layer.size_y()));

    let mut search = Search::new(layer, allowed, (dx, dy));
    search.push(sx, sy, None, 0.0);

    let mut terminal = 0;
    let mut reached = false;
    let mut iterations = 0;
    while iterations < iteration_limit {
        let Some(entry) = search.open.pop() else {
            break;
        };
        iterations += 1;
        terminal = entry.record;
        let record = search.records[terminal];
        if (record.x, record.y) == (dx, dy) {
            reached = true;
            break;
        }
        search.expand(terminal);
    }

    if !reached {
        terminal = search.closest;
    }

    let mut chain = Vec::new();
    let mut cursor = Some(terminal);
    while let Some(i) = cursor {
        chain.push(i);
        cursor = search.records[i].parent;
    }
    chain.reverse();

    if chain.len() <= 1 {
        counter!("pathfind_failed_total").increment(1);
        trace!("No path ({}, {}) -> ({}, {}) after {} iterations", sx, sy, dx, dy, iterations);
        return Err(PathfindError::NoPath(sx, sy, dx, dy));
    }

    let points = chain
        .windows(2)
        .map(|pair| {
            let from = &search.records[pair[0]];
            let to = &search.records[pair[1]];
            let mut direction = MoveDirection::empty();
            if from.y > to.y {
                direction |= MoveDirection::UP;
            } else if from.y < to.y {
                direction |= MoveDirection::DOWN;
            }
            if from.x > to.x {
                direction |= MoveDirection::LEFT;
            } else if from.x < to.x {
                direction |= MoveDirection::RIGHT;
            }
            PathPoint {
                position: Vec2::new(
                    to.x as f32 + PATHFIND_FIELD_CENTER_OFFSET,
                    to.y as f32 + PATHFIND_FIELD_CENTER_OFFSET,
                ),
                direction,
            }
        })
        .collect();

    if !reached {
        counter!("pathfind_incomplete_total").increment(1);
    }
    trace!(
        "Path ({}, {}) -> ({}, {}): {} segments, incomplete: {}, iterations: {}",
        sx, sy, dx, dy, chain.len() - 1, !reached, iterations
    );

    Ok(Path { points, incomplete: !reached, cost: search.records[terminal].src_cost })
}
