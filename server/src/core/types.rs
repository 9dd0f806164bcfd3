// tileworld_server/server/src/core/types.rs
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::fmt;
use std::ops::{Add, Mul, Sub};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// --- Basic Geometric Types ---
#[derive(Clone, Debug, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self { Vec2 { x, y } }
    pub fn zero() -> Self { Vec2 { x: 0.0, y: 0.0 } }

    /// Vector of `length` pointing at `angle` radians.
    pub fn from_polar(length: f32, angle: f32) -> Self {
        Vec2 { x: length * angle.cos(), y: length * angle.sin() }
    }

    pub fn length(&self) -> f32 { (self.x * self.x + self.y * self.y).sqrt() }

    pub fn distance(&self, other: &Vec2) -> f32 { (*self - *other).length() }

    /// Unit vector in the same direction, or `None` for a zero vector.
    pub fn normalized(&self) -> Option<Vec2> {
        let len = self.length();
        if len > f32::EPSILON {
            Some(Vec2::new(self.x / len, self.y / len))
        } else {
            None
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 { Vec2::new(self.x + rhs.x, self.y + rhs.y) }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 { Vec2::new(self.x - rhs.x, self.y - rhs.y) }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 { Vec2::new(self.x * rhs, self.y * rhs) }
}

// --- Identity ---

/// Category tag stored in the top byte of every GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HighGuid {
    Player = 1,
    Creature = 2,
    Gameobject = 3,
    Item = 4,
}

impl HighGuid {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(HighGuid::Player),
            2 => Some(HighGuid::Creature),
            3 => Some(HighGuid::Gameobject),
            4 => Some(HighGuid::Item),
            _ => None,
        }
    }
}

pub const GUID_ENTRY_MASK: u64 = 0x00FF_FFFF;

/// 64-bit object identity: high tag (8 bits) | template entry (24 bits) | low id (32 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(pub u64);

impl Guid {
    pub fn new(high: HighGuid, entry: u32, low: u32) -> Self {
        Guid(((high as u64) << 56) | ((entry as u64 & GUID_ENTRY_MASK) << 32) | low as u64)
    }

    pub fn raw(&self) -> u64 { self.0 }
    pub fn high(&self) -> Option<HighGuid> { HighGuid::from_u8((self.0 >> 56) as u8) }
    pub fn entry(&self) -> u32 { ((self.0 >> 32) & GUID_ENTRY_MASK) as u32 }
    pub fn low(&self) -> u32 { self.0 as u32 }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

// --- Movement flags ---
bitflags! {
    /// Direction keys a unit is currently holding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MoveDirection: u8 {
        const UP    = 1 << 0;
        const RIGHT = 1 << 1;
        const DOWN  = 1 << 2;
        const LEFT  = 1 << 3;
    }
}

// Indexed by the raw direction mask. Masks where opposing keys cancel out
// (mask % 5 == 0) produce no movement.
const MOVEMENT_ANGLES: [f32; 16] = [
    0.0,
    1.5 * PI,
    0.0,
    1.75 * PI,
    FRAC_PI_2,
    0.0,
    FRAC_PI_4,
    0.0,
    PI,
    1.25 * PI,
    0.0,
    1.5 * PI,
    0.75 * PI,
    PI,
    FRAC_PI_2,
    0.0,
];

impl MoveDirection {
    pub const ALL_SINGLE: [MoveDirection; 4] =
        [MoveDirection::UP, MoveDirection::RIGHT, MoveDirection::DOWN, MoveDirection::LEFT];

    /// Velocity in fields per millisecond for a unit moving with `speed` fields per second.
    pub fn movement_vector(&self, speed: f32) -> Vec2 {
        let mask = self.bits() as usize & 0xF;
        if mask % 5 == 0 {
            return Vec2::zero();
        }
        Vec2::from_polar(speed * crate::core::constants::MOVEMENT_SPEED_FACTOR, MOVEMENT_ANGLES[mask])
    }
}

bitflags! {
    /// Movement categories allowed to traverse a field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MovementTypeMask: u8 {
        const WALK = 1 << 0;
        const SWIM = 1 << 1;
        const NONE = 1 << 2;
    }
}

/// Static terrain of a single map field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Ground,
    Solid,
    Water,
    Lava,
}

impl FieldType {
    pub fn movement_mask(&self) -> MovementTypeMask {
        match self {
            FieldType::Ground => MovementTypeMask::WALK,
            FieldType::Solid => MovementTypeMask::NONE,
            FieldType::Water | FieldType::Lava => MovementTypeMask::SWIM,
        }
    }
}
